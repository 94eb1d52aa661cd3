//! Per-domain last-write-wins merge.
//!
//! For each domain the side with the strictly greater `updatedAt` wins. If
//! only one side has the domain, that side wins. Ties, including the case
//! where neither side has a usable marker, go to the remote side so that
//! identical data is never pushed back.

use crate::domain::{Domain, DomainBlock};
use crate::snapshot::SnapshotPayload;

/// Which side of a merge supplied a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The locally built snapshot.
    Local,
    /// The record pulled from the remote store.
    Remote,
}

/// Chooses the winning side for a single domain.
///
/// Returns `None` only when neither side has the domain.
pub fn pick_side(local: Option<&DomainBlock>, remote: Option<&DomainBlock>) -> Option<Side> {
    match (local, remote) {
        (None, None) => None,
        (Some(_), None) => Some(Side::Local),
        (None, Some(_)) => Some(Side::Remote),
        (Some(l), Some(r)) => {
            if l.is_newer_than(r) {
                Some(Side::Local)
            } else {
                Some(Side::Remote)
            }
        }
    }
}

/// Per-domain winners, in payload order.
pub fn merge_decisions(local: &SnapshotPayload, remote: &SnapshotPayload) -> Vec<(Domain, Side)> {
    Domain::ALL
        .into_iter()
        .filter_map(|domain| {
            pick_side(local.get(domain), remote.get(domain)).map(|side| (domain, side))
        })
        .collect()
}

/// Merges two payloads domain by domain. Blocks are never combined.
///
/// Keys outside the known domains are taken from the remote side.
pub fn lww_merge(local: &SnapshotPayload, remote: &SnapshotPayload) -> SnapshotPayload {
    let mut merged: SnapshotPayload = merge_decisions(local, remote)
        .into_iter()
        .filter_map(|(domain, side)| {
            let block = match side {
                Side::Local => local.get(domain),
                Side::Remote => remote.get(domain),
            };
            block.map(|b| (domain, b.clone()))
        })
        .collect();
    merged.adopt_unknown(remote);
    merged
}

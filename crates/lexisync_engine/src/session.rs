//! Session lookup.
//!
//! Every sync path checks for an established session before touching the
//! network. Without one, manual and automatic sync are no-ops.

use parking_lot::RwLock;

/// Supplies the identity of the signed-in user.
pub trait SessionProvider: Send + Sync {
    /// Returns the current user id, or `None` when signed out.
    fn current_user(&self) -> Option<String>;
}

/// A session that is set and cleared explicitly.
#[derive(Debug, Default)]
pub struct StaticSession {
    user: RwLock<Option<String>>,
}

impl StaticSession {
    /// Creates a signed-out session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session signed in as `user_id`.
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user: RwLock::new(Some(user_id.into())),
        }
    }

    /// Signs in.
    pub fn sign_in(&self, user_id: impl Into<String>) {
        *self.user.write() = Some(user_id.into());
    }

    /// Signs out.
    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<String> {
        self.user.read().clone()
    }
}

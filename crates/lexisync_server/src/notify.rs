//! Change-notice fan-out keyed by user id.

use lexisync_protocol::ChangeNotice;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Per-user broadcast channels carrying "something changed" notices.
#[derive(Debug)]
pub struct ChangeHub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<ChangeNotice>>>,
}

impl ChangeHub {
    /// Creates a hub whose channels buffer `capacity` notices.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to notices for `user_id`.
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<ChangeNotice> {
        self.channels
            .lock()
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Delivers `notice` to its user's subscribers. Returns how many received it.
    pub fn publish(&self, notice: ChangeNotice) -> usize {
        let mut channels = self.channels.lock();
        let Some(sender) = channels.get(&notice.user_id) else {
            return 0;
        };
        let user_id = notice.user_id.clone();
        match sender.send(notice) {
            Ok(receivers) => receivers,
            Err(_) => {
                channels.remove(&user_id);
                0
            }
        }
    }

    /// Number of users with a live channel.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

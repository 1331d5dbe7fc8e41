//! Desired-subscription registry.
//!
//! The set records which terrain ids the session wants live updates for.
//! Membership is independent of the connection: ids added while the channel
//! is down are replayed by the connection task after the next successful
//! connect, so a drop never silently loses a subscription.

use std::collections::BTreeSet;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct SubscriptionSet {
    ids: Mutex<BTreeSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the id was not already present.
    pub fn insert(&self, terrain_id: &str) -> bool {
        self.ids
            .lock()
            .expect("subscription lock poisoned")
            .insert(terrain_id.to_string())
    }

    /// Returns true when the id was present.
    pub fn remove(&self, terrain_id: &str) -> bool {
        self.ids
            .lock()
            .expect("subscription lock poisoned")
            .remove(terrain_id)
    }

    pub fn contains(&self, terrain_id: &str) -> bool {
        self.ids
            .lock()
            .expect("subscription lock poisoned")
            .contains(terrain_id)
    }

    /// Current membership in stable order, for replay after reconnect.
    pub fn snapshot(&self) -> Vec<String> {
        self.ids
            .lock()
            .expect("subscription lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().expect("subscription lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_subscribe_is_one_membership() {
        let set = SubscriptionSet::new();
        assert!(set.insert("t1"));
        assert!(!set.insert("t1"));
        assert_eq!(set.len(), 1);

        // One unsubscribe fully removes the id.
        assert!(set.remove("t1"));
        assert!(!set.contains("t1"));
        assert!(!set.remove("t1"));
    }

    #[test]
    fn snapshot_is_stable_ordered() {
        let set = SubscriptionSet::new();
        set.insert("t2");
        set.insert("t1");
        set.insert("t3");
        assert_eq!(set.snapshot(), vec!["t1", "t2", "t3"]);
    }
}

//! Reference-counted topic subscriptions.
//!
//! Several requesters may want the same topic; a topic stays active until
//! every one of them has let go. A topic name may carry an entity suffix
//! (`"riders_points.alice"`) to narrow it to one entity.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::constants::TOPIC_ENTITY_SEPARATOR;

/// Split `"topic.entity"` into its parts.
pub fn split_topic(name: &str) -> (&str, Option<&str>) {
    match name.split_once(TOPIC_ENTITY_SEPARATOR) {
        Some((topic, entity)) if !entity.is_empty() => (topic, Some(entity)),
        Some((topic, _)) => (topic, None),
        None => (name, None),
    }
}

/// Topic interest counts plus per-epoch pull tracking.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    counts: BTreeMap<String, u32>,
    pulled: BTreeSet<String>,
    epoch: u64,
}

impl SubscriptionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reference to `topic`.
    ///
    /// Returns `true` if the topic just became active.
    pub fn increment(&mut self, topic: &str) -> bool {
        let count = self.counts.entry(topic.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop one reference to `topic`; never goes below zero.
    ///
    /// Returns `true` if the topic just became inactive.
    pub fn decrement(&mut self, topic: &str) -> bool {
        match self.counts.get_mut(topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(topic);
                true
            }
            None => false,
        }
    }

    /// Reference count of `topic`.
    pub fn count(&self, topic: &str) -> u32 {
        self.counts.get(topic).copied().unwrap_or(0)
    }

    /// Whether `topic` has any references.
    pub fn is_active(&self, topic: &str) -> bool {
        self.count(topic) > 0
    }

    /// Topics with a positive count, sorted.
    pub fn active_topics(&self) -> BTreeSet<String> {
        self.counts.keys().cloned().collect()
    }

    /// Active topics not yet pulled in this epoch; marks them pulled.
    pub fn take_unfetched(&mut self) -> Vec<String> {
        let fresh: Vec<String> = self
            .counts
            .keys()
            .filter(|topic| !self.pulled.contains(*topic))
            .cloned()
            .collect();
        self.pulled.extend(fresh.iter().cloned());
        fresh
    }

    /// Start a new liveness epoch; every topic may be pulled again.
    pub fn new_epoch(&mut self) {
        self.pulled.clear();
        self.epoch += 1;
    }

    /// Current liveness epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_counting() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.increment("riders_points"));
        assert!(!registry.increment("riders_points"));
        assert_eq!(registry.count("riders_points"), 2);

        assert!(!registry.decrement("riders_points"));
        assert!(registry.is_active("riders_points"));
        assert!(registry.decrement("riders_points"));
        assert!(!registry.is_active("riders_points"));
    }

    #[test]
    fn test_never_negative() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.decrement("riders_points"));
        assert_eq!(registry.count("riders_points"), 0);
        assert!(registry.increment("riders_points"));
    }

    #[test]
    fn test_active_topics_sorted() {
        let mut registry = SubscriptionRegistry::new();
        registry.increment("riders_pre_post");
        registry.increment("riders_off_route");
        registry.increment("riders_points");
        registry.decrement("riders_off_route");
        let topics: Vec<_> = registry.active_topics().into_iter().collect();
        assert_eq!(topics, vec!["riders_points", "riders_pre_post"]);
    }

    #[test]
    fn test_pull_once_per_epoch() {
        let mut registry = SubscriptionRegistry::new();
        registry.increment("riders_points");
        assert_eq!(registry.take_unfetched(), vec!["riders_points"]);
        assert!(registry.take_unfetched().is_empty());

        registry.increment("riders_off_route");
        assert_eq!(registry.take_unfetched(), vec!["riders_off_route"]);

        registry.new_epoch();
        assert_eq!(registry.epoch(), 1);
        assert_eq!(
            registry.take_unfetched(),
            vec!["riders_off_route", "riders_points"]
        );
    }

    #[test]
    fn test_split_topic() {
        assert_eq!(split_topic("riders_points"), ("riders_points", None));
        assert_eq!(
            split_topic("riders_points.alice"),
            ("riders_points", Some("alice"))
        );
        assert_eq!(split_topic("riders_points."), ("riders_points", None));
    }
}

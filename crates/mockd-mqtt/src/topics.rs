//! Subscription table and retained-message store for one broker

use mockd_core::matching::mqtt::topic_matches;
use std::collections::HashMap;

/// A retained message: topic → latest retained publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedMessage {
    pub payload: Vec<u8>,
    pub qos: u8,
}

/// One client's subscription to a filter
#[derive(Debug, Clone)]
pub struct Subscription {
    pub client_id: String,
    pub qos: u8,
}

/// Subscriptions and retained messages, guarded by the broker's lock
#[derive(Debug, Default)]
pub struct TopicTree {
    /// filter → subscribers
    subscriptions: HashMap<String, Vec<Subscription>>,
    retained: HashMap<String, RetainedMessage>,
}

impl TopicTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, filter: &str, client_id: &str, qos: u8) {
        let subs = self.subscriptions.entry(filter.to_string()).or_default();
        match subs.iter_mut().find(|s| s.client_id == client_id) {
            Some(existing) => existing.qos = qos,
            None => subs.push(Subscription {
                client_id: client_id.to_string(),
                qos,
            }),
        }
    }

    pub fn unsubscribe(&mut self, filter: &str, client_id: &str) {
        if let Some(subs) = self.subscriptions.get_mut(filter) {
            subs.retain(|s| s.client_id != client_id);
            if subs.is_empty() {
                self.subscriptions.remove(filter);
            }
        }
    }

    /// Drop every subscription a client holds
    pub fn remove_client(&mut self, client_id: &str) {
        self.subscriptions.retain(|_, subs| {
            subs.retain(|s| s.client_id != client_id);
            !subs.is_empty()
        });
    }

    /// All subscribers whose filter matches a concrete topic, with the QoS
    /// their subscription grants
    pub fn subscribers_matching(&self, topic: &str) -> Vec<Subscription> {
        let mut matches = Vec::new();
        for (filter, subs) in &self.subscriptions {
            if topic_matches(filter, topic) {
                matches.extend(subs.iter().cloned());
            }
        }
        matches
    }

    /// Store a retained message; an empty payload clears the slot
    pub fn retain(&mut self, topic: &str, payload: &[u8], qos: u8) {
        if payload.is_empty() {
            self.retained.remove(topic);
        } else {
            self.retained.insert(
                topic.to_string(),
                RetainedMessage {
                    payload: payload.to_vec(),
                    qos,
                },
            );
        }
    }

    /// Retained messages a new subscription to `filter` must receive
    pub fn retained_for(&self, filter: &str) -> Vec<(String, RetainedMessage)> {
        self.retained
            .iter()
            .filter(|(topic, _)| topic_matches(filter, topic))
            .map(|(topic, message)| (topic.clone(), message.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retained_overwrite_and_clear() {
        let mut tree = TopicTree::new();
        tree.retain("devices/status", b"online", 1);
        tree.retain("devices/status", b"away", 0);
        assert_eq!(
            tree.retained_for("devices/#"),
            vec![(
                "devices/status".to_string(),
                RetainedMessage {
                    payload: b"away".to_vec(),
                    qos: 0
                }
            )]
        );
        // Zero-length retained publish clears
        tree.retain("devices/status", b"", 0);
        assert!(tree.retained_for("devices/#").is_empty());
    }

    #[test]
    fn subscriber_matching_honors_wildcards() {
        let mut tree = TopicTree::new();
        tree.subscribe("devices/+/status", "a", 1);
        tree.subscribe("devices/#", "b", 0);
        tree.subscribe("other", "c", 2);

        let subs = tree.subscribers_matching("devices/thermostat/status");
        let mut clients: Vec<&str> = subs.iter().map(|s| s.client_id.as_str()).collect();
        clients.sort();
        assert_eq!(clients, vec!["a", "b"]);
    }

    #[test]
    fn resubscribe_updates_qos() {
        let mut tree = TopicTree::new();
        tree.subscribe("t", "a", 0);
        tree.subscribe("t", "a", 2);
        let subs = tree.subscribers_matching("t");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].qos, 2);
    }

    #[test]
    fn remove_client_drops_all_subscriptions() {
        let mut tree = TopicTree::new();
        tree.subscribe("a/#", "gone", 0);
        tree.subscribe("b/#", "gone", 1);
        tree.subscribe("b/#", "stays", 1);
        tree.remove_client("gone");
        assert!(tree.subscribers_matching("a/x").is_empty());
        assert_eq!(tree.subscribers_matching("b/x").len(), 1);
    }
}

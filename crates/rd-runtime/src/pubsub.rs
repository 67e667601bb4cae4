//! Channel and pattern subscriptions plus message fan-out. Deliveries are
//! posted to per-client mailboxes as push frames; RESP2 connections render
//! them as plain arrays at the wire boundary.

use std::collections::HashMap;

use rd_protocol::RespFrame;
use rd_store::glob_match;

/// Subscriber lists kept in registration order, which fixes delivery order
/// for a single publish.
#[derive(Debug, Default)]
pub(crate) struct PubSubRegistry {
    channels: HashMap<Vec<u8>, Vec<u64>>,
    patterns: HashMap<Vec<u8>, Vec<u64>>,
    /// Shard channels are an independent namespace.
    shard_channels: HashMap<Vec<u8>, Vec<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    Channel,
    Pattern,
    Shard,
}

impl PubSubRegistry {
    fn table(&mut self, scope: Scope) -> &mut HashMap<Vec<u8>, Vec<u64>> {
        match scope {
            Scope::Channel => &mut self.channels,
            Scope::Pattern => &mut self.patterns,
            Scope::Shard => &mut self.shard_channels,
        }
    }

    /// Returns false when the client was already subscribed.
    pub(crate) fn subscribe(&mut self, scope: Scope, name: &[u8], client_id: u64) -> bool {
        let subscribers = self.table(scope).entry(name.to_vec()).or_default();
        if subscribers.contains(&client_id) {
            return false;
        }
        subscribers.push(client_id);
        true
    }

    pub(crate) fn unsubscribe(&mut self, scope: Scope, name: &[u8], client_id: u64) -> bool {
        let table = self.table(scope);
        let Some(subscribers) = table.get_mut(name) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|id| *id != client_id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            table.remove(name);
        }
        removed
    }

    pub(crate) fn remove_client(&mut self, client_id: u64) {
        for table in [&mut self.channels, &mut self.patterns, &mut self.shard_channels] {
            table.retain(|_, subscribers| {
                subscribers.retain(|id| *id != client_id);
                !subscribers.is_empty()
            });
        }
    }

    /// Deliveries for one publish: exact subscribers first, then pattern
    /// subscribers whose pattern matches, each in registration order.
    pub(crate) fn route_publish(
        &self,
        channel: &[u8],
        payload: &[u8],
    ) -> Vec<(u64, RespFrame)> {
        let mut out = Vec::new();
        if let Some(subscribers) = self.channels.get(channel) {
            for &client_id in subscribers {
                out.push((client_id, message_frame(channel, payload)));
            }
        }
        for (pattern, subscribers) in &self.patterns {
            if glob_match(pattern, channel) {
                for &client_id in subscribers {
                    out.push((client_id, pmessage_frame(pattern, channel, payload)));
                }
            }
        }
        out
    }

    pub(crate) fn route_spublish(
        &self,
        channel: &[u8],
        payload: &[u8],
    ) -> Vec<(u64, RespFrame)> {
        let mut out = Vec::new();
        if let Some(subscribers) = self.shard_channels.get(channel) {
            for &client_id in subscribers {
                out.push((client_id, smessage_frame(channel, payload)));
            }
        }
        out
    }

    /// Active (subscriber-holding) channels, optionally glob-filtered.
    pub(crate) fn channels_matching(&self, pattern: Option<&[u8]>) -> Vec<Vec<u8>> {
        let mut names: Vec<Vec<u8>> = self
            .channels
            .keys()
            .filter(|name| pattern.is_none_or(|p| glob_match(p, name)))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub(crate) fn shard_channels_matching(&self, pattern: Option<&[u8]>) -> Vec<Vec<u8>> {
        let mut names: Vec<Vec<u8>> = self
            .shard_channels
            .keys()
            .filter(|name| pattern.is_none_or(|p| glob_match(p, name)))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub(crate) fn subscriber_count(&self, channel: &[u8]) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }

    pub(crate) fn shard_subscriber_count(&self, channel: &[u8]) -> usize {
        self.shard_channels.get(channel).map_or(0, Vec::len)
    }

    pub(crate) fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

fn push(items: Vec<RespFrame>) -> RespFrame {
    RespFrame::Push(items)
}

pub(crate) fn message_frame(channel: &[u8], payload: &[u8]) -> RespFrame {
    push(vec![
        RespFrame::bulk(*b"message"),
        RespFrame::BulkString(Some(channel.to_vec())),
        RespFrame::BulkString(Some(payload.to_vec())),
    ])
}

fn pmessage_frame(pattern: &[u8], channel: &[u8], payload: &[u8]) -> RespFrame {
    push(vec![
        RespFrame::bulk(*b"pmessage"),
        RespFrame::BulkString(Some(pattern.to_vec())),
        RespFrame::BulkString(Some(channel.to_vec())),
        RespFrame::BulkString(Some(payload.to_vec())),
    ])
}

fn smessage_frame(channel: &[u8], payload: &[u8]) -> RespFrame {
    push(vec![
        RespFrame::bulk(*b"smessage"),
        RespFrame::BulkString(Some(channel.to_vec())),
        RespFrame::BulkString(Some(payload.to_vec())),
    ])
}

/// Acknowledgement frame for (un)subscribe commands: kind, name, and the
/// client's remaining subscription count.
pub(crate) fn subscription_ack(kind: &str, name: Option<&[u8]>, remaining: i64) -> RespFrame {
    push(vec![
        RespFrame::BulkString(Some(kind.as_bytes().to_vec())),
        RespFrame::BulkString(name.map(<[u8]>::to_vec)),
        RespFrame::Integer(remaining),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_routes_exact_then_patterns_in_registration_order() {
        let mut registry = PubSubRegistry::default();
        registry.subscribe(Scope::Channel, b"news", 1);
        registry.subscribe(Scope::Channel, b"news", 2);
        registry.subscribe(Scope::Pattern, b"n*", 3);
        let routed = registry.route_publish(b"news", b"hello");
        let ids: Vec<u64> = routed.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(routed[0].1, message_frame(b"news", b"hello"));
        assert_eq!(
            routed[2].1,
            pmessage_frame(b"n*", b"news", b"hello"),
        );
    }

    #[test]
    fn duplicate_subscription_is_ignored() {
        let mut registry = PubSubRegistry::default();
        assert!(registry.subscribe(Scope::Channel, b"c", 1));
        assert!(!registry.subscribe(Scope::Channel, b"c", 1));
        assert_eq!(registry.subscriber_count(b"c"), 1);
    }

    #[test]
    fn shard_channels_are_independent() {
        let mut registry = PubSubRegistry::default();
        registry.subscribe(Scope::Channel, b"c", 1);
        registry.subscribe(Scope::Shard, b"c", 2);
        let regular = registry.route_publish(b"c", b"x");
        assert_eq!(regular.len(), 1);
        assert_eq!(regular[0].0, 1);
        let sharded = registry.route_spublish(b"c", b"x");
        assert_eq!(sharded.len(), 1);
        assert_eq!(sharded[0].0, 2);
    }

    #[test]
    fn remove_client_clears_all_scopes() {
        let mut registry = PubSubRegistry::default();
        registry.subscribe(Scope::Channel, b"c", 1);
        registry.subscribe(Scope::Pattern, b"p*", 1);
        registry.subscribe(Scope::Shard, b"s", 1);
        registry.remove_client(1);
        assert!(registry.route_publish(b"c", b"x").is_empty());
        assert!(registry.route_spublish(b"s", b"x").is_empty());
        assert_eq!(registry.pattern_count(), 0);
        assert!(registry.channels_matching(None).is_empty());
    }

    #[test]
    fn pattern_matching_uses_glob_rules() {
        let mut registry = PubSubRegistry::default();
        registry.subscribe(Scope::Pattern, b"news.?", 7);
        assert_eq!(registry.route_publish(b"news.a", b"x").len(), 1);
        assert!(registry.route_publish(b"news.ab", b"x").is_empty());
    }
}

//! Outbox & History: per-peer ordered lists of pending sends
//! and last-seen messages, both session-only — never persisted.
//!
//! History ordering is sorted-by-timestamp with dedup by message id,
//! not bare insertion order, so replays and out-of-order arrivals
//! converge on the same sequence regardless of delivery path.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use wire::{Message, MessageType, UserId};

/// `{receiverId, plaintext, type, enqueuedAt}`.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub receiver_id: UserId,
    pub plaintext: String,
    pub message_type: MessageType,
    pub enqueued_at: i64,
}

/// Per-peer outbox and history maps, access serialized through a single
/// `RwLock` per map rather than a dedicated actor task — the access
/// pattern here is simple enough not to need one.
pub struct OutboxAndHistory {
    outbox: RwLock<HashMap<UserId, VecDeque<OutboxEntry>>>,
    history: RwLock<HashMap<UserId, Vec<Message>>>,
}

impl OutboxAndHistory {
    pub fn new() -> Self {
        OutboxAndHistory {
            outbox: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    /// `enqueueOutbox(peerId, entry)`: append.
    pub fn enqueue_outbox(&self, peer_id: UserId, entry: OutboxEntry) {
        self.outbox
            .write()
            .unwrap()
            .entry(peer_id)
            .or_default()
            .push_back(entry);
    }

    /// `drainOutbox(peerId) -> [entries]`: remove and return
    /// all entries, in enqueue order.
    pub fn drain_outbox(&self, peer_id: &UserId) -> Vec<OutboxEntry> {
        self.outbox
            .write()
            .unwrap()
            .get_mut(peer_id)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// `appendHistory(peerId, message)`: insert maintaining
    /// ascending-timestamp order, deduplicated by message id. Ties are
    /// broken by arrival order, i.e. a new message with a
    /// timestamp equal to an existing one is placed after it.
    pub fn append_history(&self, peer_id: UserId, message: Message) {
        let mut history = self.history.write().unwrap();
        let list = history.entry(peer_id).or_default();

        if list.iter().any(|m| m.id == message.id) {
            return;
        }

        let pos = list
            .iter()
            .position(|m| m.timestamp > message.timestamp)
            .unwrap_or(list.len());
        list.insert(pos, message);
    }

    /// `recent(peerId) -> [messages]`: snapshot copy.
    pub fn recent(&self, peer_id: &UserId) -> Vec<Message> {
        self.history
            .read()
            .unwrap()
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// `clearPeer(peerId)`: drop history and outbox for one
    /// peer (directory's online flag is dropped separately by
    /// `PeerDirectory::clear_peer`).
    pub fn clear_peer(&self, peer_id: &UserId) {
        self.outbox.write().unwrap().remove(peer_id);
        self.history.write().unwrap().remove(peer_id);
    }

    /// Drops every peer's outbox and history. Used by an ephemeral
    /// identity reset.
    pub fn clear_all(&self) {
        self.outbox.write().unwrap().clear();
        self.history.write().unwrap().clear();
    }
}

impl Default for OutboxAndHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(n: u8) -> UserId {
        UserId::derive(&[n; 32])
    }

    fn msg(id: &str, ts: i64) -> Message {
        Message {
            id: id.to_string(),
            sender_id: user(1),
            receiver_id: user(2),
            plaintext: "x".to_string(),
            timestamp: ts,
            kind: MessageType::Text,
            status: wire::MessageStatus::Delivered,
            encrypted: true,
        }
    }

    #[test]
    fn drain_outbox_preserves_enqueue_order() {
        let store = OutboxAndHistory::new();
        let peer = user(5);
        for i in 0..3 {
            store.enqueue_outbox(
                peer.clone(),
                OutboxEntry {
                    receiver_id: peer.clone(),
                    plaintext: format!("m{i}"),
                    message_type: MessageType::Text,
                    enqueued_at: i as i64,
                },
            );
        }
        let drained = store.drain_outbox(&peer);
        assert_eq!(
            drained.iter().map(|e| e.plaintext.clone()).collect::<Vec<_>>(),
            vec!["m0", "m1", "m2"]
        );
        assert!(store.drain_outbox(&peer).is_empty());
    }

    #[test]
    fn history_stays_sorted_and_dedups_by_id() {
        let store = OutboxAndHistory::new();
        let peer = user(7);
        store.append_history(peer.clone(), msg("a", 100));
        store.append_history(peer.clone(), msg("b", 50));
        store.append_history(peer.clone(), msg("c", 75));
        store.append_history(peer.clone(), msg("a", 999)); // dup id, ignored

        let history = store.recent(&peer);
        let ids: Vec<_> = history.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        let timestamps: Vec<_> = history.iter().map(|m| m.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn clear_peer_drops_both_outbox_and_history() {
        let store = OutboxAndHistory::new();
        let peer = user(3);
        store.append_history(peer.clone(), msg("a", 1));
        store.enqueue_outbox(
            peer.clone(),
            OutboxEntry {
                receiver_id: peer.clone(),
                plaintext: "x".to_string(),
                message_type: MessageType::Text,
                enqueued_at: 1,
            },
        );
        store.clear_peer(&peer);
        assert!(store.recent(&peer).is_empty());
        assert!(store.drain_outbox(&peer).is_empty());
    }
}

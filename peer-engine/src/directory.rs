//! Peer Directory: in-memory cache of peer public keys and
//! online flags, primed by the hub's user-list frames.
//!
//! One map holds both keys and online status rather than splitting
//! online membership into a separately-tracked set, so the two can never
//! drift out of agreement.

use std::collections::HashMap;
use std::sync::RwLock;
use wire::UserId;

/// One peer's cached identity material and presence.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub user_id: UserId,
    pub nickname: Option<String>,
    pub signing_pub: Option<[u8; 32]>,
    pub agreement_pub: Option<[u8; 32]>,
    pub online: bool,
    pub last_seen: Option<i64>,
}

impl PeerRecord {
    fn new(user_id: UserId) -> Self {
        PeerRecord {
            user_id,
            nickname: None,
            signing_pub: None,
            agreement_pub: None,
            online: false,
            last_seen: None,
        }
    }

    pub fn has_keys(&self) -> bool {
        self.signing_pub.is_some() && self.agreement_pub.is_some()
    }
}

/// One user summary as carried on the wire (decoded base64 keys), used to
/// upsert directory entries from `users_list`/`register_success` frames.
pub struct PeerUpdate {
    pub user_id: UserId,
    pub nickname: Option<String>,
    pub signing_pub: Option<[u8; 32]>,
    pub agreement_pub: Option<[u8; 32]>,
    pub online: bool,
    pub last_seen: Option<i64>,
}

pub struct PeerDirectory {
    peers: RwLock<HashMap<UserId, PeerRecord>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        PeerDirectory {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// `mergeUserList(list)`: the hub's list is authoritative
    /// for who is online. Upserts keys for every entry, replaces the
    /// online set wholesale, and returns the set of user ids whose
    /// `online` flag actually changed (for emitting per-user events).
    pub fn merge_user_list(&self, updates: Vec<PeerUpdate>) -> Vec<UserId> {
        let mut peers = self.peers.write().unwrap();
        let mut changed = Vec::new();
        let incoming: HashMap<UserId, bool> =
            updates.iter().map(|u| (u.user_id.clone(), u.online)).collect();

        for update in updates {
            let entry = peers
                .entry(update.user_id.clone())
                .or_insert_with(|| PeerRecord::new(update.user_id.clone()));
            let was_online = entry.online;
            if update.nickname.is_some() {
                entry.nickname = update.nickname;
            }
            if update.signing_pub.is_some() {
                entry.signing_pub = update.signing_pub;
            }
            if update.agreement_pub.is_some() {
                entry.agreement_pub = update.agreement_pub;
            }
            entry.online = update.online;
            entry.last_seen = update.last_seen.or(entry.last_seen);
            if was_online != entry.online {
                changed.push(entry.user_id.clone());
            }
        }

        // Any peer previously known but absent from this authoritative
        // list is implicitly offline.
        for (id, record) in peers.iter_mut() {
            if !incoming.contains_key(id) && record.online {
                record.online = false;
                changed.push(id.clone());
            }
        }

        changed
    }

    /// `mergeStatus({userId, online})`: updates one entry,
    /// returns true iff the flag actually changed.
    pub fn merge_status(&self, user_id: &UserId, online: bool) -> bool {
        let mut peers = self.peers.write().unwrap();
        let entry = peers
            .entry(user_id.clone())
            .or_insert_with(|| PeerRecord::new(user_id.clone()));
        let changed = entry.online != online;
        entry.online = online;
        changed
    }

    pub fn get(&self, user_id: &UserId) -> Option<PeerRecord> {
        self.peers.read().unwrap().get(user_id).cloned()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.peers
            .read()
            .unwrap()
            .get(user_id)
            .map(|p| p.online)
            .unwrap_or(false)
    }

    pub fn has_keys(&self, user_id: &UserId) -> bool {
        self.peers
            .read()
            .unwrap()
            .get(user_id)
            .map(|p| p.has_keys())
            .unwrap_or(false)
    }

    /// `clearPeer(peerId)`: drops the directory's online flag
    /// for this peer. History/outbox are cleared by their own owner.
    pub fn clear_peer(&self, user_id: &UserId) {
        self.peers.write().unwrap().remove(user_id);
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.read().unwrap().values().cloned().collect()
    }

    /// Drops every cached peer. Used by an ephemeral identity reset,
    /// where all prior history/outbox is dropped too.
    pub fn clear_all(&self) {
        self.peers.write().unwrap().clear();
    }
}

impl Default for PeerDirectory {
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

    #[test]
    fn merge_user_list_replaces_online_set_and_reports_changes() {
        let dir = PeerDirectory::new();
        let a = user(1);
        let b = user(2);

        let changed = dir.merge_user_list(vec![
            PeerUpdate {
                user_id: a.clone(),
                nickname: None,
                signing_pub: Some([1; 32]),
                agreement_pub: Some([2; 32]),
                online: true,
                last_seen: None,
            },
            PeerUpdate {
                user_id: b.clone(),
                nickname: None,
                signing_pub: Some([3; 32]),
                agreement_pub: Some([4; 32]),
                online: false,
                last_seen: None,
            },
        ]);
        assert_eq!(changed.len(), 1);
        assert!(dir.is_online(&a));
        assert!(!dir.is_online(&b));

        // Second list omits `a` entirely; it must be treated as offline.
        let changed2 = dir.merge_user_list(vec![PeerUpdate {
            user_id: b.clone(),
            nickname: None,
            signing_pub: None,
            agreement_pub: None,
            online: true,
            last_seen: None,
        }]);
        assert!(changed2.contains(&a));
        assert!(changed2.contains(&b));
        assert!(!dir.is_online(&a));
        assert!(dir.is_online(&b));
    }

    #[test]
    fn merge_status_updates_single_entry() {
        let dir = PeerDirectory::new();
        let a = user(9);
        assert!(dir.merge_status(&a, true));
        assert!(dir.is_online(&a));
        assert!(!dir.merge_status(&a, true));
        assert!(dir.merge_status(&a, false));
        assert!(!dir.is_online(&a));
    }

    #[test]
    fn has_keys_reflects_both_fields_present() {
        let dir = PeerDirectory::new();
        let a = user(3);
        dir.merge_user_list(vec![PeerUpdate {
            user_id: a.clone(),
            nickname: None,
            signing_pub: Some([1; 32]),
            agreement_pub: None,
            online: true,
            last_seen: None,
        }]);
        assert!(!dir.has_keys(&a));
    }
}

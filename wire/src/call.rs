use crate::user_id::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initiated,
    Connected,
    Ended,
}

/// Server-owned call-signaling record. Opaque to clients except
/// for `id`; purged 60s after transitioning to `Ended`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub state: CallState,
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

impl Call {
    pub fn new(id: String, caller_id: UserId, callee_id: UserId, started_at: i64) -> Self {
        Call {
            id,
            caller_id,
            callee_id,
            state: CallState::Initiated,
            started_at,
            ended_at: None,
        }
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        &self.caller_id == user || &self.callee_id == user
    }

    pub fn other_participant(&self, user: &UserId) -> Option<&UserId> {
        if &self.caller_id == user {
            Some(&self.callee_id)
        } else if &self.callee_id == user {
            Some(&self.caller_id)
        } else {
            None
        }
    }
}

use crate::user_id::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

/// A message as held by the peer engine. `timestamp` is
/// milliseconds since the Unix epoch; history is ordered by this field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub plaintext: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub status: MessageStatus,
    pub encrypted: bool,
}

impl Message {
    pub fn local_id(timestamp_ms: i64) -> String {
        format!("local-{timestamp_ms}")
    }
}

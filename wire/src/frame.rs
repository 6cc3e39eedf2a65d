use crate::message::{Message, MessageType};
use crate::user_id::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Presence summary of one user, as carried in `users_list` and
/// `register_success`/`add_to_chat_success`. Carries both public keys,
/// base64-encoded like every other binary field at this boundary, so the
/// receiving side's peer directory can populate a record without a second
/// round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    #[serde(rename = "signingPubKey")]
    pub signing_pub_key: String,
    #[serde(rename = "agreementPubKey")]
    pub agreement_pub_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

/// Every frame the hub and peer engine exchange. Exactly one
/// mandatory `type` tag per frame, carried as the serde enum tag; binary
/// fields are base64 strings at this boundary, matching the tagged-enum
/// wire style used elsewhere in this workspace.
///
/// A handful of call-signaling variants are genuinely bidirectional on the
/// wire (the hub forwards a `call_candidate`/`call_end`/`call_restart*`
/// frame under the same `type` string it received, only swapping `to` for
/// `from`) — those carry both fields as `Option` and `peer()` picks
/// whichever side is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    // ---- client -> hub ----
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "publicSigningKey")]
        public_signing_key: String,
        #[serde(rename = "publicEncryptionKey")]
        public_encryption_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    },
    #[serde(rename = "auth")]
    Auth {
        #[serde(rename = "userId")]
        user_id: UserId,
        signature: String,
        timestamp: String,
    },
    #[serde(rename = "send_message")]
    SendMessage {
        #[serde(rename = "receiverId")]
        receiver_id: UserId,
        #[serde(rename = "encryptedContent")]
        encrypted_content: Value,
        #[serde(rename = "messageType")]
        message_type: MessageType,
        signature: String,
        timestamp: String,
    },
    #[serde(rename = "get_history")]
    GetHistory {
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "otherUserId")]
        other_user_id: UserId,
        limit: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        before: Option<i64>,
    },
    #[serde(rename = "mark_read")]
    MarkRead {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    #[serde(rename = "get_users")]
    GetUsers {},
    #[serde(rename = "add_to_chat")]
    AddToChat {
        target_user_id: UserId,
    },
    #[serde(rename = "call_initiate")]
    CallInitiate {
        to: UserId,
        offer: String,
        call_id: String,
    },
    #[serde(rename = "call_accept")]
    CallAccept {
        to: UserId,
        answer: String,
        call_id: String,
    },
    #[serde(rename = "call_candidate")]
    CallCandidate {
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<UserId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<UserId>,
        candidate: String,
        call_id: String,
    },
    #[serde(rename = "call_end")]
    CallEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<UserId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<UserId>,
        call_id: String,
    },
    #[serde(rename = "call_restart")]
    CallRestart {
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<UserId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<UserId>,
        offer: String,
        call_id: String,
    },
    #[serde(rename = "call_restart_answer")]
    CallRestartAnswer {
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<UserId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<UserId>,
        answer: String,
        call_id: String,
    },
    #[serde(rename = "ping")]
    Ping {},

    // ---- hub -> client ----
    #[serde(rename = "register_success")]
    RegisterSuccess {
        #[serde(rename = "userId")]
        user_id: UserId,
        user: UserSummary,
    },
    #[serde(rename = "auth_success")]
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: UserId,
        success: bool,
    },
    #[serde(rename = "new_message")]
    NewMessage { message: Message },
    #[serde(rename = "message_sent")]
    MessageSent { message: Message },
    #[serde(rename = "message_history")]
    MessageHistory {
        messages: Vec<Message>,
        #[serde(rename = "otherUserId")]
        other_user_id: UserId,
    },
    #[serde(rename = "message_marked_read")]
    MessageMarkedRead {
        #[serde(rename = "messageId")]
        message_id: String,
        success: bool,
    },
    #[serde(rename = "users_list")]
    UsersList { users: Vec<UserSummary> },
    #[serde(rename = "user_status_update")]
    UserStatusUpdate {
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "isOnline")]
        is_online: bool,
    },
    #[serde(rename = "chat_added")]
    ChatAdded {
        user_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    },
    #[serde(rename = "add_to_chat_success")]
    AddToChatSuccess { target_user: UserSummary },
    #[serde(rename = "call_offer")]
    CallOffer {
        from: UserId,
        offer: String,
        call_id: String,
    },
    #[serde(rename = "call_answer")]
    CallAnswer {
        from: UserId,
        answer: String,
        call_id: String,
    },
    #[serde(rename = "pong")]
    Pong {},
    #[serde(rename = "error")]
    Error { message: String },
}

impl Frame {
    /// The `type` discriminant string, as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Register { .. } => "register",
            Frame::Auth { .. } => "auth",
            Frame::SendMessage { .. } => "send_message",
            Frame::GetHistory { .. } => "get_history",
            Frame::MarkRead { .. } => "mark_read",
            Frame::GetUsers {} => "get_users",
            Frame::AddToChat { .. } => "add_to_chat",
            Frame::CallInitiate { .. } => "call_initiate",
            Frame::CallAccept { .. } => "call_accept",
            Frame::CallCandidate { .. } => "call_candidate",
            Frame::CallEnd { .. } => "call_end",
            Frame::CallRestart { .. } => "call_restart",
            Frame::CallRestartAnswer { .. } => "call_restart_answer",
            Frame::Ping {} => "ping",
            Frame::RegisterSuccess { .. } => "register_success",
            Frame::AuthSuccess { .. } => "auth_success",
            Frame::NewMessage { .. } => "new_message",
            Frame::MessageSent { .. } => "message_sent",
            Frame::MessageHistory { .. } => "message_history",
            Frame::MessageMarkedRead { .. } => "message_marked_read",
            Frame::UsersList { .. } => "users_list",
            Frame::UserStatusUpdate { .. } => "user_status_update",
            Frame::ChatAdded { .. } => "chat_added",
            Frame::AddToChatSuccess { .. } => "add_to_chat_success",
            Frame::CallOffer { .. } => "call_offer",
            Frame::CallAnswer { .. } => "call_answer",
            Frame::Pong {} => "pong",
            Frame::Error { .. } => "error",
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("frame always serializes")
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips() {
        let frame = Frame::Ping {};
        let text = frame.encode();
        assert_eq!(text, r#"{"type":"ping"}"#);
        let back = Frame::decode(&text).unwrap();
        assert_eq!(back.type_name(), "ping");
    }

    #[test]
    fn call_candidate_accepts_either_direction() {
        let to_frame = Frame::decode(
            r#"{"type":"call_candidate","to":"ABCD1234ABCD1234","candidate":"c","call_id":"C1"}"#,
        )
        .unwrap();
        let from_frame = Frame::decode(
            r#"{"type":"call_candidate","from":"ABCD1234ABCD1234","candidate":"c","call_id":"C1"}"#,
        )
        .unwrap();
        assert_eq!(to_frame.type_name(), "call_candidate");
        assert_eq!(from_frame.type_name(), "call_candidate");
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        assert!(Frame::decode(r#"{"type":"unknown_thing"}"#).is_err());
    }
}

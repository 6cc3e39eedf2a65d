//! Hub client protocol: encodes/decodes wire frames and drives
//! the register/auth/send/receive/history/presence/call-signaling flows on
//! top of the connection manager.
//!
//! One request/response API wires the crypto engine, peer directory, and
//! outbox/history store together as plain async methods with no UI
//! binding. The plaintext-fallback send path and the "don't echo our own
//! undecryptable ciphertext" receive guard are both explicit, deliberate
//! behaviors, not omissions.
//!
//! Wire-payload convention (recorded in DESIGN.md): `Message.plaintext`
//! carries the *undecrypted* wire payload until this module's receive
//! pipeline replaces it in place — either the JSON-serialized ciphertext
//! envelope (when `encrypted == true`) or the literal fallback string
//! (when `encrypted == false`). The hub never inspects or decrypts it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use wire::{Envelope, Frame, Message, MessageStatus, MessageType, UserId, UserSummary};

use crate::connection::ConnectionManager;
use crate::crypto::CryptoEngine;
use crate::directory::{PeerDirectory, PeerUpdate};
use crate::error::{AuthError, EngineError, ProtocolError, RegistrationError};
use crate::identity::Identity;
use crate::outbox::{OutboxAndHistory, OutboxEntry};

const EVENT_CAPACITY: usize = 256;

/// Events the protocol layer emits for local listeners: a decrypted
/// message appended to history, a peer's online status changing, or an
/// opaque call-signaling frame relayed through unmodified.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Message(Message),
    Presence { user_id: UserId, online: bool },
    CallSignal(Frame),
    Error(String),
}

pub struct HubProtocol {
    connection: Arc<ConnectionManager>,
    identity: Identity,
    directory: Arc<PeerDirectory>,
    store: Arc<OutboxAndHistory>,
    events: broadcast::Sender<PeerEvent>,
    user_id: RwLock<Option<UserId>>,
}

impl HubProtocol {
    pub fn new(
        connection: Arc<ConnectionManager>,
        identity: Identity,
        directory: Arc<PeerDirectory>,
        store: Arc<OutboxAndHistory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let user_id = RwLock::new(Some(identity.user_id.clone()));
        HubProtocol {
            connection,
            identity,
            directory,
            store,
            events,
            user_id,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    pub async fn current_user_id(&self) -> Option<UserId> {
        self.user_id.read().await.clone()
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    /// Drives the dispatch loop for as long as the connection lives.
    /// Intended to be spawned once by the engine facade.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.connection.subscribe();
        loop {
            match rx.recv().await {
                Ok(frame) => self.handle_inbound(frame).await,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    // ---- Register ----

    pub async fn register(&self, nickname: Option<String>) -> Result<UserId, RegistrationError> {
        let frame = Frame::Register {
            public_signing_key: BASE64.encode(self.identity.signing_public().as_bytes()),
            public_encryption_key: BASE64.encode(self.identity.agreement_public().as_bytes()),
            nickname,
        };
        let reply = self
            .connection
            .request_registration(frame, "register_success")
            .await
            .ok_or(RegistrationError::TimedOut)?;

        match reply {
            Frame::RegisterSuccess { user_id, .. } => {
                *self.user_id.write().await = Some(user_id.clone());
                Ok(user_id)
            }
            Frame::Error { message } => Err(RegistrationError::Rejected(message)),
            _ => Err(RegistrationError::Rejected("unexpected reply".to_string())),
        }
    }

    // ---- Authenticate ----

    pub async fn authenticate(&self) -> Result<(), AuthError> {
        let timestamp = Utc::now().to_rfc3339();
        let signature = self
            .identity_sign(timestamp.as_bytes())
            .map_err(|_| AuthError::NoIdentity)?;

        let frame = Frame::Auth {
            user_id: self.identity.user_id.clone(),
            signature: BASE64.encode(signature),
            timestamp,
        };
        let reply = self
            .connection
            .request_default(frame, "auth_success")
            .await
            .ok_or(AuthError::TimedOut)?;

        match reply {
            Frame::AuthSuccess { success: true, .. } => Ok(()),
            // The identity (and its userId) is preserved on failure;
            // callers may reset explicitly via `reset_session`.
            _ => Err(AuthError::Rejected),
        }
    }

    fn identity_sign(&self, bytes: &[u8]) -> Result<[u8; 64], EngineError> {
        let engine = CryptoEngine::new(&self.identity);
        Ok(engine.sign(bytes)?)
    }

    // ---- Send ----

    pub async fn send(
        &self,
        receiver_id: UserId,
        plaintext: String,
        message_type: MessageType,
    ) -> Result<Message, EngineError> {
        let now_ms = Utc::now().timestamp_millis();
        let local = Message {
            id: Message::local_id(now_ms),
            sender_id: self.identity.user_id.clone(),
            receiver_id: receiver_id.clone(),
            plaintext: plaintext.clone(),
            timestamp: now_ms,
            kind: message_type,
            status: MessageStatus::Sending,
            encrypted: true,
        };
        self.store.append_history(receiver_id.clone(), local.clone());
        self.emit(PeerEvent::Message(local.clone()));

        if !self.directory.is_online(&receiver_id) {
            self.store.enqueue_outbox(
                receiver_id,
                OutboxEntry {
                    receiver_id: local.receiver_id.clone(),
                    plaintext,
                    message_type,
                    enqueued_at: now_ms,
                },
            );
            return Ok(local);
        }

        self.send_over_wire(&receiver_id, &plaintext, message_type, now_ms).await?;
        Ok(local)
    }

    async fn send_over_wire(
        &self,
        receiver_id: &UserId,
        plaintext: &str,
        message_type: MessageType,
        timestamp_ms: i64,
    ) -> Result<(), EngineError> {
        let has_keys = self.ensure_keys_for(receiver_id).await;
        let engine = CryptoEngine::new(&self.identity);
        let timestamp = millis_to_rfc3339(timestamp_ms);

        let (encrypted_content, signature) = if has_keys {
            let peer = self
                .directory
                .get(receiver_id)
                .ok_or_else(|| ProtocolError("peer vanished after key refresh".to_string()))?;
            let agreement_pub = peer
                .agreement_pub
                .ok_or_else(|| ProtocolError("missing agreement key".to_string()))?;
            let envelope = engine.encrypt(plaintext.as_bytes(), &agreement_pub)?;
            let content = envelope.to_wire_json();
            let signature = BASE64.encode(envelope.sig);
            (content, signature)
        } else {
            // Plaintext fallback: deliberate degradation when
            // the peer's keys never arrive.
            let signature = BASE64.encode(engine.sign(plaintext.as_bytes())?);
            (Value::String(plaintext.to_string()), signature)
        };

        let frame = Frame::SendMessage {
            receiver_id: receiver_id.clone(),
            encrypted_content,
            message_type,
            signature,
            timestamp,
        };
        let _ = self
            .connection
            .request_default(frame, "message_sent")
            .await;
        Ok(())
    }

    /// `ensureKeysFor(userId)`: returns cached keys or issues
    /// `get_users` and blocks until the reply lands.
    pub async fn ensure_keys_for(&self, peer_id: &UserId) -> bool {
        if self.directory.has_keys(peer_id) {
            return true;
        }
        let _ = self.get_users().await;
        self.directory.has_keys(peer_id)
    }

    // ---- Presence ----

    pub async fn get_users(&self) -> Result<(), EngineError> {
        let reply = self
            .connection
            .request_default(Frame::GetUsers {}, "users_list")
            .await
            .ok_or_else(|| ProtocolError("get_users timed out".to_string()))?;
        if let Frame::UsersList { users } = reply {
            self.apply_users_list(users).await;
        }
        Ok(())
    }

    async fn apply_users_list(&self, users: Vec<UserSummary>) {
        let updates = users
            .into_iter()
            .filter_map(decode_user_summary)
            .collect();
        let changed = self.directory.merge_user_list(updates);
        for user_id in changed {
            let online = self.directory.is_online(&user_id);
            self.on_presence_change(user_id, online).await;
        }
    }

    /// Outbox-drain policy: a peer transitioning offline ->
    /// online automatically drains its outbox, re-sending each entry with
    /// its original `enqueued_at` timestamp, in enqueue order.
    async fn on_presence_change(&self, user_id: UserId, online: bool) {
        self.emit(PeerEvent::Presence {
            user_id: user_id.clone(),
            online,
        });
        if !online {
            return;
        }
        let drained = self.store.drain_outbox(&user_id);
        for entry in drained {
            // Best-effort: a failed send here surfaces as a dropped frame
            // rather than an error the caller observes, matching the
            // fire-and-forget nature of a background drain.
            let _ = self
                .send_over_wire(&user_id, &entry.plaintext, entry.message_type, entry.enqueued_at)
                .await;
        }
    }

    // ---- History ----

    pub async fn get_history(
        &self,
        other_user_id: UserId,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<Message>, EngineError> {
        let frame = Frame::GetHistory {
            user_id: self.identity.user_id.clone(),
            other_user_id: other_user_id.clone(),
            limit,
            before,
        };
        let reply = self
            .connection
            .request_default(frame, "message_history")
            .await
            .ok_or_else(|| ProtocolError("get_history timed out".to_string()))?;

        if let Frame::MessageHistory { messages, .. } = reply {
            for message in messages {
                self.ingest_message(message);
            }
        }
        Ok(self.store.recent(&other_user_id))
    }

    // ---- Call signaling (opaque to this crate) ----

    pub fn call_initiate(&self, to: UserId, offer: String, call_id: String) {
        self.connection.send(Frame::CallInitiate { to, offer, call_id });
    }

    pub fn call_accept(&self, to: UserId, answer: String, call_id: String) {
        self.connection.send(Frame::CallAccept { to, answer, call_id });
    }

    pub fn call_candidate(&self, to: UserId, candidate: String, call_id: String) {
        self.connection.send(Frame::CallCandidate {
            to: Some(to),
            from: None,
            candidate,
            call_id,
        });
    }

    pub fn call_end(&self, to: UserId, call_id: String) {
        self.connection.send(Frame::CallEnd {
            to: Some(to),
            from: None,
            call_id,
        });
    }

    pub fn call_restart(&self, to: UserId, offer: String, call_id: String) {
        self.connection.send(Frame::CallRestart {
            to: Some(to),
            from: None,
            offer,
            call_id,
        });
    }

    pub fn call_restart_answer(&self, to: UserId, answer: String, call_id: String) {
        self.connection.send(Frame::CallRestartAnswer {
            to: Some(to),
            from: None,
            answer,
            call_id,
        });
    }

    // ---- Receive / dispatch ----

    async fn handle_inbound(&self, frame: Frame) {
        match frame {
            Frame::NewMessage { message } | Frame::MessageSent { message } => {
                self.ingest_message(message);
            }
            Frame::MessageHistory { messages, .. } => {
                for message in messages {
                    self.ingest_message(message);
                }
            }
            Frame::UsersList { users } => self.apply_users_list(users).await,
            Frame::UserStatusUpdate { user_id, is_online } => {
                if self.directory.merge_status(&user_id, is_online) {
                    self.on_presence_change(user_id, is_online).await;
                }
            }
            Frame::ChatAdded { .. } | Frame::AddToChatSuccess { .. } => {
                // No directory-shape change beyond what `get_users` already
                // covers; surfaced to callers only as a presence nudge is
                // unnecessary since the hub follows up with its own
                // `user_status_update`/`users_list` frames.
            }
            call_frame @ (Frame::CallOffer { .. }
            | Frame::CallAnswer { .. }
            | Frame::CallCandidate { .. }
            | Frame::CallEnd { .. }
            | Frame::CallRestart { .. }
            | Frame::CallRestartAnswer { .. }) => {
                self.emit(PeerEvent::CallSignal(call_frame));
            }
            Frame::Error { message } => self.emit(PeerEvent::Error(message)),
            // `ping`/`pong`/`register`/`auth`/etc. are either outbound-only
            // from this side or already consumed by `request()` waiters.
            _ => {}
        }
    }

    /// Runs one wire message through the decrypt pipeline, mutates it in
    /// place, and appends it to history.
    fn ingest_message(&self, mut message: Message) {
        let is_self = message.sender_id == self.identity.user_id;

        if is_self {
            // Never echo our own undecryptable ciphertext into
            // history. We structurally cannot decrypt our own outgoing
            // envelope (it was sealed under shared_secret(us, receiver),
            // not shared_secret(us, us)), so this path always discards.
            if message.encrypted && looks_like_envelope(&message.plaintext) {
                return;
            }
        }

        if message.encrypted {
            match self.try_decrypt(&message) {
                Some(plaintext) => {
                    message.plaintext = plaintext;
                    message.encrypted = true;
                }
                None => {
                    // IntegrityError: discard and log, never
                    // surfaced to history.
                    tracing::warn!(
                        message_id = %message.id,
                        "discarding message: signature/MAC verification failed"
                    );
                    return;
                }
            }
        }
        // `encrypted == false`: accept the plain string as-is.

        let peer_bucket = if is_self {
            message.receiver_id.clone()
        } else {
            message.sender_id.clone()
        };
        self.store.append_history(peer_bucket, message.clone());
        self.emit(PeerEvent::Message(message));
    }

    fn try_decrypt(&self, message: &Message) -> Option<String> {
        let envelope_json: Value = serde_json::from_str(&message.plaintext).ok()?;
        let envelope = Envelope::from_wire_json(&envelope_json).ok()?;
        let sender = self.directory.get(&message.sender_id)?;
        let agreement_pub = sender.agreement_pub?;
        let signing_pub = sender.signing_pub?;

        let engine = CryptoEngine::new(&self.identity);
        let plaintext = engine
            .decrypt(&envelope, &agreement_pub, &signing_pub)
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}

/// Converts an outbox entry's `enqueued_at` (epoch millis) back to the
/// RFC-3339 string the wire frame carries, so a drained send keeps its
/// original timestamp instead of being stamped with the drain time.
fn millis_to_rfc3339(timestamp_ms: i64) -> String {
    chrono::DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| Utc::now().to_rfc3339())
}

fn looks_like_envelope(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .map(|v| v.is_object())
        .unwrap_or(false)
}

fn decode_user_summary(summary: UserSummary) -> Option<PeerUpdate> {
    let signing_pub = decode_key(&summary.signing_pub_key);
    let agreement_pub = decode_key(&summary.agreement_pub_key);
    Some(PeerUpdate {
        user_id: summary.id,
        nickname: summary.nickname,
        signing_pub,
        agreement_pub,
        online: summary.online,
        last_seen: summary.last_seen,
    })
}

fn decode_key(b64: &str) -> Option<[u8; 32]> {
    BASE64.decode(b64).ok()?.try_into().ok()
}

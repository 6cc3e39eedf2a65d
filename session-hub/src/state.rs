//! Session Hub state: the authoritative `users`, `socketByUser`, and
//! `calls` tables, owned by exactly one actor task and accessed through
//! a command mailbox — every handler here awaits a socket send, so
//! holding a lock across that await would be a deadlock risk; the
//! mailbox sidesteps it entirely.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};
use wire::{Call, CallState, Message, MessageStatus, MessageType, UserId, UserSummary};

const AUTH_FRESHNESS_SECS: i64 = 5 * 60;
const CALL_PURGE_DELAY_SECS: u64 = 60;

/// Server-side record of one known user.
#[derive(Debug, Clone)]
pub struct HubUser {
    pub id: UserId,
    pub signing_pub: [u8; 32],
    pub agreement_pub: [u8; 32],
    pub nickname: Option<String>,
    pub online: bool,
    pub last_seen: i64,
}

impl HubUser {
    fn to_summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            signing_pub_key: BASE64.encode(self.signing_pub),
            agreement_pub_key: BASE64.encode(self.agreement_pub),
            nickname: self.nickname.clone(),
            online: self.online,
            last_seen: Some(self.last_seen),
        }
    }
}

pub type Outcome<T> = Result<T, String>;

/// Requests the router sends into the hub actor's mailbox.
pub enum Command {
    Register {
        signing_pub: [u8; 32],
        agreement_pub: [u8; 32],
        nickname: Option<String>,
        reply: oneshot::Sender<Outcome<(UserId, UserSummary)>>,
    },
    Authenticate {
        user_id: UserId,
        signature: [u8; 64],
        timestamp: String,
        channel: mpsc::UnboundedSender<wire::Frame>,
        reply: oneshot::Sender<Outcome<()>>,
    },
    GetUsers {
        caller: UserId,
        reply: oneshot::Sender<Vec<UserSummary>>,
    },
    SendMessage {
        sender_id: UserId,
        receiver_id: UserId,
        encrypted_content: Value,
        message_type: MessageType,
        reply: oneshot::Sender<Message>,
    },
    MarkRead {
        message_id: String,
        reply: oneshot::Sender<bool>,
    },
    AddToChat {
        caller: UserId,
        target: UserId,
        reply: oneshot::Sender<Outcome<UserSummary>>,
    },
    CallInitiate {
        caller: UserId,
        to: UserId,
        offer: String,
        call_id: String,
        reply: oneshot::Sender<Outcome<()>>,
    },
    CallAccept {
        callee: UserId,
        to: UserId,
        answer: String,
        call_id: String,
        reply: oneshot::Sender<Outcome<()>>,
    },
    CallCandidate {
        from: UserId,
        to: UserId,
        candidate: String,
        call_id: String,
    },
    CallEnd {
        from: UserId,
        to: UserId,
        call_id: String,
    },
    CallRestart {
        from: UserId,
        to: UserId,
        offer: String,
        call_id: String,
    },
    CallRestartAnswer {
        from: UserId,
        to: UserId,
        answer: String,
        call_id: String,
    },
    PurgeCall {
        call_id: String,
    },
    Disconnect {
        user_id: UserId,
    },
}

/// Cloneable mailbox handle; the actor itself lives on its own task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl HubHandle {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = HubHandle { tx: tx.clone() };
        tokio::spawn(run_actor(rx, handle.clone()));
        handle
    }

    pub fn send(&self, command: Command) {
        let _ = self.tx.send(command);
    }

    pub async fn register(
        &self,
        signing_pub: [u8; 32],
        agreement_pub: [u8; 32],
        nickname: Option<String>,
    ) -> Outcome<(UserId, UserSummary)> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Register {
            signing_pub,
            agreement_pub,
            nickname,
            reply,
        });
        rx.await.unwrap_or_else(|_| Err("hub actor gone".to_string()))
    }

    pub async fn authenticate(
        &self,
        user_id: UserId,
        signature: [u8; 64],
        timestamp: String,
        channel: mpsc::UnboundedSender<wire::Frame>,
    ) -> Outcome<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Authenticate {
            user_id,
            signature,
            timestamp,
            channel,
            reply,
        });
        rx.await.unwrap_or_else(|_| Err("hub actor gone".to_string()))
    }

    pub async fn get_users(&self, caller: UserId) -> Vec<UserSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetUsers { caller, reply });
        rx.await.unwrap_or_default()
    }

    pub async fn send_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        encrypted_content: Value,
        message_type: MessageType,
    ) -> Message {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SendMessage {
            sender_id: sender_id.clone(),
            receiver_id,
            encrypted_content,
            message_type,
            reply,
        });
        rx.await.unwrap_or_else(|_| Message {
            id: "unknown".to_string(),
            sender_id,
            receiver_id: UserId::derive(&[0u8; 32]),
            plaintext: String::new(),
            timestamp: 0,
            kind: message_type,
            status: MessageStatus::Failed,
            encrypted: false,
        })
    }

    pub async fn mark_read(&self, message_id: String) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::MarkRead { message_id, reply });
        rx.await.unwrap_or(false)
    }

    pub async fn add_to_chat(&self, caller: UserId, target: UserId) -> Outcome<UserSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddToChat { caller, target, reply });
        rx.await.unwrap_or_else(|_| Err("hub actor gone".to_string()))
    }

    pub async fn call_initiate(&self, caller: UserId, to: UserId, offer: String, call_id: String) -> Outcome<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CallInitiate { caller, to, offer, call_id, reply });
        rx.await.unwrap_or_else(|_| Err("hub actor gone".to_string()))
    }

    pub async fn call_accept(&self, callee: UserId, to: UserId, answer: String, call_id: String) -> Outcome<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CallAccept { callee, to, answer, call_id, reply });
        rx.await.unwrap_or_else(|_| Err("hub actor gone".to_string()))
    }

    pub fn call_candidate(&self, from: UserId, to: UserId, candidate: String, call_id: String) {
        self.send(Command::CallCandidate { from, to, candidate, call_id });
    }

    pub fn call_end(&self, from: UserId, to: UserId, call_id: String) {
        self.send(Command::CallEnd { from, to, call_id });
    }

    pub fn call_restart(&self, from: UserId, to: UserId, offer: String, call_id: String) {
        self.send(Command::CallRestart { from, to, offer, call_id });
    }

    pub fn call_restart_answer(&self, from: UserId, to: UserId, answer: String, call_id: String) {
        self.send(Command::CallRestartAnswer { from, to, answer, call_id });
    }

    pub fn disconnect(&self, user_id: UserId) {
        self.send(Command::Disconnect { user_id });
    }
}

struct Actor {
    users: HashMap<UserId, HubUser>,
    channels: HashMap<UserId, mpsc::UnboundedSender<wire::Frame>>,
    calls: HashMap<String, Call>,
    self_handle: HubHandle,
}

async fn run_actor(mut rx: mpsc::UnboundedReceiver<Command>, self_handle: HubHandle) {
    let mut actor = Actor {
        users: HashMap::new(),
        channels: HashMap::new(),
        calls: HashMap::new(),
        self_handle,
    };
    while let Some(command) = rx.recv().await {
        actor.handle(command);
    }
}

impl Actor {
    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { signing_pub, agreement_pub, nickname, reply } => {
                let _ = reply.send(self.register(signing_pub, agreement_pub, nickname));
            }
            Command::Authenticate { user_id, signature, timestamp, channel, reply } => {
                let _ = reply.send(self.authenticate(user_id, signature, timestamp, channel));
            }
            Command::GetUsers { caller, reply } => {
                let _ = reply.send(self.list_users(&caller));
            }
            Command::SendMessage { sender_id, receiver_id, encrypted_content, message_type, reply } => {
                let _ = reply.send(self.send_message(sender_id, receiver_id, encrypted_content, message_type));
            }
            Command::MarkRead { message_id, reply } => {
                // Ephemeral mode: best-effort acknowledgment only, no
                // durable message store to mutate.
                let _ = reply.send(!message_id.is_empty());
            }
            Command::AddToChat { caller, target, reply } => {
                let _ = reply.send(self.add_to_chat(caller, target));
            }
            Command::CallInitiate { caller, to, offer, call_id, reply } => {
                let _ = reply.send(self.call_initiate(caller, to, offer, call_id));
            }
            Command::CallAccept { callee, to, answer, call_id, reply } => {
                let _ = reply.send(self.call_accept(callee, to, answer, call_id));
            }
            Command::CallCandidate { from, to, candidate, call_id } => {
                let target = self.resolve_relay_target(&call_id, &from, to);
                self.relay_call(&target, wire::Frame::CallCandidate {
                    to: None,
                    from: Some(from),
                    candidate,
                    call_id,
                });
            }
            Command::CallEnd { from, to, call_id } => self.call_end(from, to, call_id),
            Command::CallRestart { from, to, offer, call_id } => {
                let target = self.resolve_relay_target(&call_id, &from, to);
                self.relay_call(&target, wire::Frame::CallRestart {
                    to: None,
                    from: Some(from),
                    offer,
                    call_id,
                });
            }
            Command::CallRestartAnswer { from, to, answer, call_id } => {
                let target = self.resolve_relay_target(&call_id, &from, to);
                self.relay_call(&target, wire::Frame::CallRestartAnswer {
                    to: None,
                    from: Some(from),
                    answer,
                    call_id,
                });
            }
            Command::PurgeCall { call_id } => {
                self.calls.remove(&call_id);
            }
            Command::Disconnect { user_id } => self.disconnect(user_id),
        }
    }

    fn register(
        &mut self,
        signing_pub: [u8; 32],
        agreement_pub: [u8; 32],
        nickname: Option<String>,
    ) -> Outcome<(UserId, UserSummary)> {
        let id = UserId::derive(&signing_pub);
        let now = now_millis();
        match self.users.get_mut(&id) {
            Some(existing) => {
                // Duplicate registration: update keys only if the
                // submitted signing key matches the one on file.
                if existing.signing_pub != signing_pub {
                    return Err("signing key mismatch for existing user".to_string());
                }
                existing.agreement_pub = agreement_pub;
                if nickname.is_some() {
                    existing.nickname = nickname;
                }
                Ok((id.clone(), existing.to_summary()))
            }
            None => {
                let user = HubUser {
                    id: id.clone(),
                    signing_pub,
                    agreement_pub,
                    nickname,
                    online: false,
                    last_seen: now,
                };
                let summary = user.to_summary();
                self.users.insert(id.clone(), user);
                Ok((id, summary))
            }
        }
    }

    fn authenticate(
        &mut self,
        user_id: UserId,
        signature: [u8; 64],
        timestamp: String,
        channel: mpsc::UnboundedSender<wire::Frame>,
    ) -> Outcome<()> {
        let user = self.users.get(&user_id).ok_or_else(|| "unknown user".to_string())?;

        let parsed = chrono::DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|_| "malformed timestamp".to_string())?;
        let age = (chrono::Utc::now() - parsed.with_timezone(&chrono::Utc)).num_seconds();
        if !(0..=AUTH_FRESHNESS_SECS).contains(&age) {
            return Err("stale or future-dated timestamp".to_string());
        }

        let verifying_key =
            VerifyingKey::from_bytes(&user.signing_pub).map_err(|_| "invalid stored signing key".to_string())?;
        let sig = Signature::from_bytes(&signature);
        verifying_key
            .verify(timestamp.as_bytes(), &sig)
            .map_err(|_| "signature verification failed".to_string())?;

        let user = self.users.get_mut(&user_id).unwrap();
        user.online = true;
        user.last_seen = now_millis();
        self.channels.insert(user_id.clone(), channel);

        self.broadcast_status(&user_id, true);
        Ok(())
    }

    fn list_users(&self, caller: &UserId) -> Vec<UserSummary> {
        self.users
            .values()
            .filter(|u| &u.id != caller)
            .map(HubUser::to_summary)
            .collect()
    }

    fn send_message(
        &mut self,
        sender_id: UserId,
        receiver_id: UserId,
        encrypted_content: Value,
        message_type: MessageType,
    ) -> Message {
        let (plaintext, encrypted) = match &encrypted_content {
            Value::Object(_) => (encrypted_content.to_string(), true),
            Value::String(s) => (s.clone(), false),
            other => (other.to_string(), false),
        };

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
            plaintext,
            timestamp: now_millis(),
            kind: message_type,
            status: MessageStatus::Sent,
            encrypted,
        };

        if let Some(channel) = self.channels.get(&receiver_id) {
            let _ = channel.send(wire::Frame::NewMessage { message: message.clone() });
        }
        // Ephemeral mode: no durable store for offline delivery (spec
        // §1 Non-goals, §4.7 `send_message`). The sender still gets an
        // acknowledgment either way.
        message
    }

    fn add_to_chat(&self, caller: UserId, target: UserId) -> Outcome<UserSummary> {
        if target == caller {
            return Err("cannot add yourself".to_string());
        }
        let target_user = self.users.get(&target).ok_or_else(|| "target does not exist".to_string())?;
        if let Some(channel) = self.channels.get(&target) {
            let caller_nickname = self.users.get(&caller).and_then(|u| u.nickname.clone());
            let _ = channel.send(wire::Frame::ChatAdded {
                user_id: caller,
                nickname: caller_nickname,
            });
        }
        Ok(target_user.to_summary())
    }

    fn call_initiate(&mut self, caller: UserId, to: UserId, offer: String, call_id: String) -> Outcome<()> {
        if !self.channels.contains_key(&to) {
            return Err("Recipient is offline".to_string());
        }
        self.calls.insert(
            call_id.clone(),
            Call::new(call_id.clone(), caller.clone(), to.clone(), now_millis()),
        );
        self.relay_call(&to, wire::Frame::CallOffer { from: caller, offer, call_id });
        Ok(())
    }

    fn call_accept(&mut self, callee: UserId, to: UserId, answer: String, call_id: String) -> Outcome<()> {
        let call = self.calls.get_mut(&call_id).ok_or_else(|| "unknown call".to_string())?;
        if call.callee_id != callee {
            return Err("not the designated callee".to_string());
        }
        call.state = CallState::Connected;
        self.relay_call(&to, wire::Frame::CallAnswer { from: callee, answer, call_id });
        Ok(())
    }

    fn call_end(&mut self, from: UserId, to: UserId, call_id: String) {
        let target = self.resolve_relay_target(&call_id, &from, to);

        if let Some(call) = self.calls.get_mut(&call_id) {
            if !call.is_participant(&from) {
                tracing::warn!(call_id = %call_id, "call_end from non-participant ignored");
                return;
            }
            call.state = CallState::Ended;
            call.ended_at = Some(now_millis());
        }
        self.relay_call(&target, wire::Frame::CallEnd { to: None, from: Some(from), call_id: call_id.clone() });

        let handle = self.self_handle.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(CALL_PURGE_DELAY_SECS)).await;
            handle.send(Command::PurgeCall { call_id });
        });
    }

    /// Derives the non-sender participant from the hub's own call record
    /// rather than trusting the client-supplied `to` (spec §4.7: signaling
    /// relays "forward to the non-sender participant"). Falls back to the
    /// declared `to` if the call id is unknown, e.g. a stray frame after
    /// the call has already been purged.
    fn resolve_relay_target(&self, call_id: &str, from: &UserId, declared_to: UserId) -> UserId {
        self.calls
            .get(call_id)
            .and_then(|call| call.other_participant(from))
            .cloned()
            .unwrap_or(declared_to)
    }

    fn relay_call(&self, to: &UserId, frame: wire::Frame) {
        if let Some(channel) = self.channels.get(to) {
            let _ = channel.send(frame);
        } else {
            tracing::warn!(recipient = %to, "call signaling relay target offline");
        }
    }

    fn broadcast_status(&self, user_id: &UserId, online: bool) {
        for (id, channel) in &self.channels {
            if id != user_id {
                let _ = channel.send(wire::Frame::UserStatusUpdate {
                    user_id: user_id.clone(),
                    is_online: online,
                });
            }
        }
    }

    fn disconnect(&mut self, user_id: UserId) {
        self.channels.remove(&user_id);
        if let Some(user) = self.users.get_mut(&user_id) {
            user.online = false;
            user.last_seen = now_millis();
        }
        self.broadcast_status(&user_id, false);
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use rand::RngCore;

    fn fresh_signer() -> (SigningKey, [u8; 32]) {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let key = SigningKey::from_bytes(&seed);
        let pub_bytes = key.verifying_key().to_bytes();
        (key, pub_bytes)
    }

    #[tokio::test]
    async fn register_then_authenticate_with_fresh_timestamp_succeeds() {
        let hub = HubHandle::spawn();
        let (signer, signing_pub) = fresh_signer();
        let (_, summary) = hub.register(signing_pub, [9u8; 32], None).await.unwrap();

        let timestamp = chrono::Utc::now().to_rfc3339();
        let sig = signer.sign(timestamp.as_bytes()).to_bytes();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = hub.authenticate(summary.id.clone(), sig, timestamp, tx).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn authenticate_rejects_stale_timestamp() {
        let hub = HubHandle::spawn();
        let (signer, signing_pub) = fresh_signer();
        let (_, summary) = hub.register(signing_pub, [9u8; 32], None).await.unwrap();

        let stale = (chrono::Utc::now() - chrono::Duration::minutes(6)).to_rfc3339();
        let sig = signer.sign(stale.as_bytes()).to_bytes();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = hub.authenticate(summary.id.clone(), sig, stale, tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn authenticate_rejects_future_dated_timestamp() {
        let hub = HubHandle::spawn();
        let (signer, signing_pub) = fresh_signer();
        let (_, summary) = hub.register(signing_pub, [9u8; 32], None).await.unwrap();

        let future = (chrono::Utc::now() + chrono::Duration::minutes(6)).to_rfc3339();
        let sig = signer.sign(future.as_bytes()).to_bytes();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = hub.authenticate(summary.id.clone(), sig, future, tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn authenticate_rejects_bad_signature() {
        let hub = HubHandle::spawn();
        let (_signer, signing_pub) = fresh_signer();
        let (other_signer, _) = fresh_signer();
        let (_, summary) = hub.register(signing_pub, [9u8; 32], None).await.unwrap();

        let timestamp = chrono::Utc::now().to_rfc3339();
        // Signed with the wrong key.
        let sig = other_signer.sign(timestamp.as_bytes()).to_bytes();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = hub.authenticate(summary.id.clone(), sig, timestamp, tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_users_excludes_caller() {
        let hub = HubHandle::spawn();
        let (_, a) = fresh_signer();
        let (_, b) = fresh_signer();
        let (_, user_a) = hub.register(a, [1u8; 32], None).await.unwrap();
        let (_, user_b) = hub.register(b, [2u8; 32], None).await.unwrap();

        let listed = hub.get_users(user_a.id.clone()).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, user_b.id);
    }

    #[tokio::test]
    async fn call_state_machine_initiate_accept_end() {
        let hub = HubHandle::spawn();
        let (caller_signer, caller_pub) = fresh_signer();
        let (callee_signer, callee_pub) = fresh_signer();
        let (_, caller) = hub.register(caller_pub, [1u8; 32], None).await.unwrap();
        let (_, callee) = hub.register(callee_pub, [2u8; 32], None).await.unwrap();

        // Both must be "online" (have a channel bound) for call signaling
        // to relay; authenticate each with its own signature.
        for (signer, id) in [(&caller_signer, &caller.id), (&callee_signer, &callee.id)] {
            let timestamp = chrono::Utc::now().to_rfc3339();
            let sig = signer.sign(timestamp.as_bytes()).to_bytes();
            let (tx, _rx) = mpsc::unbounded_channel();
            hub.authenticate(id.clone(), sig, timestamp, tx).await.unwrap();
        }

        let result = hub
            .call_initiate(caller.id.clone(), callee.id.clone(), "offer-sdp".to_string(), "C1".to_string())
            .await;
        assert!(result.is_ok());

        let result = hub
            .call_accept(callee.id.clone(), caller.id.clone(), "answer-sdp".to_string(), "C1".to_string())
            .await;
        assert!(result.is_ok());

        // A non-participant accepting the same call id must be rejected.
        let (_, stranger) = fresh_signer();
        let (_, stranger_user) = hub.register(stranger, [3u8; 32], None).await.unwrap();
        let result = hub
            .call_accept(stranger_user.id.clone(), caller.id.clone(), "x".to_string(), "C1".to_string())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn call_initiate_to_offline_callee_is_rejected() {
        let hub = HubHandle::spawn();
        let (caller_signer, caller_pub) = fresh_signer();
        let (_, callee_pub) = fresh_signer();
        let (_, caller) = hub.register(caller_pub, [1u8; 32], None).await.unwrap();
        let (_, callee) = hub.register(callee_pub, [2u8; 32], None).await.unwrap();

        let timestamp = chrono::Utc::now().to_rfc3339();
        let sig = caller_signer.sign(timestamp.as_bytes()).to_bytes();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.authenticate(caller.id.clone(), sig, timestamp, tx).await.unwrap();

        // `callee` never authenticated, so it has no bound channel.
        let result = hub
            .call_initiate(caller.id.clone(), callee.id.clone(), "offer".to_string(), "C2".to_string())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn call_candidate_relays_to_the_other_participant_even_if_to_is_wrong() {
        let hub = HubHandle::spawn();
        let (caller_signer, caller_pub) = fresh_signer();
        let (callee_signer, callee_pub) = fresh_signer();
        let (_, caller) = hub.register(caller_pub, [1u8; 32], None).await.unwrap();
        let (_, callee) = hub.register(callee_pub, [2u8; 32], None).await.unwrap();

        let mut callee_rx = None;
        for (signer, id) in [(&caller_signer, &caller.id), (&callee_signer, &callee.id)] {
            let timestamp = chrono::Utc::now().to_rfc3339();
            let sig = signer.sign(timestamp.as_bytes()).to_bytes();
            let (tx, rx) = mpsc::unbounded_channel();
            hub.authenticate(id.clone(), sig, timestamp, tx).await.unwrap();
            if id == &callee.id {
                callee_rx = Some(rx);
            }
        }
        let mut callee_rx = callee_rx.unwrap();

        hub.call_initiate(caller.id.clone(), callee.id.clone(), "offer-sdp".to_string(), "C3".to_string())
            .await
            .unwrap();
        callee_rx.recv().await.unwrap(); // drain call_offer

        // Client mistakenly (or maliciously) names itself as the relay
        // target; the hub must still derive the actual non-sender peer
        // from its own call record.
        hub.call_candidate(caller.id.clone(), caller.id.clone(), "cand".to_string(), "C3".to_string());

        match callee_rx.recv().await.unwrap() {
            wire::Frame::CallCandidate { from, .. } => assert_eq!(from, Some(caller.id)),
            other => panic!("expected call_candidate relayed to callee, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn re_registering_same_signing_key_updates_agreement_key() {
        let hub = HubHandle::spawn();
        let (_, signing_pub) = fresh_signer();
        hub.register(signing_pub, [1u8; 32], None).await.unwrap();

        let (_, updated) = hub.register(signing_pub, [2u8; 32], None).await.unwrap();
        assert_eq!(updated.agreement_pub_key, BASE64.encode([2u8; 32]));
    }
}

//! Per-connection state machine and frame dispatch:
//! `New -> Registered -> Authenticated -> Closed`. One task per socket,
//! reading client frames and driving the shared [`HubHandle`] mailbox;
//! a second task owns the write half so hub-pushed frames (presence,
//! call signaling, relayed messages) and direct replies share one
//! ordered outbound queue.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use wire::{Frame, UserId};

use crate::state::HubHandle;

enum ConnState {
    New,
    Authenticated(UserId),
}

/// Drives one client's websocket to completion. Never returns an error —
/// any protocol violation is reported to the peer as an `error` frame
/// and the connection stays open rather than being torn down.
pub async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let (mut sink, mut stream) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Frame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if sink.send(WsMessage::Text(frame.encode().into())).await.is_err() {
                break;
            }
        }
    });

    let mut state = ConnState::New;

    while let Some(next) = stream.next().await {
        let text = match next {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(_) => break,
        };

        let frame = match Frame::decode(&text) {
            Ok(f) => f,
            Err(e) => {
                let _ = frame_tx.send(Frame::Error { message: format!("malformed frame: {e}") });
                continue;
            }
        };

        dispatch(frame, &mut state, &hub, &frame_tx).await;
    }

    if let ConnState::Authenticated(user_id) = state {
        hub.disconnect(user_id);
    }
    drop(frame_tx);
    let _ = writer.await;
}

async fn dispatch(frame: Frame, state: &mut ConnState, hub: &HubHandle, out: &mpsc::UnboundedSender<Frame>) {
    match frame {
        Frame::Register { public_signing_key, public_encryption_key, nickname } => {
            let (Ok(signing_pub), Ok(agreement_pub)) = (
                decode_key(&public_signing_key),
                decode_key(&public_encryption_key),
            ) else {
                let _ = out.send(Frame::Error { message: "malformed public key".to_string() });
                return;
            };
            match hub.register(signing_pub, agreement_pub, nickname).await {
                Ok((user_id, summary)) => {
                    let _ = out.send(Frame::RegisterSuccess { user_id, user: summary });
                }
                Err(message) => {
                    let _ = out.send(Frame::Error { message });
                }
            }
        }

        Frame::Auth { user_id, signature, timestamp } => {
            let Ok(sig_bytes) = decode_sig(&signature) else {
                let _ = out.send(Frame::AuthSuccess { user_id, success: false });
                return;
            };
            match hub.authenticate(user_id.clone(), sig_bytes, timestamp, out.clone()).await {
                Ok(()) => {
                    *state = ConnState::Authenticated(user_id.clone());
                    let _ = out.send(Frame::AuthSuccess { user_id, success: true });
                }
                Err(reason) => {
                    tracing::debug!(user_id = %user_id, reason, "authentication rejected");
                    let _ = out.send(Frame::AuthSuccess { user_id, success: false });
                }
            }
        }

        Frame::Ping {} => {
            let _ = out.send(Frame::Pong {});
        }

        other => {
            let ConnState::Authenticated(self_id) = state else {
                let _ = out.send(Frame::Error { message: "not authenticated".to_string() });
                return;
            };
            dispatch_authenticated(other, self_id.clone(), hub, out).await;
        }
    }
}

/// Frames that require an authenticated connection. `send_message`'s
/// own `signature`/`timestamp` fields are not re-verified here: they
/// authenticate the envelope to the *receiving* peer (spec's envelope
/// signs ciphertext, not plaintext), which the hub cannot and should
/// not decrypt. Sender authenticity for relay purposes comes from the
/// already-verified `auth` handshake that produced this connection's
/// `Authenticated` state.
async fn dispatch_authenticated(frame: Frame, self_id: UserId, hub: &HubHandle, out: &mpsc::UnboundedSender<Frame>) {
    match frame {
        Frame::SendMessage { receiver_id, encrypted_content, message_type, .. } => {
            let message = hub.send_message(self_id, receiver_id, encrypted_content, message_type).await;
            let _ = out.send(Frame::MessageSent { message });
        }

        Frame::GetHistory { other_user_id, .. } => {
            // Ephemeral hub: no durable message store. History lives
            // in each peer's own outbox/history store; the hub always
            // answers empty.
            let _ = out.send(Frame::MessageHistory { messages: Vec::new(), other_user_id });
        }

        Frame::MarkRead { message_id } => {
            let success = hub.mark_read(message_id.clone()).await;
            let _ = out.send(Frame::MessageMarkedRead { message_id, success });
        }

        Frame::GetUsers {} => {
            let users = hub.get_users(self_id).await;
            let _ = out.send(Frame::UsersList { users });
        }

        Frame::AddToChat { target_user_id } => {
            match hub.add_to_chat(self_id, target_user_id).await {
                Ok(target_user) => {
                    let _ = out.send(Frame::AddToChatSuccess { target_user });
                }
                Err(message) => {
                    let _ = out.send(Frame::Error { message });
                }
            }
        }

        Frame::CallInitiate { to, offer, call_id } => {
            if let Err(message) = hub.call_initiate(self_id, to, offer, call_id).await {
                let _ = out.send(Frame::Error { message });
            }
        }

        Frame::CallAccept { to, answer, call_id } => {
            if let Err(message) = hub.call_accept(self_id, to, answer, call_id).await {
                let _ = out.send(Frame::Error { message });
            }
        }

        Frame::CallCandidate { to: Some(to), candidate, call_id, .. } => {
            hub.call_candidate(self_id, to, candidate, call_id);
        }
        Frame::CallCandidate { to: None, .. } => {
            let _ = out.send(Frame::Error { message: "call_candidate missing `to`".to_string() });
        }

        Frame::CallEnd { to: Some(to), call_id, .. } => {
            hub.call_end(self_id, to, call_id);
        }
        Frame::CallEnd { to: None, .. } => {
            let _ = out.send(Frame::Error { message: "call_end missing `to`".to_string() });
        }

        Frame::CallRestart { to: Some(to), offer, call_id, .. } => {
            hub.call_restart(self_id, to, offer, call_id);
        }
        Frame::CallRestart { to: None, .. } => {
            let _ = out.send(Frame::Error { message: "call_restart missing `to`".to_string() });
        }

        Frame::CallRestartAnswer { to: Some(to), answer, call_id, .. } => {
            hub.call_restart_answer(self_id, to, answer, call_id);
        }
        Frame::CallRestartAnswer { to: None, .. } => {
            let _ = out.send(Frame::Error { message: "call_restart_answer missing `to`".to_string() });
        }

        _ => {
            let _ = out.send(Frame::Error { message: "unexpected frame for authenticated connection".to_string() });
        }
    }
}

fn decode_key(b64: &str) -> Result<[u8; 32], ()> {
    let bytes = BASE64.decode(b64).map_err(|_| ())?;
    bytes.try_into().map_err(|_| ())
}

fn decode_sig(b64: &str) -> Result<[u8; 64], ()> {
    let bytes = BASE64.decode(b64).map_err(|_| ())?;
    bytes.try_into().map_err(|_| ())
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

    async fn drain_one(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
        rx.recv().await.expect("dispatch should have replied")
    }

    #[tokio::test]
    async fn new_connection_rejects_frames_other_than_register_auth() {
        let hub = HubHandle::spawn();
        let mut state = ConnState::New;
        let (out, mut rx) = mpsc::unbounded_channel();

        dispatch(Frame::GetUsers {}, &mut state, &hub, &out).await;

        match drain_one(&mut rx).await {
            Frame::Error { message } => assert_eq!(message, "not authenticated"),
            other => panic!("expected an error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_then_auth_transitions_to_authenticated_and_unlocks_get_users() {
        let hub = HubHandle::spawn();
        let mut state = ConnState::New;
        let (out, mut rx) = mpsc::unbounded_channel();
        let (signer, signing_pub) = fresh_signer();

        dispatch(
            Frame::Register {
                public_signing_key: BASE64.encode(signing_pub),
                public_encryption_key: BASE64.encode([7u8; 32]),
                nickname: None,
            },
            &mut state,
            &hub,
            &out,
        )
        .await;
        let user_id = match drain_one(&mut rx).await {
            Frame::RegisterSuccess { user_id, .. } => user_id,
            other => panic!("expected register_success, got {other:?}"),
        };
        assert!(matches!(state, ConnState::New));

        let timestamp = chrono::Utc::now().to_rfc3339();
        let signature = signer.sign(timestamp.as_bytes()).to_bytes();
        dispatch(
            Frame::Auth { user_id: user_id.clone(), signature: BASE64.encode(signature), timestamp },
            &mut state,
            &hub,
            &out,
        )
        .await;
        match drain_one(&mut rx).await {
            Frame::AuthSuccess { success, .. } => assert!(success),
            other => panic!("expected auth_success, got {other:?}"),
        }
        assert!(matches!(state, ConnState::Authenticated(ref id) if *id == user_id));

        dispatch(Frame::GetUsers {}, &mut state, &hub, &out).await;
        match drain_one(&mut rx).await {
            Frame::UsersList { users } => assert!(users.is_empty()),
            other => panic!("expected users_list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_with_malformed_key_is_rejected_without_changing_state() {
        let hub = HubHandle::spawn();
        let mut state = ConnState::New;
        let (out, mut rx) = mpsc::unbounded_channel();

        dispatch(
            Frame::Register {
                public_signing_key: "not base64!!".to_string(),
                public_encryption_key: BASE64.encode([1u8; 32]),
                nickname: None,
            },
            &mut state,
            &hub,
            &out,
        )
        .await;

        match drain_one(&mut rx).await {
            Frame::Error { message } => assert_eq!(message, "malformed public key"),
            other => panic!("expected an error frame, got {other:?}"),
        }
        assert!(matches!(state, ConnState::New));
    }

    #[tokio::test]
    async fn ping_is_answered_before_authentication() {
        let hub = HubHandle::spawn();
        let mut state = ConnState::New;
        let (out, mut rx) = mpsc::unbounded_channel();

        dispatch(Frame::Ping {}, &mut state, &hub, &out).await;

        assert_eq!(drain_one(&mut rx).await.type_name(), "pong");
        assert!(matches!(state, ConnState::New));
    }

    #[test]
    fn decode_helpers_reject_wrong_length_and_invalid_base64() {
        assert!(decode_key("####").is_err());
        assert!(decode_key(&BASE64.encode([1u8; 4])).is_err());
        assert!(decode_key(&BASE64.encode([1u8; 32])).is_ok());
        assert!(decode_sig(&BASE64.encode([1u8; 32])).is_err());
        assert!(decode_sig(&BASE64.encode([1u8; 64])).is_ok());
    }
}

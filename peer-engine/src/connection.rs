//! Connection Manager: owns the framed transport, broadcasts
//! inbound frames to subscribers, heartbeats, reconnects, and provides
//! `request(type, body, expect) -> Frame` correlation.
//!
//! A single `tokio_tungstenite` client connection: one task owns the
//! socket, a broadcast channel fans inbound frames out to subscribers, an
//! `mpsc` queue serializes outbound sends.
//!
//! Lifecycle notifications (connected/disconnected/reconnecting) are
//! pushed as `LifecycleEvent`s through an `mpsc` channel the caller
//! supplies at construction, rather than a callback trait the engine
//! would have to invoke directly — this avoids a cyclic dependency
//! between the connection and whatever owns its lifecycle reactions.

use crate::error::TransportError;
use crate::identity::IdentityManager;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use wire::Frame;

const INBOUND_CAPACITY: usize = 256;
const LIFECYCLE_CAPACITY: usize = 32;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const REGISTER_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_DELAYS: [u64; 6] = [2, 4, 8, 16, 30, 30];

/// Background-hook events the engine pushes out without depending on any
/// UI/lifecycle crate.
///
/// `Connected` fires only for the first successful connection of this
/// `connect()` call; every later successful reconnect fires `Reconnected`
/// instead, so a listener can tell "freshly connected" (the embedder is
/// expected to drive register/auth itself) apart from "came back after a
/// drop" (the engine re-runs authentication on its own, per §4.5).
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Connected,
    Reconnected,
    Disconnected,
    Reconnecting { attempt: u32 },
    ReconnectExhausted,
}

struct SharedState {
    connected: AtomicBool,
    manual_disconnect: AtomicBool,
    reconnect_attempt: AtomicU32,
    cancel_requests: Notify,
}

/// Framed bidirectional transport client. Cheaply cloneable;
/// all clones share the same connection, outbound queue, and subscriber
/// set.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<SharedState>,
    inbound: broadcast::Sender<Frame>,
    outbound: Arc<Mutex<mpsc::UnboundedSender<Frame>>>,
    lifecycle: Option<mpsc::UnboundedSender<LifecycleEvent>>,
    lifecycle_broadcast: broadcast::Sender<LifecycleEvent>,
    loop_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl ConnectionManager {
    pub fn new(lifecycle: Option<mpsc::UnboundedSender<LifecycleEvent>>) -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let (lifecycle_broadcast, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        // Placeholder sender until `connect()` wires up a real transport;
        // `send()` only reaches it when `is_connected()` is true, so the
        // dangling receiver here is never actually used.
        let (placeholder_tx, _placeholder_rx) = mpsc::unbounded_channel();
        ConnectionManager {
            shared: Arc::new(SharedState {
                connected: AtomicBool::new(false),
                manual_disconnect: AtomicBool::new(false),
                reconnect_attempt: AtomicU32::new(0),
                cancel_requests: Notify::new(),
            }),
            inbound,
            outbound: Arc::new(Mutex::new(placeholder_tx)),
            lifecycle,
            lifecycle_broadcast,
            loop_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.inbound.subscribe()
    }

    /// Subscribes to connection lifecycle events independent of whatever
    /// `lifecycle` sender was supplied at construction — used internally
    /// to drive re-authentication on reconnect without requiring an
    /// embedder to wire that up itself.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_broadcast.subscribe()
    }

    /// `connect(endpoint, ephemeralReset)`. If `ephemeralReset`
    /// is true, wipes the identity before the first connection attempt of
    /// this process lifetime.
    pub async fn connect(
        &self,
        endpoint: String,
        ephemeral_reset: bool,
        identity: Option<Arc<IdentityManager>>,
    ) -> Result<(), TransportError> {
        if ephemeral_reset {
            if let Some(identity) = &identity {
                identity
                    .delete_identity()
                    .await
                    .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            }
        }

        self.shared.manual_disconnect.store(false, Ordering::SeqCst);
        self.shared.reconnect_attempt.store(0, Ordering::SeqCst);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.outbound.lock().unwrap() = outbound_tx.clone();

        let shared = self.shared.clone();
        let inbound = self.inbound.clone();
        let lifecycle = self.lifecycle.clone();
        let lifecycle_broadcast = self.lifecycle_broadcast.clone();

        let handle = tokio::spawn(run_loop(
            endpoint,
            shared,
            inbound,
            lifecycle,
            lifecycle_broadcast,
            outbound_tx,
            outbound_rx,
        ));
        *self.loop_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// `disconnect()`: marks `manualDisconnect=true`, stops
    /// heartbeat/reconnect, closes the transport, and cancels in-flight
    /// `request()` calls (they resolve to `None`).
    pub fn disconnect(&self) {
        self.shared.manual_disconnect.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.cancel_requests.notify_waiters();
        if let Some(handle) = self.loop_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// `send(frame)`: serialize and hand to transport;
    /// silently drops with a log if not connected.
    pub fn send(&self, frame: Frame) {
        if !self.is_connected() {
            tracing::warn!(frame_type = frame.type_name(), "dropping frame: not connected");
            return;
        }
        if self.outbound.lock().unwrap().send(frame).is_err() {
            tracing::warn!("dropping frame: outbound channel closed");
        }
    }

    /// `request(typeOut, body, expectTypeIn, timeout) -> Frame|null`
    ///. `expect_type` is the wire `type` string of the
    /// expected reply; other frames in the meantime still reach other
    /// subscribers via the broadcast channel.
    pub async fn request(&self, out: Frame, expect_type: &str, timeout: Duration) -> Option<Frame> {
        let mut rx = self.inbound.subscribe();
        self.send(out);

        let deadline = sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return None,
                _ = self.shared.cancel_requests.notified() => return None,
                received = rx.recv() => match received {
                    Ok(frame) if frame.type_name() == expect_type => return Some(frame),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    pub async fn request_default(&self, out: Frame, expect_type: &str) -> Option<Frame> {
        self.request(out, expect_type, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn request_registration(&self, out: Frame, expect_type: &str) -> Option<Frame> {
        self.request(out, expect_type, REGISTER_TIMEOUT).await
    }
}

async fn run_loop(
    endpoint: String,
    shared: Arc<SharedState>,
    inbound: broadcast::Sender<Frame>,
    lifecycle: Option<mpsc::UnboundedSender<LifecycleEvent>>,
    lifecycle_broadcast: broadcast::Sender<LifecycleEvent>,
    outbound_tx: mpsc::UnboundedSender<Frame>,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
) {
    let mut has_connected_once = false;

    loop {
        if shared.manual_disconnect.load(Ordering::SeqCst) {
            return;
        }

        match tokio_tungstenite::connect_async(&endpoint).await {
            Ok((stream, _response)) => {
                tracing::info!(endpoint = %endpoint, "connected to hub");
                shared.connected.store(true, Ordering::SeqCst);
                shared.reconnect_attempt.store(0, Ordering::SeqCst);
                let connect_event = if has_connected_once {
                    LifecycleEvent::Reconnected
                } else {
                    LifecycleEvent::Connected
                };
                has_connected_once = true;
                notify(&lifecycle, &lifecycle_broadcast, connect_event);

                let (mut write, mut read) = stream.split();
                let force_close = Arc::new(Notify::new());
                let heartbeat_handle =
                    spawn_heartbeat(outbound_tx.clone(), inbound.subscribe(), force_close.clone());

                loop {
                    tokio::select! {
                        outgoing = outbound_rx.recv() => {
                            match outgoing {
                                Some(frame) => {
                                    if let Err(e) = write.send(WsMessage::Text(frame.encode())).await {
                                        tracing::warn!(error = %e, "transport write error");
                                        break;
                                    }
                                }
                                None => break, // manager dropped, process is tearing down
                            }
                        }
                        incoming = read.next() => {
                            match incoming {
                                Some(Ok(WsMessage::Text(text))) => {
                                    match Frame::decode(&text) {
                                        Ok(frame) => { let _ = inbound.send(frame); }
                                        Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
                                    }
                                }
                                Some(Ok(WsMessage::Binary(_))) => {
                                    tracing::warn!("dropping unexpected binary frame");
                                }
                                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                #[allow(unreachable_patterns)]
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "transport read error");
                                    break;
                                }
                            }
                        }
                        _ = force_close.notified() => {
                            tracing::warn!("heartbeat missed pong, treating as disconnect");
                            break;
                        }
                    }
                }

                heartbeat_handle.abort();
                let _ = write.close().await;
                shared.connected.store(false, Ordering::SeqCst);
                notify(&lifecycle, &lifecycle_broadcast, LifecycleEvent::Disconnected);
            }
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
            }
        }

        if shared.manual_disconnect.load(Ordering::SeqCst) {
            return;
        }

        let attempt = shared.reconnect_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            notify(&lifecycle, &lifecycle_broadcast, LifecycleEvent::ReconnectExhausted);
            return;
        }
        notify(&lifecycle, &lifecycle_broadcast, LifecycleEvent::Reconnecting { attempt });
        let delay_secs = RECONNECT_DELAYS[(attempt as usize - 1).min(RECONNECT_DELAYS.len() - 1)];
        sleep(Duration::from_secs(delay_secs)).await;
    }
}

fn spawn_heartbeat(
    outbound: mpsc::UnboundedSender<Frame>,
    mut inbound: broadcast::Receiver<Frame>,
    force_close: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(HEARTBEAT_INTERVAL).await;
            if outbound.send(Frame::Ping {}).is_err() {
                return;
            }

            let got_pong = tokio::time::timeout(PONG_TIMEOUT, async {
                loop {
                    match inbound.recv().await {
                        Ok(Frame::Pong {}) => return true,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return false,
                    }
                }
            })
            .await
            .unwrap_or(false);

            if !got_pong {
                force_close.notify_waiters();
                return;
            }
        }
    })
}

fn notify(
    lifecycle: &Option<mpsc::UnboundedSender<LifecycleEvent>>,
    lifecycle_broadcast: &broadcast::Sender<LifecycleEvent>,
    event: LifecycleEvent,
) {
    if let Some(tx) = lifecycle {
        let _ = tx.send(event.clone());
    }
    let _ = lifecycle_broadcast.send(event);
}

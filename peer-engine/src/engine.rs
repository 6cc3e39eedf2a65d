//! `PeerEngine` — a thin facade composing identity, crypto, directory,
//! outbox/history, connection, and protocol into the public surface an
//! embedder (UI, CLI, test harness) drives.
//!
//! One struct aggregates the crypto manager, directory, outbox/history
//! store, and connection/protocol pair behind plain async methods, with
//! no UI binding of its own — rendering stays an external collaborator.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use wire::{Message, MessageType, UserId};

use crate::connection::{ConnectionManager, LifecycleEvent};
use crate::directory::PeerDirectory;
use crate::error::{EngineError, VaultError};
use crate::identity::{Identity, IdentityManager, KeyVault};
use crate::outbox::OutboxAndHistory;
use crate::protocol::HubProtocol;

pub struct PeerEngine {
    identity_manager: Arc<IdentityManager>,
    connection: Arc<ConnectionManager>,
    directory: Arc<PeerDirectory>,
    store: Arc<OutboxAndHistory>,
    protocol: Arc<RwLock<Option<Arc<HubProtocol>>>>,
}

impl PeerEngine {
    pub fn new(vault: Box<dyn KeyVault>, lifecycle: Option<mpsc::UnboundedSender<LifecycleEvent>>) -> Self {
        let identity_manager = Arc::new(IdentityManager::new(vault));
        let connection = Arc::new(ConnectionManager::new(lifecycle));
        let protocol = Arc::new(RwLock::new(None));

        spawn_reauth_on_reconnect(connection.clone(), identity_manager.clone(), protocol.clone());

        PeerEngine {
            identity_manager,
            connection,
            directory: Arc::new(PeerDirectory::new()),
            store: Arc::new(OutboxAndHistory::new()),
            protocol,
        }
    }

    pub async fn ensure_identity(&self) -> Result<Identity, VaultError> {
        self.identity_manager.ensure_identity().await
    }

    pub async fn has_identity(&self) -> bool {
        self.identity_manager.has_identity().await
    }

    /// Connects, loads/creates the identity, and starts the protocol
    /// dispatch loop. `ephemeral_reset` wipes the identity first.
    pub async fn connect(&self, endpoint: String, ephemeral_reset: bool) -> Result<Arc<HubProtocol>, EngineError> {
        if ephemeral_reset {
            self.directory.clear_all();
            self.store.clear_all();
        }

        self.connection
            .connect(endpoint, ephemeral_reset, Some(self.identity_manager.clone()))
            .await?;

        let identity = self.identity_manager.ensure_identity().await?;
        let protocol = Arc::new(HubProtocol::new(
            self.connection.clone(),
            identity,
            self.directory.clone(),
            self.store.clone(),
        ));
        tokio::spawn(protocol.clone().run());
        *self.protocol.write().await = Some(protocol.clone());
        Ok(protocol)
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Ephemeral reset: wipe identity and session state, reconnect, and
    /// re-register — producing a brand-new user id.
    pub async fn reset_session(&self, endpoint: String) -> Result<Arc<HubProtocol>, EngineError> {
        self.connection.disconnect();
        self.connect(endpoint, true).await
    }

    pub async fn protocol(&self) -> Option<Arc<HubProtocol>> {
        self.protocol.read().await.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn recent_history(&self, peer_id: &UserId) -> Vec<Message> {
        self.store.recent(peer_id)
    }

    pub fn clear_peer(&self, peer_id: &UserId) {
        self.directory.clear_peer(peer_id);
        self.store.clear_peer(peer_id);
    }

    pub async fn send(
        &self,
        receiver_id: UserId,
        plaintext: String,
        message_type: MessageType,
    ) -> Result<Message, EngineError> {
        let protocol = self
            .protocol()
            .await
            .ok_or_else(|| crate::error::ProtocolError("not connected".to_string()))?;
        protocol.send(receiver_id, plaintext, message_type).await
    }
}

/// Reacts to the connection's `Reconnected` lifecycle event by re-running
/// authentication for the active protocol, per §4.5 ("each successful
/// reconnect re-runs authentication if an identity exists"). `Connected`
/// (the first connect) is left to the embedder, which drives register/auth
/// itself the first time.
fn spawn_reauth_on_reconnect(
    connection: Arc<ConnectionManager>,
    identity_manager: Arc<IdentityManager>,
    protocol: Arc<RwLock<Option<Arc<HubProtocol>>>>,
) {
    let mut events = connection.subscribe_lifecycle();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LifecycleEvent::Reconnected) => {
                    if !identity_manager.has_identity().await {
                        continue;
                    }
                    let active = protocol.read().await.clone();
                    if let Some(active) = active {
                        if let Err(e) = active.authenticate().await {
                            tracing::warn!(error = %e, "re-authentication after reconnect failed");
                        }
                    }
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

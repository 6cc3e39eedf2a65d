//! Identity Manager: owns the user's signing and
//! key-agreement key pairs, derives the user id, and (re)loads keys
//! through an abstract Key Vault.
//!
//! Storage is abstracted behind a small vault trait so the manager never
//! assumes anything about the underlying medium — an in-memory map for
//! tests, or a directory of files for a durable default.

use crate::error::VaultError;
use async_trait::async_trait;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::PathBuf;
use std::sync::RwLock;
use wire::UserId;
use x25519_dalek::{PublicKey as AgreementPublicKey, StaticSecret as AgreementSecret};

const KEY_SIGNING_PRIV: &str = "signing_priv";
const KEY_SIGNING_PUB: &str = "signing_pub";
const KEY_AGREEMENT_PRIV: &str = "agreement_priv";
const KEY_AGREEMENT_PUB: &str = "agreement_pub";
const KEY_USER_ID: &str = "user_id";

/// Abstract durable key-value vault. The peer engine reads and writes
/// opaque byte strings under well-known names; it never assumes anything
/// about how they are stored.
#[async_trait]
pub trait KeyVault: Send + Sync {
    async fn get(&self, name: &'static str) -> Result<Option<Vec<u8>>, VaultError>;
    async fn put(&self, name: &'static str, value: Vec<u8>) -> Result<(), VaultError>;
    async fn delete(&self, name: &'static str) -> Result<(), VaultError>;
    async fn clear(&self) -> Result<(), VaultError>;
}

/// In-memory vault, for tests and for injecting a mock in place of
/// durable storage.
#[derive(Default)]
pub struct InMemoryKeyVault {
    inner: RwLock<std::collections::HashMap<&'static str, Vec<u8>>>,
}

impl InMemoryKeyVault {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyVault for InMemoryKeyVault {
    async fn get(&self, name: &'static str) -> Result<Option<Vec<u8>>, VaultError> {
        Ok(self.inner.read().unwrap().get(name).cloned())
    }

    async fn put(&self, name: &'static str, value: Vec<u8>) -> Result<(), VaultError> {
        self.inner.write().unwrap().insert(name, value);
        Ok(())
    }

    async fn delete(&self, name: &'static str) -> Result<(), VaultError> {
        self.inner.write().unwrap().remove(name);
        Ok(())
    }

    async fn clear(&self) -> Result<(), VaultError> {
        self.inner.write().unwrap().clear();
        Ok(())
    }
}

/// Durable on-disk vault under the OS app-data directory, one file per
/// entry. Mirrors `db.rs::get_db_path`'s use of `dirs::data_dir()` for a
/// stable, platform-appropriate location.
pub struct FileKeyVault {
    dir: PathBuf,
}

impl FileKeyVault {
    pub fn new(dir: PathBuf) -> Self {
        FileKeyVault { dir }
    }

    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("pingo-peer-engine")
    }

    fn path_for(&self, name: &'static str) -> PathBuf {
        self.dir.join(name)
    }
}

#[async_trait]
impl KeyVault for FileKeyVault {
    async fn get(&self, name: &'static str) -> Result<Option<Vec<u8>>, VaultError> {
        match tokio::fs::read(self.path_for(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::Io(e.to_string())),
        }
    }

    async fn put(&self, name: &'static str, value: Vec<u8>) -> Result<(), VaultError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| VaultError::Io(e.to_string()))?;
        tokio::fs::write(self.path_for(name), value)
            .await
            .map_err(|e| VaultError::Io(e.to_string()))
    }

    async fn delete(&self, name: &'static str) -> Result<(), VaultError> {
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::Io(e.to_string())),
        }
    }

    async fn clear(&self) -> Result<(), VaultError> {
        for name in [
            KEY_SIGNING_PRIV,
            KEY_SIGNING_PUB,
            KEY_AGREEMENT_PRIV,
            KEY_AGREEMENT_PUB,
            KEY_USER_ID,
        ] {
            self.delete(name).await?;
        }
        Ok(())
    }
}

/// The user's signing and key-agreement key pairs, plus the derived id.
/// Private material never leaves this struct's owner.
#[derive(Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub signing_key: SigningKey,
    pub agreement_secret: AgreementSecretBytes,
}

/// Newtype so `Identity` can be `Clone` without re-deriving `StaticSecret`
/// (which does not implement `Clone` unless `x25519-dalek`'s
/// `static_secrets` feature is enabled, which it is here).
#[derive(Clone)]
pub struct AgreementSecretBytes(pub [u8; 32]);

impl Identity {
    pub fn agreement_secret(&self) -> AgreementSecret {
        AgreementSecret::from(self.agreement_secret.0)
    }

    pub fn agreement_public(&self) -> AgreementPublicKey {
        AgreementPublicKey::from(&self.agreement_secret())
    }

    pub fn signing_public(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

pub struct IdentityManager {
    vault: Box<dyn KeyVault>,
}

impl IdentityManager {
    pub fn new(vault: Box<dyn KeyVault>) -> Self {
        IdentityManager { vault }
    }

    /// True iff both private keys exist in the vault and decode to the
    /// correct byte lengths.
    pub async fn has_identity(&self) -> bool {
        matches!(
            (
                self.vault.get(KEY_SIGNING_PRIV).await,
                self.vault.get(KEY_AGREEMENT_PRIV).await,
            ),
            (Ok(Some(s)), Ok(Some(a))) if s.len() == 32 && a.len() == 32
        )
    }

    /// Loads from the vault, or generates and persists a fresh identity if
    /// absent or corrupted. Corruption (wrong lengths, decode failure)
    /// triggers a wipe-and-regenerate; `ensure_identity` is the only
    /// operation permitted to recover that way.
    pub async fn ensure_identity(&self) -> Result<Identity, VaultError> {
        match self.load_identity().await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => self.generate_and_persist().await,
            Err(_) => {
                self.vault.clear().await?;
                self.generate_and_persist().await
            }
        }
    }

    async fn load_identity(&self) -> Result<Option<Identity>, VaultError> {
        let signing_priv = self.vault.get(KEY_SIGNING_PRIV).await?;
        let agreement_priv = self.vault.get(KEY_AGREEMENT_PRIV).await?;
        let (signing_priv, agreement_priv) = match (signing_priv, agreement_priv) {
            (Some(s), Some(a)) => (s, a),
            _ => return Ok(None),
        };

        let signing_bytes: [u8; 32] = signing_priv
            .try_into()
            .map_err(|v: Vec<u8>| VaultError::WrongLength {
                field: KEY_SIGNING_PRIV,
                expected: 32,
                actual: v.len(),
            })?;
        let agreement_bytes: [u8; 32] =
            agreement_priv
                .try_into()
                .map_err(|v: Vec<u8>| VaultError::WrongLength {
                    field: KEY_AGREEMENT_PRIV,
                    expected: 32,
                    actual: v.len(),
                })?;

        let signing_key = SigningKey::from_bytes(&signing_bytes);
        let user_id_bytes = self.vault.get(KEY_USER_ID).await?;
        let user_id = match user_id_bytes {
            Some(bytes) => {
                let s = String::from_utf8(bytes).map_err(|_| VaultError::WrongLength {
                    field: KEY_USER_ID,
                    expected: 16,
                    actual: 0,
                })?;
                UserId::try_from(s).map_err(|_| VaultError::WrongLength {
                    field: KEY_USER_ID,
                    expected: 16,
                    actual: 0,
                })?
            }
            None => UserId::derive(signing_key.verifying_key().as_bytes()),
        };

        Ok(Some(Identity {
            user_id,
            signing_key,
            agreement_secret: AgreementSecretBytes(agreement_bytes),
        }))
    }

    async fn generate_and_persist(&self) -> Result<Identity, VaultError> {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);

        let agreement_secret = AgreementSecret::random_from_rng(OsRng);
        let agreement_bytes = agreement_secret.to_bytes();
        let agreement_public = AgreementPublicKey::from(&agreement_secret);

        let user_id = UserId::derive(signing_key.verifying_key().as_bytes());

        self.vault
            .put(KEY_SIGNING_PRIV, signing_key.to_bytes().to_vec())
            .await?;
        self.vault
            .put(
                KEY_SIGNING_PUB,
                signing_key.verifying_key().as_bytes().to_vec(),
            )
            .await?;
        self.vault
            .put(KEY_AGREEMENT_PRIV, agreement_bytes.to_vec())
            .await?;
        self.vault
            .put(KEY_AGREEMENT_PUB, agreement_public.as_bytes().to_vec())
            .await?;
        self.vault
            .put(KEY_USER_ID, user_id.as_str().as_bytes().to_vec())
            .await?;

        Ok(Identity {
            user_id,
            signing_key,
            agreement_secret: AgreementSecretBytes(agreement_bytes),
        })
    }

    /// Best-effort delete of all four blobs and the id. Used
    /// for an ephemeral identity reset.
    pub async fn delete_identity(&self) -> Result<(), VaultError> {
        self.vault.clear().await
    }

    pub async fn export_agreement_pubkey(&self) -> Result<Option<[u8; 32]>, VaultError> {
        Ok(self
            .vault
            .get(KEY_AGREEMENT_PUB)
            .await?
            .and_then(|v| v.try_into().ok()))
    }

    pub async fn export_signing_pubkey(&self) -> Result<Option<[u8; 32]>, VaultError> {
        Ok(self
            .vault
            .get(KEY_SIGNING_PUB)
            .await?
            .and_then(|v| v.try_into().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_identity_generates_once_and_reloads() {
        let manager = IdentityManager::new(Box::new(InMemoryKeyVault::new()));
        assert!(!manager.has_identity().await);

        let first = manager.ensure_identity().await.unwrap();
        assert!(manager.has_identity().await);

        let second = manager.ensure_identity().await.unwrap();
        assert_eq!(first.user_id, second.user_id);
        assert_eq!(
            first.signing_key.to_bytes(),
            second.signing_key.to_bytes()
        );
    }

    #[tokio::test]
    async fn delete_identity_clears_vault() {
        let manager = IdentityManager::new(Box::new(InMemoryKeyVault::new()));
        let first = manager.ensure_identity().await.unwrap();
        manager.delete_identity().await.unwrap();
        assert!(!manager.has_identity().await);

        let second = manager.ensure_identity().await.unwrap();
        assert_ne!(first.user_id, second.user_id);
    }

    #[tokio::test]
    async fn corrupted_private_key_triggers_wipe_and_regenerate() {
        let vault = InMemoryKeyVault::new();
        vault.put(KEY_SIGNING_PRIV, vec![1, 2, 3]).await.unwrap();
        vault
            .put(KEY_AGREEMENT_PRIV, vec![0u8; 32])
            .await
            .unwrap();
        let manager = IdentityManager::new(Box::new(vault));

        let identity = manager.ensure_identity().await.unwrap();
        assert_eq!(identity.user_id.as_str().len(), 16);
    }

    #[tokio::test]
    async fn file_vault_persists_identity_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        let first = IdentityManager::new(Box::new(FileKeyVault::new(dir.path().to_path_buf())));
        let identity = first.ensure_identity().await.unwrap();

        let second = IdentityManager::new(Box::new(FileKeyVault::new(dir.path().to_path_buf())));
        assert!(second.has_identity().await);
        let reloaded = second.ensure_identity().await.unwrap();
        assert_eq!(identity.user_id, reloaded.user_id);
    }

    #[tokio::test]
    async fn file_vault_delete_identity_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileKeyVault::new(dir.path().to_path_buf());
        let manager = IdentityManager::new(Box::new(vault));
        manager.ensure_identity().await.unwrap();

        manager.delete_identity().await.unwrap();
        assert!(!manager.has_identity().await);
    }
}

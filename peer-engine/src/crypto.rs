//! Crypto engine: wraps the AEAD cipher (ChaCha20-Poly1305), the Ed25519
//! signature scheme, X25519 key agreement, and SHA-256 behind one small
//! surface.
//!
//! The envelope's signature covers the ciphertext with a dedicated
//! signing key, not the agreement key, so any holder of the sender's
//! signing key can verify integrity without decrypting.

use crate::error::{CryptoError, CryptoErrorKind, IntegrityError};
use crate::identity::Identity;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use wire::{Envelope, MAC_LEN, NONCE_LEN, SIG_LEN};
use x25519_dalek::PublicKey as AgreementPublicKey;

/// Stateless engine bound to one identity's private key material.
pub struct CryptoEngine<'a> {
    identity: &'a Identity,
}

impl<'a> CryptoEngine<'a> {
    pub fn new(identity: &'a Identity) -> Self {
        CryptoEngine { identity }
    }

    /// `encrypt(plaintext, peerAgreementPub) -> Envelope`.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        peer_agreement_pub: &[u8; 32],
    ) -> Result<Envelope, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::new(CryptoErrorKind::InvalidInput));
        }

        let shared_secret = self.derive_shared_secret(peer_agreement_pub);
        let cipher = ChaCha20Poly1305::new_from_slice(&shared_secret)
            .map_err(|_| CryptoError::new(CryptoErrorKind::Primitive))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut combined = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::new(CryptoErrorKind::Primitive))?;

        // chacha20poly1305 appends the 16-byte tag to the ciphertext; split
        // it back out so the wire envelope carries `ct` and `mac` separately.
        if combined.len() < MAC_LEN {
            return Err(CryptoError::new(CryptoErrorKind::Primitive));
        }
        let mac_bytes = combined.split_off(combined.len() - MAC_LEN);
        let ct = combined;
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&mac_bytes);

        let sig = self.sign(&ct).map_err(|_| CryptoError::new(CryptoErrorKind::Primitive))?;

        Ok(Envelope {
            ct,
            nonce: nonce_bytes,
            mac,
            sig,
        })
    }

    /// `decrypt(env, senderAgreementPub, senderSigningPub) -> plaintext`
    ///. Verifies the signature over `ct` before spending a
    /// decryption; a signature or MAC mismatch surfaces `IntegrityError`.
    pub fn decrypt(
        &self,
        env: &Envelope,
        sender_agreement_pub: &[u8; 32],
        sender_signing_pub: &[u8; 32],
    ) -> Result<Vec<u8>, IntegrityError> {
        let verifying_key = VerifyingKey::from_bytes(sender_signing_pub)
            .map_err(|e| IntegrityError(format!("invalid sender signing key: {e}")))?;
        let signature = Signature::from_bytes(&env.sig);
        verifying_key
            .verify(&env.ct, &signature)
            .map_err(|_| IntegrityError("signature verification failed".to_string()))?;

        let shared_secret = self.derive_shared_secret(sender_agreement_pub);
        let cipher = ChaCha20Poly1305::new_from_slice(&shared_secret)
            .map_err(|_| IntegrityError("cipher init failed".to_string()))?;
        let nonce = Nonce::from_slice(&env.nonce);

        let mut combined = Vec::with_capacity(env.ct.len() + MAC_LEN);
        combined.extend_from_slice(&env.ct);
        combined.extend_from_slice(&env.mac);

        cipher
            .decrypt(nonce, combined.as_ref())
            .map_err(|_| IntegrityError("MAC verification failed".to_string()))
    }

    /// `sign(bytes)` for auth challenges and ciphertext integrity.
    pub fn sign(&self, bytes: &[u8]) -> Result<[u8; SIG_LEN], CryptoError> {
        if bytes.is_empty() {
            return Err(CryptoError::new(CryptoErrorKind::InvalidInput));
        }
        Ok(self.identity.signing_key.sign(bytes).to_bytes())
    }

    /// `verify(bytes, sig, pub)`, usable without an Identity.
    pub fn verify(bytes: &[u8], sig: &[u8; SIG_LEN], pub_key: &[u8; 32]) -> Result<(), CryptoError> {
        if bytes.is_empty() {
            return Err(CryptoError::new(CryptoErrorKind::InvalidInput));
        }
        let verifying_key =
            VerifyingKey::from_bytes(pub_key).map_err(|_| CryptoError::new(CryptoErrorKind::InvalidInput))?;
        let signature = Signature::from_bytes(sig);
        verifying_key
            .verify(bytes, &signature)
            .map_err(|_| CryptoError::new(CryptoErrorKind::Primitive))
    }

    fn derive_shared_secret(&self, peer_agreement_pub: &[u8; 32]) -> [u8; 32] {
        let peer_public = AgreementPublicKey::from(*peer_agreement_pub);
        let dh = self.identity.agreement_secret().diffie_hellman(&peer_public);
        Sha256::digest(dh.as_bytes()).into()
    }
}

/// `hash(bytes) -> 32B` SHA-256, free function since it needs
/// no identity.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// `integrityOk(bytes, expectedHash)` — pure equality.
pub fn integrity_ok(bytes: &[u8], expected_hash: &[u8; 32]) -> bool {
    &hash(bytes) == expected_hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityManager, InMemoryKeyVault};

    async fn fresh_identity() -> Identity {
        let manager = IdentityManager::new(Box::new(InMemoryKeyVault::new()));
        manager.ensure_identity().await.unwrap()
    }

    #[tokio::test]
    async fn round_trip_between_two_identities() {
        let alice = fresh_identity().await;
        let bob = fresh_identity().await;

        let alice_engine = CryptoEngine::new(&alice);
        let bob_engine = CryptoEngine::new(&bob);

        let bob_agreement_pub = bob.agreement_public().to_bytes();
        let alice_agreement_pub = alice.agreement_public().to_bytes();
        let alice_signing_pub = alice.signing_public().to_bytes();

        let plaintext = b"hello, secure world!";
        let envelope = alice_engine.encrypt(plaintext, &bob_agreement_pub).unwrap();

        let decrypted = bob_engine
            .decrypt(&envelope, &alice_agreement_pub, &alice_signing_pub)
            .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn tampering_with_ciphertext_is_rejected() {
        let alice = fresh_identity().await;
        let bob = fresh_identity().await;
        let alice_engine = CryptoEngine::new(&alice);
        let bob_engine = CryptoEngine::new(&bob);

        let bob_agreement_pub = bob.agreement_public().to_bytes();
        let alice_agreement_pub = alice.agreement_public().to_bytes();
        let alice_signing_pub = alice.signing_public().to_bytes();

        let mut envelope = alice_engine
            .encrypt(b"tamper me", &bob_agreement_pub)
            .unwrap();
        envelope.ct[0] ^= 0xFF;

        let result = bob_engine.decrypt(&envelope, &alice_agreement_pub, &alice_signing_pub);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tampering_with_mac_is_rejected() {
        let alice = fresh_identity().await;
        let bob = fresh_identity().await;
        let alice_engine = CryptoEngine::new(&alice);
        let bob_engine = CryptoEngine::new(&bob);

        let bob_agreement_pub = bob.agreement_public().to_bytes();
        let alice_agreement_pub = alice.agreement_public().to_bytes();
        let alice_signing_pub = alice.signing_public().to_bytes();

        // Forge a signature over tampered ciphertext so the signature check
        // passes and the MAC check is exercised on its own.
        let mut envelope = alice_engine
            .encrypt(b"tamper the mac", &bob_agreement_pub)
            .unwrap();
        envelope.mac[0] ^= 0xFF;
        envelope.sig = alice_engine.sign(&envelope.ct).unwrap();

        let result = bob_engine.decrypt(&envelope, &alice_agreement_pub, &alice_signing_pub);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tampering_with_signature_is_rejected() {
        let alice = fresh_identity().await;
        let bob = fresh_identity().await;
        let alice_engine = CryptoEngine::new(&alice);
        let bob_engine = CryptoEngine::new(&bob);

        let bob_agreement_pub = bob.agreement_public().to_bytes();
        let alice_agreement_pub = alice.agreement_public().to_bytes();
        let alice_signing_pub = alice.signing_public().to_bytes();

        let mut envelope = alice_engine
            .encrypt(b"tamper the sig", &bob_agreement_pub)
            .unwrap();
        envelope.sig[0] ^= 0xFF;

        let result = bob_engine.decrypt(&envelope, &alice_agreement_pub, &alice_signing_pub);
        assert!(result.is_err());
    }

    #[test]
    fn hash_is_deterministic_and_integrity_ok_matches() {
        let a = hash(b"x");
        let b = hash(b"x");
        assert_eq!(a, b);
        assert!(integrity_ok(b"x", &a));
        assert!(!integrity_ok(b"y", &a));
    }

    #[tokio::test]
    async fn empty_plaintext_is_rejected() {
        let alice = fresh_identity().await;
        let bob = fresh_identity().await;
        let engine = CryptoEngine::new(&alice);
        let bob_pub = bob.agreement_public().to_bytes();
        assert!(engine.encrypt(b"", &bob_pub).is_err());
    }
}

use crate::error::WireError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

pub const NONCE_LEN: usize = 12;
pub const MAC_LEN: usize = 16;
pub const SIG_LEN: usize = 64;
pub const PUBKEY_LEN: usize = 32;

/// The ciphertext envelope: `{ct, nonce, mac, sig}`, where `sig` signs `ct`
/// (not the plaintext) so a holder of the sender's signing key can verify
/// integrity before spending a decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ct: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub mac: [u8; MAC_LEN],
    pub sig: [u8; SIG_LEN],
}

/// Wire-boundary shape: `{"encryptedData","nonce","mac","signature"}`, all
/// base64. Binary-typed fields only apply at the boundary; everywhere else
/// `Envelope`'s fixed-size arrays are used directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnvelopeWire {
    #[serde(rename = "encryptedData")]
    encrypted_data: String,
    nonce: String,
    mac: String,
    signature: String,
}

impl Envelope {
    pub fn to_wire_json(&self) -> serde_json::Value {
        let wire = EnvelopeWire {
            encrypted_data: BASE64.encode(&self.ct),
            nonce: BASE64.encode(self.nonce),
            mac: BASE64.encode(self.mac),
            signature: BASE64.encode(self.sig),
        };
        serde_json::to_value(wire).expect("envelope always serializes")
    }

    pub fn from_wire_json(value: &serde_json::Value) -> Result<Self, WireError> {
        let wire: EnvelopeWire = serde_json::from_value(value.clone())?;
        let ct = BASE64
            .decode(&wire.encrypted_data)
            .map_err(|source| WireError::InvalidBase64 {
                field: "encryptedData",
                source,
            })?;
        let nonce = decode_fixed(&wire.nonce, "nonce")?;
        let mac = decode_fixed(&wire.mac, "mac")?;
        let sig = decode_fixed(&wire.signature, "signature")?;
        Ok(Envelope { ct, nonce, mac, sig })
    }
}

fn decode_fixed<const N: usize>(b64: &str, field: &'static str) -> Result<[u8; N], WireError> {
    let bytes = BASE64
        .decode(b64)
        .map_err(|source| WireError::InvalidBase64 { field, source })?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| WireError::WrongLength {
            field,
            expected: N,
            actual: len,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_json() {
        let env = Envelope {
            ct: vec![1, 2, 3, 4, 5],
            nonce: [9u8; NONCE_LEN],
            mac: [8u8; MAC_LEN],
            sig: [7u8; SIG_LEN],
        };
        let json = env.to_wire_json();
        let back = Envelope::from_wire_json(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn rejects_truncated_nonce() {
        let json = serde_json::json!({
            "encryptedData": BASE64.encode([1,2,3]),
            "nonce": BASE64.encode([1,2,3]),
            "mac": BASE64.encode([0u8; MAC_LEN]),
            "signature": BASE64.encode([0u8; SIG_LEN]),
        });
        assert!(Envelope::from_wire_json(&json).is_err());
    }
}

//! ECDH key agreement and the per-session record cipher.
//!
//! Public keys travel as base64 of the SEC1 uncompressed point. The shared
//! secret is the raw X coordinate of the ECDH point; the AES-256-GCM key is
//! `HKDF-SHA256(salt = "relais-tunnel-v1", info = "aes-256-gcm-key", L = 32)`.
//! A record is `NONCE(12) || CIPHERTEXT || TAG(16)` with a fresh random
//! nonce per record and no AAD; the GCM tag alone is relied on for
//! integrity, so the receiver never assumes nonce ordering.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// HKDF salt for session key derivation.
const HKDF_SALT: &[u8] = b"relais-tunnel-v1";

/// HKDF info string for the AES key.
const HKDF_INFO: &[u8] = b"aes-256-gcm-key";

/// Nonce size for AES-256-GCM.
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

/// One side of the ephemeral P-256 key agreement.
///
/// Generated at session start and consumed by [`KeyExchange::into_channel`]
/// once the peer's public key arrives.
pub struct KeyExchange {
    secret: EphemeralSecret,
}

impl KeyExchange {
    /// Generate a fresh ephemeral key pair.
    pub fn generate() -> Self {
        Self {
            secret: EphemeralSecret::random(&mut OsRng),
        }
    }

    /// Our public key as base64 of the SEC1 uncompressed point.
    pub fn public_key_base64(&self) -> String {
        let point = self.secret.public_key().to_encoded_point(false);
        BASE64.encode(point.as_bytes())
    }

    /// Complete the agreement against the peer's base64 public key and
    /// derive the session cipher.
    pub fn into_channel(self, peer_public_b64: &str) -> Result<SecureChannel, CryptoError> {
        let raw = BASE64
            .decode(peer_public_b64)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let peer = PublicKey::from_sec1_bytes(&raw)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

        // raw_secret_bytes() is the X coordinate of the shared point.
        let shared = self.secret.diffie_hellman(&peer);
        let mut key_bytes = [0u8; 32];
        Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.raw_secret_bytes().as_slice())
            .expand(HKDF_INFO, &mut key_bytes)
            .map_err(|_| CryptoError::KeyDerivation)?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        key_bytes.zeroize();
        Ok(SecureChannel { cipher })
    }
}

/// The keyed record cipher. Only exists after a completed handshake.
pub struct SecureChannel {
    cipher: Aes256Gcm,
}

impl SecureChannel {
    /// Seal one record: `NONCE || CIPHERTEXT || TAG`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut record = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        record.extend_from_slice(&nonce);
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }

    /// Open one record.
    pub fn open(&self, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if record.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::TruncatedRecord(record.len()));
        }
        let (nonce, ciphertext) = record.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the agreement from both ends, as the agent and relay would.
    fn channel_pair() -> (SecureChannel, SecureChannel) {
        let client = KeyExchange::generate();
        let server = KeyExchange::generate();
        let client_pub = client.public_key_base64();
        let server_pub = server.public_key_base64();

        let client_channel = client.into_channel(&server_pub).unwrap();
        let server_channel = server.into_channel(&client_pub).unwrap();
        (client_channel, server_channel)
    }

    #[test]
    fn public_key_is_uncompressed_point() {
        let keys = KeyExchange::generate();
        let raw = BASE64.decode(keys.public_key_base64()).unwrap();
        assert_eq!(raw.len(), 65);
        assert_eq!(raw[0], 0x04);
    }

    #[test]
    fn seal_open_round_trip() {
        let (client, server) = channel_pair();
        let plaintext = br#"{"command":"TUNNEL","local_port":"3000"}"#;

        let record = client.seal(plaintext).unwrap();
        assert_eq!(record.len(), plaintext.len() + NONCE_SIZE + TAG_SIZE);
        assert_eq!(server.open(&record).unwrap(), plaintext);
    }

    #[test]
    fn round_trip_works_both_directions() {
        let (client, server) = channel_pair();
        let record = server.seal(b"HEARTBEAT").unwrap();
        assert_eq!(client.open(&record).unwrap(), b"HEARTBEAT");
    }

    #[test]
    fn round_trip_at_record_size_bound() {
        let (client, server) = channel_pair();
        let plaintext = vec![0x42u8; 1024 * 1024];
        let record = client.seal(&plaintext).unwrap();
        assert_eq!(server.open(&record).unwrap(), plaintext);
    }

    #[test]
    fn any_bit_flip_fails_decryption() {
        let (client, server) = channel_pair();
        let record = client.seal(b"sensitive payload").unwrap();

        for index in [0, NONCE_SIZE, record.len() - 1] {
            let mut tampered = record.clone();
            tampered[index] ^= 0x01;
            assert!(matches!(
                server.open(&tampered),
                Err(CryptoError::Decrypt)
            ));
        }
    }

    #[test]
    fn truncated_record_is_rejected() {
        let (client, server) = channel_pair();
        let record = client.seal(b"payload").unwrap();
        let err = server.open(&record[..NONCE_SIZE + TAG_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CryptoError::TruncatedRecord(27)));
    }

    #[test]
    fn wrong_session_key_fails() {
        let (client, _) = channel_pair();
        let (_, other_server) = channel_pair();
        let record = client.seal(b"payload").unwrap();
        assert!(other_server.open(&record).is_err());
    }

    #[test]
    fn nonces_are_fresh_per_record() {
        let (client, _) = channel_pair();
        let a = client.seal(b"x").unwrap();
        let b = client.seal(b"x").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }

    #[test]
    fn invalid_peer_key_is_rejected() {
        let keys = KeyExchange::generate();
        assert!(matches!(
            keys.into_channel("not base64 !!!"),
            Err(CryptoError::InvalidPublicKey(_))
        ));

        let keys = KeyExchange::generate();
        let bogus = BASE64.encode([0u8; 65]);
        assert!(matches!(
            keys.into_channel(&bogus),
            Err(CryptoError::InvalidPublicKey(_))
        ));
    }
}

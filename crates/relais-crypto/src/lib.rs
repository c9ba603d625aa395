//! Secure channel for the relais control stream.
//!
//! Key agreement is ECDH over P-256 with ephemeral keys generated per
//! session (forward secrecy); the symmetric key is derived with
//! HKDF-SHA256 and records are sealed with AES-256-GCM.

mod channel;
mod error;

pub use channel::{KeyExchange, SecureChannel, NONCE_SIZE, TAG_SIZE};
pub use error::CryptoError;

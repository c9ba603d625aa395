use thiserror::Error;

/// Secure-channel errors. All of them are fatal for the current session;
/// recovery requires a fresh handshake.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid peer public key: {0}")]
    InvalidPublicKey(String),

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: bad tag or corrupt record")]
    Decrypt,

    #[error("record too short: {0} bytes")]
    TruncatedRecord(usize),
}

//! Wire protocol for the relais control channel.
//!
//! The control channel carries a small closed set of JSON messages inside
//! one of three framings (binary handshake, encrypted record, legacy
//! plaintext line). [`messages`] defines the message set, [`codec`] the
//! framings.

pub mod codec;
pub mod messages;

pub use codec::{FrameError, FrameReader, MAX_HANDSHAKE_LEN, MAX_RECORD_LEN};
pub use messages::{Command, Status, TunnelProtocol, TunnelResponse};

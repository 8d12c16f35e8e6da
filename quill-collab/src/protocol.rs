//! Binary wire protocol for document sync and presence.
//!
//! Frames follow the y-sync convention: a variable-length unsigned
//! integer tag selects the channel, the body is channel-specific.
//!
//! ```text
//! ┌──────────┬───────────────────────────────────────────┐
//! │ type     │ body                                      │
//! │ varuint  │                                           │
//! ├──────────┼───────────────────────────────────────────┤
//! │ 0 = sync │ subtype varuint: 0 step1 (state vector)   │
//! │          │                  1 step2 (update)         │
//! │          │                  2 update                 │
//! │ 1 = aware│ awareness update byte array               │
//! └──────────┴───────────────────────────────────────────┘
//! ```
//!
//! Encoding and decoding delegate to the engine's own `yrs::sync`
//! implementation so we stay bit-compatible with standard clients.

use yrs::sync::{AwarenessUpdate, Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::StateVector;

/// Frame tag for sync messages.
pub const MSG_SYNC: u8 = 0;
/// Frame tag for awareness messages.
pub const MSG_AWARENESS: u8 = 1;

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    /// The frame could not be decoded.
    MalformedFrame(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::MalformedFrame(e) => write!(f, "Malformed frame: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a sync step 1 frame carrying the local state vector.
pub fn sync_step1(state_vector: &StateVector) -> Vec<u8> {
    Message::Sync(SyncMessage::SyncStep1(state_vector.clone())).encode_v1()
}

/// Encode a sync step 2 frame carrying a state diff.
pub fn sync_step2(update: Vec<u8>) -> Vec<u8> {
    Message::Sync(SyncMessage::SyncStep2(update)).encode_v1()
}

/// Encode an incremental update frame.
pub fn sync_update(update: Vec<u8>) -> Vec<u8> {
    Message::Sync(SyncMessage::Update(update)).encode_v1()
}

/// Encode an awareness update frame.
pub fn awareness(update: AwarenessUpdate) -> Vec<u8> {
    Message::Awareness(update).encode_v1()
}

/// Decode one incoming frame.
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    Message::decode_v1(frame).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

//! Serializable fault record.
//!
//! Errors raised by a device inside the worker process cannot be forwarded as
//! Rust values. The worker captures them as a small [`FaultRecord`]
//! (kind + message), serializes it as JSON into a fixed slot in the session
//! header, and the consumer decodes it on its next interaction.

use crate::consts::{FAULT_MESSAGE_CAPACITY, FAULT_SLOT_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a captured worker fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Device construction or `enter()` failed before readiness.
    Setup,
    /// Device `read()` failed mid-session.
    Runtime,
    /// Device produced a sample that does not match its schema.
    InvalidSample,
    /// Worker could not attach or validate the shared segment.
    Attach,
}

impl FaultKind {
    /// True for faults raised before readiness was signaled.
    #[inline]
    pub const fn is_setup(self) -> bool {
        matches!(self, Self::Setup | Self::Attach)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "setup",
            Self::Runtime => "runtime",
            Self::InvalidSample => "invalid sample",
            Self::Attach => "attach",
        };
        f.write_str(name)
    }
}

/// Fixed-capacity fault message.
pub type FaultMessage = heapless::String<FAULT_MESSAGE_CAPACITY>;

/// A captured worker error: kind and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    /// What failed
    pub kind: FaultKind,
    /// Human-readable description, truncated to [`FAULT_MESSAGE_CAPACITY`]
    pub message: FaultMessage,
}

impl FaultRecord {
    /// Build a record, truncating `message` on a char boundary if needed.
    pub fn new(kind: FaultKind, message: &str) -> Self {
        Self {
            kind,
            message: truncate_message(message, FAULT_MESSAGE_CAPACITY),
        }
    }

    /// Serialize into a buffer of at most [`FAULT_SLOT_SIZE`] bytes.
    ///
    /// Escaping can grow the JSON past the slot; the message is shortened
    /// until it fits.
    pub fn encode(&self) -> Vec<u8> {
        let mut record = self.clone();
        loop {
            match serde_json::to_vec(&record) {
                Ok(bytes) if bytes.len() <= FAULT_SLOT_SIZE => return bytes,
                Ok(_) => {
                    let keep = record.message.len() / 2;
                    record.message = truncate_message(&record.message, keep);
                }
                // A record of an enum and a string always serializes.
                Err(_) => return br#"{"kind":"runtime","message":""}"#.to_vec(),
            }
        }
    }

    /// Decode a record written by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl fmt::Display for FaultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fault: {}", self.kind, self.message)
    }
}

fn truncate_message(message: &str, max: usize) -> FaultMessage {
    let mut end = message.len().min(max);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = FaultMessage::new();
    // Cannot fail: `end` is within capacity.
    let _ = out.push_str(&message[..end]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let record = FaultRecord::new(FaultKind::Setup, "mouse not connected");
        let bytes = record.encode();
        assert!(bytes.len() <= FAULT_SLOT_SIZE);
        let decoded = FaultRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.to_string(), "setup fault: mouse not connected");
    }

    #[test]
    fn long_message_truncated_on_char_boundary() {
        let long = "é".repeat(FAULT_MESSAGE_CAPACITY);
        let record = FaultRecord::new(FaultKind::Runtime, &long);
        assert!(record.message.len() <= FAULT_MESSAGE_CAPACITY);
        assert!(record.message.chars().all(|c| c == 'é'));
    }

    #[test]
    fn escaped_message_still_fits_slot() {
        let quotes = "\"".repeat(FAULT_MESSAGE_CAPACITY);
        let record = FaultRecord::new(FaultKind::Runtime, &quotes);
        let bytes = record.encode();
        assert!(bytes.len() <= FAULT_SLOT_SIZE);
        let decoded = FaultRecord::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, FaultKind::Runtime);
        assert!(decoded.message.chars().all(|c| c == '"'));
    }

    #[test]
    fn setup_kinds() {
        assert!(FaultKind::Setup.is_setup());
        assert!(FaultKind::Attach.is_setup());
        assert!(!FaultKind::Runtime.is_setup());
        assert!(!FaultKind::InvalidSample.is_setup());
    }
}

//! Broadcast-log messages and their canonical byte encoding.
//!
//! Every participant signs and verifies the same canonical form, so the
//! encoding is fixed: the fields are concatenated in declaration order with
//! the offset as a big-endian u64 and the signature excluded.

use serde::{Deserialize, Serialize};

/// A single entry of the append-only broadcast log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub dkg_round_id: String,
    /// Monotonic position assigned by the log on append.
    #[serde(default)]
    pub offset: u64,
    /// Wire event name, read as plaintext by every log consumer.
    pub event: String,
    #[serde(default)]
    pub data: Vec<u8>,
    /// Ed25519 signature over [`Message::bytes`]. Empty until signed.
    #[serde(default)]
    pub signature: Vec<u8>,
    pub sender_addr: String,
    /// Empty for broadcasts; set for messages routed to a single node.
    #[serde(default)]
    pub recipient_addr: String,
}

impl Message {
    /// Whether this message should be handled by the node `username`.
    pub fn addressed_to(&self, username: &str) -> bool {
        self.recipient_addr.is_empty() || self.recipient_addr == username
    }

    /// Canonical byte encoding used for Ed25519 signing and verification.
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            self.id.len()
                + self.dkg_round_id.len()
                + 8
                + self.event.len()
                + self.data.len()
                + self.sender_addr.len()
                + self.recipient_addr.len(),
        );
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(self.dkg_round_id.as_bytes());
        buf.extend_from_slice(&self.offset.to_be_bytes());
        buf.extend_from_slice(self.event.as_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(self.sender_addr.as_bytes());
        buf.extend_from_slice(self.recipient_addr.as_bytes());
        buf
    }
}

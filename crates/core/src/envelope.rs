use std::fmt;

use serde::{Deserialize, Serialize};

/// One application message unit travelling through the network.
///
/// The routing layer only ever reads `to`; everything else is opaque and
/// delivered verbatim to the destination agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Agent address of the destination
    pub to: String,

    /// Agent address of the sender
    pub sender: String,

    /// Identifier of the application protocol the payload speaks
    pub protocol_id: String,

    /// Opaque payload bytes
    pub message: Vec<u8>,
}

impl Envelope {
    pub fn new(to: impl Into<String>, sender: impl Into<String>, protocol_id: impl Into<String>, message: Vec<u8>) -> Self {
        Self {
            to: to.into(),
            sender: sender.into(),
            protocol_id: protocol_id.into(),
            message,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope(to={}, sender={}, protocol={}, {} payload bytes)",
            self.to,
            self.sender,
            self.protocol_id,
            self.message.len()
        )
    }
}

use std::fmt;

use libp2p::kad;
use sha2::{Digest, Sha256};

/// Content identifier derived from an agent address.
///
/// The same address yields the same CID on every node; this is the anchor
/// that makes cross-node address lookup work. Usable directly as a
/// Kademlia record key and printable for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressCid([u8; 32]);

impl AddressCid {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The Kademlia key under which providers of this address are indexed.
    pub fn to_record_key(&self) -> kad::RecordKey {
        kad::RecordKey::new(&self.0)
    }
}

impl fmt::Display for AddressCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Derive the CID for an agent address.
///
/// SHA-256 over the raw UTF-8 bytes of the address.
pub fn compute_cid(address: &str) -> AddressCid {
    let digest = Sha256::digest(address.as_bytes());
    AddressCid(digest.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_deterministic() {
        assert_eq!(compute_cid("agent_alice"), compute_cid("agent_alice"));
    }

    #[test]
    fn test_cid_case_sensitive() {
        assert_ne!(compute_cid("agent_alice"), compute_cid("Agent_Alice"));
    }

    #[test]
    fn test_cid_distinct_addresses() {
        assert_ne!(compute_cid("agent_alice"), compute_cid("agent_bob"));
    }

    #[test]
    fn test_cid_display_is_hex() {
        let cid = compute_cid("agent_alice");
        let s = cid.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_record_key_matches_digest() {
        let cid = compute_cid("agent_alice");
        assert_eq!(cid.to_record_key().as_ref(), cid.as_bytes().as_slice());
    }
}

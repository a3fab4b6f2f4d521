//! Immutable ledger block and its SHA-512 digest.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// One record of the ledger.
///
/// `block_hash` covers `index`, `payload`, and `parent_hash`. The timestamp is
/// informational only and is not part of the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub parent_hash: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub block_hash: Vec<u8>,
}

impl Block {
    /// Index-0 block with empty payload and empty parent hash, stamped at
    /// the unix epoch so every replica holds an identical genesis.
    #[must_use]
    pub fn genesis() -> Self {
        let mut block = Self::new(0, Vec::new(), Vec::new());
        block.timestamp = 0;
        block
    }

    /// Build a block stamped with the current time and a freshly computed hash.
    #[must_use]
    pub fn new(index: u64, payload: Vec<u8>, parent_hash: Vec<u8>) -> Self {
        let mut block = Self {
            index,
            timestamp: chrono::Utc::now().timestamp(),
            payload,
            parent_hash,
            block_hash: Vec::new(),
        };
        block.block_hash = block.compute_hash();
        block
    }

    /// Successor of `parent` carrying `payload`.
    #[must_use]
    pub fn next(parent: &Self, payload: Vec<u8>) -> Self {
        Self::new(parent.index + 1, payload, parent.block_hash.clone())
    }

    /// SHA-512 over `index` (little-endian u64) || `payload` || `parent_hash`.
    #[must_use]
    pub fn compute_hash(&self) -> Vec<u8> {
        let mut hasher = Sha512::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(&self.payload);
        hasher.update(&self.parent_hash);
        hasher.finalize().to_vec()
    }

    #[must_use]
    pub fn has_valid_hash(&self) -> bool {
        self.block_hash == self.compute_hash()
    }

    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Short hex prefix of the block hash for log lines.
    #[must_use]
    pub fn short_hash(&self) -> String {
        let mut short = hex::encode(&self.block_hash);
        short.truncate(16);
        short
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_has_empty_fields_and_valid_hash() {
        let genesis = Block::genesis();
        assert_eq!(genesis.index, 0);
        assert!(genesis.payload.is_empty());
        assert!(genesis.parent_hash.is_empty());
        assert_eq!(genesis.block_hash.len(), 64);
        assert!(genesis.has_valid_hash());
    }

    #[test]
    fn genesis_hash_is_deterministic() {
        assert_eq!(Block::genesis().block_hash, Block::genesis().block_hash);
    }

    #[test]
    fn next_links_to_parent() {
        let genesis = Block::genesis();
        let child = Block::next(&genesis, b"manifest".to_vec());
        assert_eq!(child.index, 1);
        assert_eq!(child.parent_hash, genesis.block_hash);
        assert!(child.has_valid_hash());
    }

    #[test]
    fn timestamp_is_not_hashed() {
        let mut block = Block::next(&Block::genesis(), b"a".to_vec());
        block.timestamp += 3600;
        assert!(block.has_valid_hash());
    }

    #[test]
    fn tampering_breaks_hash() {
        let original = Block::next(&Block::genesis(), b"abc".to_vec());

        let mut payload = original.clone();
        payload.payload[0] ^= 1;
        assert!(!payload.has_valid_hash());

        let mut index = original.clone();
        index.index += 1;
        assert!(!index.has_valid_hash());

        let mut parent = original;
        parent.parent_hash[10] ^= 0x80;
        assert!(!parent.has_valid_hash());
    }

    #[test]
    fn json_uses_lowercase_hex() {
        let block = Block::new(2, vec![0xAB, 0x01], vec![0xFF]);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["payload"], "ab01");
        assert_eq!(json["parent_hash"], "ff");
        let hash = json["block_hash"].as_str().unwrap();
        assert_eq!(hash.len(), 128);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));

        let decoded: Block = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        let raw = r#"{"index":1,"timestamp":0,"payload":"zz","parent_hash":"","block_hash":""}"#;
        assert!(serde_json::from_str::<Block>(raw).is_err());
        let odd = r#"{"index":1,"timestamp":0,"payload":"abc","parent_hash":"","block_hash":""}"#;
        assert!(serde_json::from_str::<Block>(odd).is_err());

        let upper = r#"{"index":1,"timestamp":0,"payload":"0A0b","parent_hash":"","block_hash":""}"#;
        let block: Block = serde_json::from_str(upper).unwrap();
        assert_eq!(block.payload, vec![0x0a, 0x0b]);
    }
}

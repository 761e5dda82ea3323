//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data. Block numbers
//! are big-endian and come first, so keys sort by block in RocksDB and a
//! "delete everything from block N" is a forward scan from `prefix + N`.

use alloy_primitives::B256;

/// Meta ID of the last scanned block.
pub const META_LAST_SCANNED: u8 = 0x01;

/// Encode a decoded-call key.
///
/// Format: byte 'F' (0x46) + block_number (8 bytes, big-endian) + tx_hash (32 bytes)
/// Total length: 41 bytes
pub fn encode_call_key(block: u64, tx_hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(b'F');
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(tx_hash.as_slice());
    key
}

/// Encode a decoded-event key.
///
/// Format: byte 'E' (0x45) + block_number (8 bytes, big-endian) + tx_hash (32 bytes)
/// + log_index (8 bytes, big-endian)
/// Total length: 49 bytes
pub fn encode_event_key(block: u64, tx_hash: B256, log_index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(49);
    key.push(b'E');
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(tx_hash.as_slice());
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}

/// Encode an indexed block header key.
///
/// Format: byte 'B' (0x42) + block_number (8 bytes, big-endian)
/// Total length: 9 bytes
pub fn encode_block_key(block: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'B');
    key.extend_from_slice(&block.to_be_bytes());
    key
}

/// Encode an indexed transaction key.
///
/// Format: byte 'T' (0x54) + block_number (8 bytes, big-endian) + tx_index (8 bytes, big-endian)
/// Total length: 17 bytes
pub fn encode_transaction_key(block: u64, tx_index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(b'T');
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(&tx_index.to_be_bytes());
    key
}

/// Prefix shared by every key of `prefix` at or after `block`.
///
/// Useful as the starting point of a range scan.
pub fn block_prefix(prefix: u8, block: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(prefix);
    key.extend_from_slice(&block.to_be_bytes());
    key
}

/// Read the block number out of a block-ordered key.
pub fn decode_block_number(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(1..9)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Encode a meta key.
///
/// Format: byte 'M' (0x4D) + meta_id (1 byte)
/// Total length: 2 bytes
///
/// Meta IDs:
/// - 0x01: last scanned block
pub fn encode_meta_key(meta_id: u8) -> Vec<u8> {
    vec![b'M', meta_id]
}

//! Contract list and ABI loading
//!
//! Contract files hold one address per line; empty lines and lines
//! starting with '#' are skipped. An ABI is either a JSON file or the name
//! of a built-in ABI.

use crate::abi::AbiDecoder;
use crate::contracts::builtin_abi;
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Load contract addresses from a file.
///
/// # Example file format:
/// ```text
/// # USDT
/// 0xdAC17F958D2ee523a2206206994597C13D831ec7
/// ```
pub fn load_addresses(path: &Path) -> Result<Vec<Address>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read contracts file: {:?}", path))?;

    let mut addresses = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let address = parse_address(line)
            .with_context(|| format!("Invalid address on line {}: {}", line_num + 1, line))?;
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }

    if addresses.is_empty() {
        anyhow::bail!("Contracts file {:?} lists no addresses", path);
    }
    Ok(addresses)
}

/// Merge addresses given on the command line with those of a contracts file.
pub fn collect_addresses(cli: &[String], file: Option<&Path>) -> Result<Vec<Address>> {
    let mut addresses = match file {
        Some(path) => load_addresses(path)?,
        None => Vec::new(),
    };
    for value in cli {
        let address = parse_address(value)?;
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    if addresses.is_empty() {
        anyhow::bail!("No contract addresses given (use --contract or --contracts-file)");
    }
    Ok(addresses)
}

/// Build a decoder from a built-in ABI name (`erc20`, `erc721`) or a JSON file.
///
/// Accepts either a bare ABI array or a compiler artifact with an `abi` field.
pub fn load_abi(name_or_path: &str) -> Result<AbiDecoder> {
    if let Some(json) = builtin_abi(name_or_path) {
        return AbiDecoder::from_json(json)
            .with_context(|| format!("Built-in ABI {} is invalid", name_or_path));
    }

    let contents = fs::read_to_string(name_or_path)
        .with_context(|| format!("Failed to read ABI file: {}", name_or_path))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("ABI file is not JSON: {}", name_or_path))?;
    let abi = match value.get("abi") {
        Some(abi) => abi.clone(),
        None => value,
    };
    AbiDecoder::from_json(&abi.to_string()).with_context(|| format!("Invalid ABI in {}", name_or_path))
}

/// Parse a 20-byte address, with or without 0x prefix.
pub fn parse_address(s: &str) -> Result<Address> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 20 {
        anyhow::bail!("Address must be 20 bytes (40 hex chars), got {} bytes", bytes.len());
    }
    Ok(Address::from_slice(&bytes))
}

/// Parse a 32-byte hash, with or without 0x prefix.
pub fn parse_hash(s: &str) -> Result<B256> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("Hash must be 32 bytes (64 hex chars), got {} bytes", bytes.len());
    }
    Ok(B256::from_slice(&bytes))
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).with_context(|| format!("Invalid hex: {}", s))
}

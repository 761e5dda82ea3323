//! Built-in contract ABIs
//!
//! Standard token interfaces that can be selected by name instead of
//! passing an ABI file. The ERC-20 ABI includes the common mintable
//! extension.

/// ERC-20 token interface with `mint(address,uint256)`.
pub const ERC20_ABI: &str = r#"[
  {"type": "function", "name": "name", "stateMutability": "view", "inputs": [],
   "outputs": [{"name": "", "type": "string"}]},
  {"type": "function", "name": "symbol", "stateMutability": "view", "inputs": [],
   "outputs": [{"name": "", "type": "string"}]},
  {"type": "function", "name": "decimals", "stateMutability": "view", "inputs": [],
   "outputs": [{"name": "", "type": "uint8"}]},
  {"type": "function", "name": "totalSupply", "stateMutability": "view", "inputs": [],
   "outputs": [{"name": "", "type": "uint256"}]},
  {"type": "function", "name": "balanceOf", "stateMutability": "view",
   "inputs": [{"name": "account", "type": "address"}],
   "outputs": [{"name": "", "type": "uint256"}]},
  {"type": "function", "name": "allowance", "stateMutability": "view",
   "inputs": [{"name": "owner", "type": "address"}, {"name": "spender", "type": "address"}],
   "outputs": [{"name": "", "type": "uint256"}]},
  {"type": "function", "name": "transfer", "stateMutability": "nonpayable",
   "inputs": [{"name": "to", "type": "address"}, {"name": "amount", "type": "uint256"}],
   "outputs": [{"name": "", "type": "bool"}]},
  {"type": "function", "name": "approve", "stateMutability": "nonpayable",
   "inputs": [{"name": "spender", "type": "address"}, {"name": "amount", "type": "uint256"}],
   "outputs": [{"name": "", "type": "bool"}]},
  {"type": "function", "name": "transferFrom", "stateMutability": "nonpayable",
   "inputs": [{"name": "from", "type": "address"}, {"name": "to", "type": "address"},
              {"name": "amount", "type": "uint256"}],
   "outputs": [{"name": "", "type": "bool"}]},
  {"type": "function", "name": "mint", "stateMutability": "nonpayable",
   "inputs": [{"name": "account", "type": "address"}, {"name": "amount", "type": "uint256"}],
   "outputs": []},
  {"type": "event", "name": "Transfer", "anonymous": false,
   "inputs": [{"name": "from", "type": "address", "indexed": true},
              {"name": "to", "type": "address", "indexed": true},
              {"name": "value", "type": "uint256", "indexed": false}]},
  {"type": "event", "name": "Approval", "anonymous": false,
   "inputs": [{"name": "owner", "type": "address", "indexed": true},
              {"name": "spender", "type": "address", "indexed": true},
              {"name": "value", "type": "uint256", "indexed": false}]}
]"#;

/// ERC-721 non-fungible token interface.
pub const ERC721_ABI: &str = r#"[
  {"type": "function", "name": "balanceOf", "stateMutability": "view",
   "inputs": [{"name": "owner", "type": "address"}],
   "outputs": [{"name": "", "type": "uint256"}]},
  {"type": "function", "name": "ownerOf", "stateMutability": "view",
   "inputs": [{"name": "tokenId", "type": "uint256"}],
   "outputs": [{"name": "", "type": "address"}]},
  {"type": "function", "name": "tokenURI", "stateMutability": "view",
   "inputs": [{"name": "tokenId", "type": "uint256"}],
   "outputs": [{"name": "", "type": "string"}]},
  {"type": "function", "name": "approve", "stateMutability": "nonpayable",
   "inputs": [{"name": "to", "type": "address"}, {"name": "tokenId", "type": "uint256"}],
   "outputs": []},
  {"type": "function", "name": "setApprovalForAll", "stateMutability": "nonpayable",
   "inputs": [{"name": "operator", "type": "address"}, {"name": "approved", "type": "bool"}],
   "outputs": []},
  {"type": "function", "name": "transferFrom", "stateMutability": "nonpayable",
   "inputs": [{"name": "from", "type": "address"}, {"name": "to", "type": "address"},
              {"name": "tokenId", "type": "uint256"}],
   "outputs": []},
  {"type": "function", "name": "safeTransferFrom", "stateMutability": "nonpayable",
   "inputs": [{"name": "from", "type": "address"}, {"name": "to", "type": "address"},
              {"name": "tokenId", "type": "uint256"}],
   "outputs": []},
  {"type": "function", "name": "safeTransferFrom", "stateMutability": "nonpayable",
   "inputs": [{"name": "from", "type": "address"}, {"name": "to", "type": "address"},
              {"name": "tokenId", "type": "uint256"}, {"name": "data", "type": "bytes"}],
   "outputs": []},
  {"type": "event", "name": "Transfer", "anonymous": false,
   "inputs": [{"name": "from", "type": "address", "indexed": true},
              {"name": "to", "type": "address", "indexed": true},
              {"name": "tokenId", "type": "uint256", "indexed": true}]},
  {"type": "event", "name": "Approval", "anonymous": false,
   "inputs": [{"name": "owner", "type": "address", "indexed": true},
              {"name": "approved", "type": "address", "indexed": true},
              {"name": "tokenId", "type": "uint256", "indexed": true}]},
  {"type": "event", "name": "ApprovalForAll", "anonymous": false,
   "inputs": [{"name": "owner", "type": "address", "indexed": true},
              {"name": "operator", "type": "address", "indexed": true},
              {"name": "approved", "type": "bool", "indexed": false}]}
]"#;

/// Look up a built-in ABI by name (case-insensitive).
pub fn builtin_abi(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "erc20" => Some(ERC20_ABI),
        "erc721" => Some(ERC721_ABI),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiDecoder;

    #[test]
    fn test_builtin_abis_build_decoders() {
        for name in ["erc20", "ERC721"] {
            let json = builtin_abi(name).unwrap();
            let decoder = AbiDecoder::from_json(json).unwrap();
            assert!(!decoder.event_signatures().is_empty());
        }
        assert!(builtin_abi("erc1155").is_none());
    }
}

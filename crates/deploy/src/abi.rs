//! ABI encoding for constructor arguments and configuration calls.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, Bytes, U256, keccak256},
};

/// A fully resolved argument, ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiArg {
    Address(Address),
    Uint(U256),
    Bool(bool),
    String(String),
    Bytes(Bytes),
}

impl AbiArg {
    fn to_sol_value(&self) -> DynSolValue {
        match self {
            Self::Address(a) => DynSolValue::Address(*a),
            Self::Uint(v) => DynSolValue::Uint(*v, 256),
            Self::Bool(b) => DynSolValue::Bool(*b),
            Self::String(s) => DynSolValue::String(s.clone()),
            Self::Bytes(b) => DynSolValue::Bytes(b.to_vec()),
        }
    }

    /// Human-readable form stored in deployment records.
    pub fn display_value(&self) -> String {
        match self {
            Self::Address(a) => a.to_string(),
            Self::Uint(v) => v.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::String(s) => s.clone(),
            Self::Bytes(b) => b.to_string(),
        }
    }
}

/// ABI-encode arguments as a parameter list (no selector).
pub fn encode_args(args: &[AbiArg]) -> Vec<u8> {
    if args.is_empty() {
        return Vec::new();
    }
    DynSolValue::Tuple(args.iter().map(AbiArg::to_sol_value).collect()).abi_encode_params()
}

/// Init code for a contract creation: bytecode followed by the encoded constructor arguments.
pub fn encode_deploy(bytecode: &[u8], args: &[AbiArg]) -> Bytes {
    let mut data = bytecode.to_vec();
    data.extend(encode_args(args));
    data.into()
}

/// First four bytes of the keccak hash of a method signature such as `addMinter(address)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.replace(' ', "").as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for a method call: selector followed by the encoded arguments.
pub fn encode_call(signature: &str, args: &[AbiArg]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(encode_args(args));
    data.into()
}

/// Decode a single return value of the given type.
pub fn decode_return(ty: &DynSolType, data: &[u8]) -> Option<DynSolValue> {
    if data.is_empty() {
        return None;
    }
    ty.abi_decode(data).ok()
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::address;

    use super::*;

    #[test]
    fn test_selector_matches_known_values() {
        // ERC-20 transfer(address,uint256)
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        // Ownable transferOwnership(address)
        assert_eq!(selector("transferOwnership(address)"), [0xf2, 0xfd, 0xe3, 0x8b]);
        assert_eq!(selector("transfer(address, uint256)"), selector("transfer(address,uint256)"));
    }

    #[test]
    fn test_encode_call_address_argument() {
        let target = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
        let data = encode_call("transferOwnership(address)", &[AbiArg::Address(target)]);

        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[..4], &[0xf2, 0xfd, 0xe3, 0x8b]);
        assert_eq!(
            hex::encode(&data[4..]),
            "00000000000000000000000070997970c51812dc3a010c7d01b50e0d17dc79c8"
        );
    }

    #[test]
    fn test_encode_deploy_appends_args() {
        let bytecode = [0x60, 0x80, 0x60, 0x40];
        assert_eq!(encode_deploy(&bytecode, &[]).as_ref(), &bytecode);

        let data = encode_deploy(&bytecode, &[AbiArg::Uint(U256::from(1)), AbiArg::Bool(true)]);
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(data[4 + 31], 1);
        assert_eq!(data[4 + 63], 1);
    }

    #[test]
    fn test_decode_string_return() {
        let encoded = DynSolValue::String("Open Source Rewards".to_string()).abi_encode();
        let value = decode_return(&DynSolType::String, &encoded).unwrap();
        assert_eq!(value.as_str(), Some("Open Source Rewards"));
        assert!(decode_return(&DynSolType::String, &[]).is_none());
    }
}

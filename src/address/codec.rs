//! Native <-> canonical address translation

use super::{CanonicalAddress, ChainFamily};
use crate::error::{RelayerResult, SwapError};

use ethers::types::Address;
use ethers::utils::to_checksum;

/// Version byte of Tron mainnet/testnet account addresses
pub const TRON_ADDRESS_PREFIX: u8 = 0x41;

const TRON_BASE58_LEN: usize = 34;

/// Parse a chain-native address into its canonical form
pub fn to_canonical(native: &str, family: ChainFamily) -> RelayerResult<CanonicalAddress> {
    let native = native.trim();
    match family {
        ChainFamily::Evm => parse_evm(native),
        ChainFamily::Tron => {
            if native.starts_with('T') && native.len() == TRON_BASE58_LEN {
                parse_tron_base58(native)
            } else {
                remove_prefix(native).map_err(|_| invalid(ChainFamily::Tron, native))
            }
        }
    }
}

/// Render a canonical address in the family's preferred native form
pub fn from_canonical(address: &CanonicalAddress, family: ChainFamily) -> String {
    match family {
        ChainFamily::Evm => to_checksum(&address.h160(), None),
        ChainFamily::Tron => {
            let mut payload = Vec::with_capacity(21);
            payload.push(TRON_ADDRESS_PREFIX);
            payload.extend_from_slice(address.as_bytes());
            bs58::encode(payload).with_check().into_string()
        }
    }
}

/// Tron 21-byte hex form (`41` + 40 hex), as TronGrid's `visible=false` APIs expect
pub fn to_tron_hex(address: &CanonicalAddress) -> String {
    format!("41{}", hex::encode(address.as_bytes()))
}

/// Normalize a `0x`-prefixed 20-byte hex or a `41`-prefixed 21-byte hex address
pub fn remove_prefix(hex_str: &str) -> RelayerResult<CanonicalAddress> {
    let lower = hex_str.to_ascii_lowercase();
    let body = if let Some(rest) = lower.strip_prefix("0x") {
        rest
    } else if let Some(rest) = lower.strip_prefix("41") {
        rest
    } else {
        return Err(invalid(ChainFamily::Tron, hex_str));
    };

    decode_hex20(body).ok_or_else(|| invalid(ChainFamily::Tron, hex_str))
}

fn parse_evm(native: &str) -> RelayerResult<CanonicalAddress> {
    let body = native
        .strip_prefix("0x")
        .or_else(|| native.strip_prefix("0X"))
        .ok_or_else(|| invalid(ChainFamily::Evm, native))?;
    let bytes = decode_hex20(body).ok_or_else(|| invalid(ChainFamily::Evm, native))?;

    // All-lowercase and all-uppercase inputs carry no checksum
    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        let expected = to_checksum(&Address::from(*bytes.as_bytes()), None);
        if expected[2..] != *body {
            return Err(invalid(ChainFamily::Evm, native));
        }
    }

    Ok(bytes)
}

fn parse_tron_base58(native: &str) -> RelayerResult<CanonicalAddress> {
    let payload = bs58::decode(native)
        .with_check(None)
        .into_vec()
        .map_err(|_| invalid(ChainFamily::Tron, native))?;

    match payload.split_first() {
        Some((&TRON_ADDRESS_PREFIX, rest)) if rest.len() == 20 => {
            Ok(CanonicalAddress::from_slice(rest))
        }
        _ => Err(invalid(ChainFamily::Tron, native)),
    }
}

fn decode_hex20(body: &str) -> Option<CanonicalAddress> {
    if body.len() != 40 {
        return None;
    }
    let bytes = hex::decode(body).ok()?;
    Some(CanonicalAddress::from_slice(&bytes))
}

fn invalid(family: ChainFamily, input: &str) -> SwapError {
    SwapError::InvalidAddressFormat {
        family,
        input: input.to_string(),
    }
}

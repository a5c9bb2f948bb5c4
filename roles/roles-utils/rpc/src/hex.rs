//! `0x`-prefixed hex quantities of unbounded width.
//!
//! Difficulties and exchange rates do not fit in any primitive integer, so
//! everything decodes to `BigUint` first and narrows only where the value is
//! known to be small (block numbers, timestamps).

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde_json::Value;

use crate::error::RpcError;

/// Decode a `0x`-prefixed hex string.
pub fn decode_biguint(value: &str) -> Result<BigUint, RpcError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| RpcError::Decode(format!("missing 0x prefix: {:?}", value)))?;

    if digits.is_empty() {
        return Err(RpcError::Decode(format!("empty hex quantity: {:?}", value)));
    }

    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| RpcError::Decode(format!("invalid hex quantity: {:?}", value)))
}

/// Decode a hex quantity that must fit in 64 bits.
pub fn decode_u64(value: &str) -> Result<u64, RpcError> {
    decode_biguint(value)?
        .to_u64()
        .ok_or_else(|| RpcError::Decode(format!("quantity exceeds 64 bits: {}", value)))
}

/// Decode a JSON value that should hold a hex string.
pub fn biguint_from_value(value: &Value) -> Result<BigUint, RpcError> {
    match value {
        Value::String(s) => decode_biguint(s),
        other => Err(RpcError::Decode(format!(
            "expected hex string, got {}",
            other
        ))),
    }
}

/// Decode a JSON value holding a hex quantity that must fit in 64 bits.
pub fn u64_from_value(value: &Value) -> Result<u64, RpcError> {
    match value {
        Value::String(s) => decode_u64(s),
        other => Err(RpcError::Decode(format!(
            "expected hex string, got {}",
            other
        ))),
    }
}

/// Encode as lowercase `0x`-prefixed hex.
pub fn encode_biguint(value: &BigUint) -> String {
    format!("0x{}", value.to_str_radix(16))
}

/// Encode a block number or other small quantity.
pub fn encode_u64(value: u64) -> String {
    format!("0x{:x}", value)
}

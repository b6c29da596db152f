//! Hex quantity codec.
//!
//! The node encodes numbers as `0x`-prefixed big-endian hex without leading
//! zeros (`0x0`, `0x1a`) and byte strings as `0x`-prefixed hex data.

use crate::error::TypesError;

fn digits(hex: &str) -> Result<&str, TypesError> {
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .ok_or_else(|| TypesError::InvalidQuantity(hex.to_string()))?;
    if digits.is_empty() {
        return Err(TypesError::InvalidQuantity(hex.to_string()));
    }
    Ok(digits)
}

/// Parse hex u64.
pub fn parse_u64(hex: &str) -> Result<u64, TypesError> {
    let digits = digits(hex)?;
    if digits.trim_start_matches('0').len() > 16 {
        return Err(TypesError::QuantityOverflow(hex.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|e| TypesError::InvalidQuantity(e.to_string()))
}

/// Parse hex u128.
pub fn parse_u128(hex: &str) -> Result<u128, TypesError> {
    let digits = digits(hex)?;
    if digits.trim_start_matches('0').len() > 32 {
        return Err(TypesError::QuantityOverflow(hex.to_string()));
    }
    u128::from_str_radix(digits, 16).map_err(|e| TypesError::InvalidQuantity(e.to_string()))
}

/// Format a number as a hex quantity.
pub fn format_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

/// Format bytes as `0x` hex data.
pub fn format_data(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// Parse `0x` hex data. `0x` alone is the empty byte string.
pub fn parse_data(hex: &str) -> Result<Vec<u8>, TypesError> {
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    Ok(hex::decode(digits)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("0x64").unwrap(), 100);
        assert_eq!(parse_u64("0x0").unwrap(), 0);
        assert_eq!(parse_u64("0x00000000000000000001").unwrap(), 1);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_u64("64").is_err());
        assert!(parse_u64("0x").is_err());
        assert!(parse_u64("0xg1").is_err());
        assert!(matches!(
            parse_u64("0x10000000000000000"),
            Err(TypesError::QuantityOverflow(_))
        ));
    }

    #[test]
    fn test_parse_u128_gas_price() {
        assert_eq!(parse_u128("0x3b9aca00").unwrap(), 1_000_000_000);
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(0), "0x0");
        assert_eq!(format_quantity(21_000), "0x5208");
    }

    #[test]
    fn test_data_codec() {
        assert_eq!(format_data(&[0x60, 0x80]), "0x6080");
        assert_eq!(parse_data("0x6080").unwrap(), vec![0x60, 0x80]);
        assert!(parse_data("0x").unwrap().is_empty());
        assert!(parse_data("0x6").is_err());
    }
}

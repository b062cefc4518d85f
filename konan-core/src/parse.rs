//! パース関連のユーティリティ関数

use crate::value::ValueLocation;
use anyhow::Result;
use konan_target::Register;

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート
///
/// # Examples
/// ```
/// use konan_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid hexadecimal address '{}': {}", s, e))
    } else {
        s.parse::<u64>()
            .or_else(|_| u64::from_str_radix(s, 16))
            .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
    }
}

/// 値の格納場所をパース（`$rdi` のようなレジスタ名、またはアドレス）
pub fn parse_location(s: &str) -> Result<ValueLocation> {
    let s = s.trim();
    if s.starts_with('$') {
        return Register::parse(s)
            .map(ValueLocation::Register)
            .ok_or_else(|| anyhow::anyhow!("Unknown register '{}'", s));
    }
    parse_address(s).map(ValueLocation::Memory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_hex() {
        assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0X1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0xabcd").unwrap(), 0xabcd);
        assert_eq!(parse_address("0xABCD").unwrap(), 0xabcd);
    }

    #[test]
    fn test_parse_address_dec() {
        assert_eq!(parse_address("1234").unwrap(), 1234);
        assert_eq!(parse_address("9999").unwrap(), 9999);
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!(parse_address("xyz").is_err());
        assert!(parse_address("0xghij").is_err());
    }

    #[test]
    fn test_parse_location() {
        assert_eq!(
            parse_location("$rdi").unwrap(),
            ValueLocation::Register(Register::Rdi)
        );
        assert_eq!(
            parse_location("0x7ffe0010").unwrap(),
            ValueLocation::Memory(0x7ffe0010)
        );
        assert!(parse_location("$xmm0").is_err());
    }
}

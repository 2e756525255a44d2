// SPDX-License-Identifier: GPL-3.0-only
//! Byte buffers as scripting sequences
//!
//! Scripting hosts exchange buffers as ordered, 1-indexed sequences of
//! integers 0-255. Conversion into bytes is strict: anything that is not an
//! integer in range is rejected, never clamped or truncated.

use std::fmt;

use crate::error::{Error, Result};

/// One element of a scripting sequence
#[derive(Debug, Clone, PartialEq)]
pub enum SeqValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Nil,
}

impl SeqValue {
    /// Parse a command-line token; numbers accept decimal or `0x` hex
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            Some(hex) => i64::from_str_radix(hex, 16).ok().map(|v| v as f64),
            None => token.parse::<f64>().ok(),
        };
        match parsed {
            Some(value) => SeqValue::Number(value),
            None => SeqValue::Text(token.to_string()),
        }
    }
}

impl fmt::Display for SeqValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqValue::Number(n) => write!(f, "{n}"),
            SeqValue::Text(s) => write!(f, "{s}"),
            SeqValue::Bool(b) => write!(f, "{b}"),
            SeqValue::Nil => write!(f, "nil"),
        }
    }
}

/// Convert a sequence into bytes, rejecting anything outside 0-255
pub fn bytes_from_sequence(values: &[SeqValue]) -> Result<Vec<u8>> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            // Errors report the 1-based position a script would use
            let index = i + 1;
            let SeqValue::Number(number) = value else {
                return Err(Error::ByteSequence {
                    index,
                    reason: "is not a number".to_string(),
                });
            };
            if !number.is_finite() || number.fract() != 0.0 {
                return Err(Error::ByteSequence {
                    index,
                    reason: "value must be an integer".to_string(),
                });
            }
            if *number < 0.0 || *number > 255.0 {
                return Err(Error::ByteSequence {
                    index,
                    reason: format!("value {number} out of range"),
                });
            }
            Ok(*number as u8)
        })
        .collect()
}

pub fn bytes_to_sequence(data: &[u8]) -> Vec<SeqValue> {
    data.iter().map(|&b| SeqValue::Number(f64::from(b))).collect()
}

/// Render bytes as `[0x00 0xFF 0x80]`
pub fn format_bytes(data: &[u8]) -> String {
    let elems: Vec<String> = data.iter().map(|b| format!("0x{b:02X}")).collect();
    format!("[{}]", elems.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(values: &[f64]) -> Vec<SeqValue> {
        values.iter().copied().map(SeqValue::Number).collect()
    }

    #[test]
    fn test_valid_sequence() {
        let data = bytes_from_sequence(&numbers(&[0.0, 255.0, 128.0])).unwrap();
        assert_eq!(data, vec![0x00, 0xFF, 0x80]);
        assert!(bytes_from_sequence(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = bytes_from_sequence(&numbers(&[1.0, 256.0])).unwrap_err();
        assert!(matches!(err, Error::ByteSequence { index: 2, .. }));
        assert_eq!(err.to_string(), "table index 2 value 256 out of range");

        let err = bytes_from_sequence(&numbers(&[-1.0])).unwrap_err();
        assert!(matches!(err, Error::ByteSequence { index: 1, .. }));
    }

    #[test]
    fn test_non_integer_rejected() {
        assert!(bytes_from_sequence(&numbers(&[1.5])).is_err());
        assert!(bytes_from_sequence(&numbers(&[f64::NAN])).is_err());

        let err = bytes_from_sequence(&[SeqValue::Number(1.0), SeqValue::Text("a".into())])
            .unwrap_err();
        assert_eq!(err.to_string(), "table index 2 is not a number");
        assert!(bytes_from_sequence(&[SeqValue::Bool(true)]).is_err());
        assert!(bytes_from_sequence(&[SeqValue::Nil]).is_err());
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(SeqValue::parse("0x1A"), SeqValue::Number(26.0));
        assert_eq!(SeqValue::parse(" 12 "), SeqValue::Number(12.0));
        assert_eq!(SeqValue::parse("-1"), SeqValue::Number(-1.0));
        assert_eq!(SeqValue::parse("abc"), SeqValue::Text("abc".to_string()));
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_bytes(&[0x00, 0xFF, 0x80]), "[0x00 0xFF 0x80]");
        assert_eq!(format_bytes(&[]), "[]");
        assert_eq!(bytes_to_sequence(&[7, 9]), numbers(&[7.0, 9.0]));
    }
}

//! Field elements
//!
//! Values the proving system treats as field elements (owner keys, token ids,
//! blinding factors, memos) travel as arbitrary-precision unsigned integers.
//! The JSON form is a decimal string, matching what the settlement layer emits.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::{Num, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("empty field element")]
    Empty,

    #[error("invalid field element: {0:?}")]
    Invalid(String),
}

/// An unsigned integer in the proving system's scalar field
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldElement(BigUint);

impl FieldElement {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    pub fn from_biguint(value: BigUint) -> Self {
        Self(value)
    }

    /// Interpret little-endian bytes as an unsigned integer
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        Self(BigUint::from_bytes_le(bytes))
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Reduce modulo 2^256 and serialize little-endian into 32 bytes.
    ///
    /// Bytes above the 32nd are dropped, shorter values are zero-padded.
    pub fn to_le_bytes_32(&self) -> [u8; 32] {
        let bytes = self.0.to_bytes_le();
        let mut out = [0u8; 32];
        let n = bytes.len().min(32);
        out[..n].copy_from_slice(&bytes[..n]);
        out
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl FromStr for FieldElement {
    type Err = FieldError;

    /// Parse a decimal string or a `0x`-prefixed hex string
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FieldError::Empty);
        }

        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) if !hex.is_empty() => BigUint::from_str_radix(hex, 16),
            Some(_) => return Err(FieldError::Invalid(s.to_string())),
            None => BigUint::from_str_radix(s, 10),
        };

        parsed
            .map(Self)
            .map_err(|_| FieldError::Invalid(s.to_string()))
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FieldElementVisitor)
    }
}

struct FieldElementVisitor;

impl<'de> de::Visitor<'de> for FieldElementVisitor {
    type Value = FieldElement;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal string, a 0x-prefixed hex string or an unsigned integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(FieldElement::from_u64(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(FieldElement::from_u64)
            .map_err(|_| E::custom(format!("negative field element: {v}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_and_hex() {
        let a: FieldElement = "255".parse().unwrap();
        let b: FieldElement = "0xff".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "255");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<FieldElement>(), Err(FieldError::Empty));
        assert!("12a".parse::<FieldElement>().is_err());
        assert!("0x".parse::<FieldElement>().is_err());
        assert!("-5".parse::<FieldElement>().is_err());
    }

    #[test]
    fn test_le_bytes_reduce_mod_2_256() {
        // 2^256 + 7 reduces to 7
        let big = (BigUint::from(1u8) << 256) + BigUint::from(7u8);
        let fe = FieldElement::from_biguint(big);
        let mut expected = [0u8; 32];
        expected[0] = 7;
        assert_eq!(fe.to_le_bytes_32(), expected);

        let small = FieldElement::from_u64(0x0102);
        let bytes = small.to_le_bytes_32();
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[1], 0x01);
        assert!(bytes[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_json_accepts_string_and_number() {
        let from_str: FieldElement = serde_json::from_str("\"12345678901234567890123\"").unwrap();
        assert_eq!(from_str.to_string(), "12345678901234567890123");

        let from_num: FieldElement = serde_json::from_str("42").unwrap();
        assert_eq!(from_num, FieldElement::from_u64(42));

        assert_eq!(serde_json::to_string(&from_num).unwrap(), "\"42\"");
        assert!(serde_json::from_str::<FieldElement>("-1").is_err());
    }
}

use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};
use std::str::FromStr;

use itertools::izip;
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use thiserror::Error;

use crate::consts::{ID_LEN, ID_LEN_BITS};

/// 160-bit node or key identifier.
///
/// Stored big-endian, so the derived lexicographic order is the numeric
/// order and XOR distances compare directly.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Id(pub [u8; ID_LEN]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("empty identifier")]
    Empty,
    #[error("invalid decimal digit {0:?}")]
    InvalidDigit(char),
    #[error("identifier does not fit in 160 bits")]
    Overflow,
}

impl Id {
    pub const ZERO: Id = Id([0u8; ID_LEN]);
    pub const MAX: Id = Id([0xffu8; ID_LEN]);

    pub fn from_u64(value: u64) -> Id {
        let mut out = [0u8; ID_LEN];
        out[ID_LEN - 8..].copy_from_slice(&value.to_be_bytes());
        Id(out)
    }

    /// Identifier with only the given bit set, counted from the least
    /// significant one: `set_bit(0)` is 1, `set_bit(159)` is the top half
    /// of the space.
    pub fn set_bit(bit: u32) -> Id {
        debug_assert!((bit as usize) < ID_LEN_BITS);
        let mut out = [0u8; ID_LEN];
        out[ID_LEN - 1 - (bit / 8) as usize] = 1 << (bit % 8);
        Id(out)
    }

    /// Parse a hex literal, right-aligned as a numeric value. Meant for
    /// fixtures and diagnostics; panics on non-hex input.
    pub fn from_hex(hex_str: &str) -> Id {
        assert!(hex_str.len() <= 2 * ID_LEN, "hex identifier too long");
        let mut padded = String::with_capacity(2 * ID_LEN);
        padded.extend(std::iter::repeat('0').take(2 * ID_LEN - hex_str.len()));
        padded.push_str(hex_str);
        let raw = hex::decode(&padded).expect("invalid hex identifier");
        let mut out = [0u8; ID_LEN];
        out.copy_from_slice(&raw);
        Id(out)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|x| *x == 0)
    }

    pub fn leading_zeros(&self) -> u32 {
        let mut res = 0u32;
        for x in self.0 {
            if x == 0 {
                res += 8;
            } else {
                res += x.leading_zeros();
                break;
            }
        }
        res
    }

    /// Midpoint of the inclusive range `[self, high]`, rounded down.
    pub fn midpoint(self, high: Id) -> Id {
        // 161-bit sum, top carry kept aside.
        let mut sum = [0u8; ID_LEN];
        let mut carry = 0u16;
        for i in (0..ID_LEN).rev() {
            let s = self.0[i] as u16 + high.0[i] as u16 + carry;
            sum[i] = (s & 0xff) as u8;
            carry = s >> 8;
        }
        // Halve, shifting the carry back in from the top.
        let mut out = [0u8; ID_LEN];
        let mut rem = carry as u8;
        for i in 0..ID_LEN {
            out[i] = (sum[i] >> 1) | (rem << 7);
            rem = sum[i] & 1;
        }
        Id(out)
    }

    /// The next identifier upwards. Must not be called on `Id::MAX`.
    pub fn succ(self) -> Id {
        let mut out = self.0;
        for i in (0..ID_LEN).rev() {
            let (v, overflow) = out[i].overflowing_add(1);
            out[i] = v;
            if !overflow {
                return Id(out);
            }
        }
        debug_assert!(false, "identifier overflow");
        Id(out)
    }

    pub fn as_short_hex(&self) -> String {
        let hex_id = hex::encode(self.0);
        let trimmed = hex_id.trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_owned()
        } else {
            trimmed.to_owned()
        }
    }

    /// Render as a decimal integer, the form used on the wire.
    pub fn to_decimal(&self) -> String {
        if self.is_zero() {
            return "0".to_owned();
        }
        let mut n = self.0;
        let mut digits = Vec::new();
        while n.iter().any(|x| *x != 0) {
            let mut rem = 0u32;
            for b in n.iter_mut() {
                let cur = (rem << 8) | *b as u32;
                *b = (cur / 10) as u8;
                rem = cur % 10;
            }
            digits.push(char::from(b'0' + rem as u8));
        }
        digits.iter().rev().collect()
    }

    pub fn from_decimal(text: &str) -> Result<Id, ParseIdError> {
        if text.is_empty() {
            return Err(ParseIdError::Empty);
        }
        let mut out = [0u8; ID_LEN];
        for c in text.chars() {
            let digit = c.to_digit(10).ok_or(ParseIdError::InvalidDigit(c))?;
            let mut carry = digit;
            for b in out.iter_mut().rev() {
                let cur = *b as u32 * 10 + carry;
                *b = (cur & 0xff) as u8;
                carry = cur >> 8;
            }
            if carry != 0 {
                return Err(ParseIdError::Overflow);
            }
        }
        Ok(Id(out))
    }
}

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::from_decimal(s)
    }
}

impl BitXor for Id {
    type Output = Id;

    fn bitxor(self, rhs: Id) -> Id {
        let mut res = Id::ZERO;
        for (a, b, r) in izip!(&self.0, &rhs.0, &mut res.0) {
            *r = a ^ b;
        }
        res
    }
}

impl BitAnd for Id {
    type Output = Id;

    fn bitand(self, rhs: Id) -> Id {
        let mut res = Id::ZERO;
        for (a, b, r) in izip!(&self.0, &rhs.0, &mut res.0) {
            *r = a & b;
        }
        res
    }
}

impl BitOr for Id {
    type Output = Id;

    fn bitor(self, rhs: Id) -> Id {
        let mut res = Id::ZERO;
        for (a, b, r) in izip!(&self.0, &rhs.0, &mut res.0) {
            *r = a | b;
        }
        res
    }
}

impl Not for Id {
    type Output = Id;

    fn not(self) -> Id {
        let mut res = Id::ZERO;
        for (a, r) in self.0.iter().zip(&mut res.0) {
            *r = !a;
        }
        res
    }
}

impl Distribution<Id> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Id {
        let mut out = [0u8; ID_LEN];
        rng.fill_bytes(&mut out);
        Id(out)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.as_short_hex()).finish()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_short_hex())
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use std::fmt;

    use serde::{de, Deserializer, Serialize, Serializer};

    use super::Id;

    impl Serialize for Id {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&self.to_decimal())
        }
    }

    struct IdVisitor;

    impl<'de> de::Visitor<'de> for IdVisitor {
        type Value = Id;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a decimal identifier string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Id, E> {
            Id::from_decimal(v).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Id, E> {
            Ok(Id::from_u64(v))
        }
    }

    impl<'de> de::Deserialize<'de> for Id {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Id, D::Error> {
            deserializer.deserialize_any(IdVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor() {
        let a = Id([1; ID_LEN]);
        let b = Id::ZERO;
        assert_eq!(a ^ a, b);
        assert_eq!(a ^ b, a);
        assert_eq!(b ^ a, a);
    }

    #[test]
    fn leading_zeros() {
        assert_eq!(Id::ZERO.leading_zeros(), 160);
        assert_eq!(Id::MAX.leading_zeros(), 0);
        assert_eq!(Id::from_u64(1).leading_zeros(), 159);
        assert_eq!(Id::set_bit(159).leading_zeros(), 0);
        let mut a = Id::ZERO;
        a.0[9] = 2;
        assert_eq!(a.leading_zeros(), 9 * 8 + 6);
    }

    #[test]
    fn ordering_matches_numeric_value() {
        assert!(Id::from_u64(3) < Id::from_u64(4));
        assert!(Id::from_u64(u64::MAX) < Id::set_bit(64));
        assert!(Id::set_bit(159) < Id::MAX);
    }

    #[test]
    fn midpoint_and_succ() {
        assert_eq!(
            Id::from_u64(4).midpoint(Id::from_u64(6)),
            Id::from_u64(5)
        );
        // The midpoint of the whole space sits one below the top half.
        let mid = Id::ZERO.midpoint(Id::MAX);
        assert_eq!(mid.succ(), Id::set_bit(159));
        assert_eq!(Id::from_u64(255).succ(), Id::from_u64(256));
    }

    #[test]
    fn bit_helpers() {
        assert_eq!(Id::set_bit(0), Id::from_u64(1));
        assert_eq!(Id::set_bit(8), Id::from_u64(256));
        assert_eq!(Id::set_bit(159) | Id::from_u64(1), Id::set_bit(159).succ());
        assert_eq!(!Id::ZERO, Id::MAX);
        assert_eq!(Id::MAX & Id::from_u64(7), Id::from_u64(7));
    }

    #[test]
    fn decimal_round_trip() {
        assert_eq!(Id::ZERO.to_decimal(), "0");
        assert_eq!(Id::from_u64(1234567890).to_decimal(), "1234567890");
        assert_eq!(
            Id::MAX.to_decimal(),
            "1461501637330902918203684832716283019655932542975"
        );
        for id in [Id::ZERO, Id::MAX, Id::from_u64(42), Id::set_bit(159)] {
            assert_eq!(Id::from_decimal(&id.to_decimal()), Ok(id));
        }
    }

    #[test]
    fn decimal_rejects_garbage() {
        assert_eq!(Id::from_decimal(""), Err(ParseIdError::Empty));
        assert_eq!(Id::from_decimal("12a"), Err(ParseIdError::InvalidDigit('a')));
        // One above Id::MAX.
        assert_eq!(
            Id::from_decimal("1461501637330902918203684832716283019655932542976"),
            Err(ParseIdError::Overflow)
        );
    }

    #[test]
    fn from_hex_is_right_aligned() {
        assert_eq!(Id::from_hex("ff"), Id::from_u64(255));
        assert_eq!(Id::from_hex("0"), Id::ZERO);
        assert_eq!(Id::from_u64(255).as_short_hex(), "ff");
        assert_eq!(Id::ZERO.as_short_hex(), "0");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_uses_decimal_strings() {
        let id = Id::set_bit(159);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(
            json,
            "\"730750818665451459101842416358141509827966271488\""
        );
        assert_eq!(serde_json::from_str::<Id>(&json).unwrap(), id);
        // Numeric ids from other implementations are tolerated.
        assert_eq!(serde_json::from_str::<Id>("77").unwrap(), Id::from_u64(77));
    }
}

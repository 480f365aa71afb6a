//! Arbitrary-precision ledger amounts.
//!
//! Upstream reports lovelace quantities as decimal strings that can exceed
//! `u64` once summed across the whole stake distribution, so all ledger sums are
//! kept in `BigUint`. Conversion to floating point only happens at presentation
//! boundaries (see `govsync-tally::Percent`).

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign};
use core::str::FromStr;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;

/// Non-negative lovelace amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lovelace(BigUint);

impl Lovelace {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Subtract, returning `None` when the result would be negative.
    pub fn checked_sub(&self, rhs: &Lovelace) -> Option<Lovelace> {
        if rhs.0 > self.0 {
            None
        } else {
            Some(Lovelace(&self.0 - &rhs.0))
        }
    }

    /// Subtract, clamping at zero. The returned flag is `true` when clamping occurred.
    pub fn clamped_sub(&self, rhs: &Lovelace) -> (Lovelace, bool) {
        match self.checked_sub(rhs) {
            Some(v) => (v, false),
            None => (Lovelace::zero(), true),
        }
    }

    /// Best-effort `u64` view (for logging and counters only).
    pub fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }
}

impl From<u64> for Lovelace {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<BigUint> for Lovelace {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl Add for Lovelace {
    type Output = Lovelace;

    fn add(self, rhs: Lovelace) -> Lovelace {
        Lovelace(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a Lovelace> for &'a Lovelace {
    type Output = Lovelace;

    fn add(self, rhs: &'a Lovelace) -> Lovelace {
        Lovelace(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Lovelace> for Lovelace {
    fn add_assign(&mut self, rhs: &Lovelace) {
        self.0 += &rhs.0;
    }
}

impl Sum for Lovelace {
    fn sum<I: Iterator<Item = Lovelace>>(iter: I) -> Self {
        iter.fold(Lovelace::zero(), |acc, v| acc + v)
    }
}

impl<'a> Sum<&'a Lovelace> for Lovelace {
    fn sum<I: Iterator<Item = &'a Lovelace>>(iter: I) -> Self {
        let mut acc = Lovelace::zero();
        for v in iter {
            acc += v;
        }
        acc
    }
}

impl fmt::Display for Lovelace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Lovelace {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_amount(format!(
                "expected non-negative decimal integer, got {s:?}"
            )));
        }
        BigUint::from_str(trimmed)
            .map(Lovelace)
            .map_err(|e| DomainError::invalid_amount(format!("{s:?}: {e}")))
    }
}

impl Serialize for Lovelace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

struct LovelaceVisitor;

impl<'de> Visitor<'de> for LovelaceVisitor {
    type Value = Lovelace;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer or decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Lovelace, E> {
        Ok(Lovelace::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Lovelace, E> {
        u64::try_from(v)
            .map(Lovelace::from)
            .map_err(|_| E::custom(format!("negative amount: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Lovelace, E> {
        Lovelace::from_str(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Lovelace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LovelaceVisitor)
    }
}

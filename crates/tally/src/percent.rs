//! Fixed-point percentages.

use core::fmt;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Hundredths of a percent per whole percent, times 100 percent.
const SCALE: u32 = 10_000;

/// A percentage with two decimals, stored as hundredths of a percent
/// (`6315` is `63.15%`).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percent(u32);

impl Percent {
    pub const ZERO: Percent = Percent(0);
    pub const HUNDRED: Percent = Percent(SCALE);

    /// Construct from hundredths of a percent, capped at `100.00%`.
    pub const fn from_hundredths(h: u32) -> Self {
        if h > SCALE { Percent::HUNDRED } else { Self(h) }
    }

    /// Construct from a whole percentage (`67` is `67.00%`), capped at `100.00%`.
    pub const fn from_whole(p: u32) -> Self {
        match p.checked_mul(100) {
            Some(h) => Self::from_hundredths(h),
            None => Percent::HUNDRED,
        }
    }

    pub fn hundredths(self) -> u32 {
        self.0
    }

    /// `numerator / denominator * 100`, truncated to two decimals.
    ///
    /// A zero denominator yields `0.00%`. Ratios above one are capped at
    /// `100.00%`.
    pub fn of(numerator: &BigUint, denominator: &BigUint) -> Self {
        if denominator.is_zero() {
            return Percent::ZERO;
        }
        let scaled = (numerator * BigUint::from(SCALE)) / denominator;
        match scaled.to_u32() {
            Some(v) if v <= SCALE => Percent(v),
            _ => Percent::HUNDRED,
        }
    }

    pub fn of_counts(numerator: u64, denominator: u64) -> Self {
        Self::of(&BigUint::from(numerator), &BigUint::from(denominator))
    }

    /// Presentation-boundary conversion.
    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    /// Exact check of `numerator / denominator >= self`, without truncation.
    ///
    /// A zero denominator never meets a threshold.
    pub fn is_met_by(self, numerator: &BigUint, denominator: &BigUint) -> bool {
        if denominator.is_zero() {
            return false;
        }
        numerator * BigUint::from(SCALE) >= BigUint::from(self.0) * denominator
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Percent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = f64::deserialize(deserializer)?;
        // false for NaN as well as out-of-range values
        if !(0.0..=100.0).contains(&v) {
            return Err(serde::de::Error::custom(format!(
                "percentage out of range: {v}"
            )));
        }
        Ok(Percent((v * 100.0).round() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_instead_of_rounding() {
        // 600 / 950 = 63.157...
        assert_eq!(Percent::of_counts(600, 950), Percent::from_hundredths(6315));
        // 2 / 3 = 66.666...
        assert_eq!(Percent::of_counts(2, 3).to_string(), "66.66");
        assert_eq!(Percent::of_counts(5, 7).to_string(), "71.42");
    }

    #[test]
    fn zero_denominator_is_zero_percent() {
        assert_eq!(Percent::of_counts(10, 0), Percent::ZERO);
        assert!(!Percent::from_whole(1).is_met_by(&BigUint::from(1u32), &BigUint::zero()));
    }

    #[test]
    fn display_pads_decimals() {
        assert_eq!(Percent::from_hundredths(5).to_string(), "0.05");
        assert_eq!(Percent::HUNDRED.to_string(), "100.00");
    }

    #[test]
    fn threshold_check_is_exact() {
        let t = Percent::from_whole(67);
        // 67/100 exactly meets 67%.
        assert!(t.is_met_by(&BigUint::from(67u32), &BigUint::from(100u32)));
        // 2/3 = 66.66..% does not.
        assert!(!t.is_met_by(&BigUint::from(2u32), &BigUint::from(3u32)));
    }

    #[test]
    fn serializes_as_decimal_number() {
        let json = serde_json::to_string(&Percent::from_hundredths(7142)).unwrap();
        assert_eq!(json, "71.42");
        let back: Percent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Percent::from_hundredths(7142));
    }

    #[test]
    fn whole_percentages_cap_at_hundred() {
        assert_eq!(Percent::from_whole(100), Percent::HUNDRED);
        assert_eq!(Percent::from_whole(250), Percent::HUNDRED);
        assert_eq!(Percent::from_whole(u32::MAX), Percent::HUNDRED);
        assert_eq!(Percent::from_hundredths(10_001), Percent::HUNDRED);
    }

    #[test]
    fn out_of_range_and_nan_are_rejected() {
        assert!(serde_json::from_str::<Percent>("-0.5").is_err());
        assert!(serde_json::from_str::<Percent>("100.01").is_err());
        let nan = serde::de::value::F64Deserializer::<serde::de::value::Error>::new(f64::NAN);
        assert!(Percent::deserialize(nan).is_err());
    }
}

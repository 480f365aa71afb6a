//! Strongly-typed identifiers used across the domain.
//!
//! Ledger identifiers arrive from upstream as bech32 / hex strings, so every id
//! here is a validated `String` newtype. Ordering is plain byte order, which is
//! also the sort order the delegation backfill cursor relies on.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// A stake (reward) address, e.g. `stake1u9...` or `stake_test1u...`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StakeAddress(String);

/// Identifier of a delegate (a DRep id, or one of the predefined DRep options).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DelegateId(String);

/// Identifier of a governance proposal (bech32 `gov_action1...` or `txhash#index`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProposalId(String);

/// Identifier of a constitutional committee member (cold credential).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitteeMemberId(String);

/// Identity of one running service instance (recorded as the lock holder).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

fn check_token(name: &str, value: &str) -> Result<(), DomainError> {
    if value.is_empty() {
        return Err(DomainError::invalid_id(format!("{name}: empty")));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(DomainError::invalid_id(format!(
            "{name}: contains whitespace: {value:?}"
        )));
    }
    Ok(())
}

macro_rules! impl_string_newtype {
    ($t:ident, $name:literal, $validate:expr) => {
        impl $t {
            /// Parse and validate an identifier.
            pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                check_token($name, &value)?;
                let validate: fn(&str) -> Result<(), DomainError> = $validate;
                validate(&value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(StakeAddress, "StakeAddress", |v| {
    if v.starts_with("stake") {
        Ok(())
    } else {
        Err(DomainError::invalid_id(format!(
            "StakeAddress: expected `stake` prefix, got {v:?}"
        )))
    }
});

impl_string_newtype!(DelegateId, "DelegateId", |v| {
    if v.starts_with("drep") {
        Ok(())
    } else {
        Err(DomainError::invalid_id(format!(
            "DelegateId: expected `drep` prefix, got {v:?}"
        )))
    }
});

impl_string_newtype!(ProposalId, "ProposalId", |_| Ok(()));
impl_string_newtype!(CommitteeMemberId, "CommitteeMemberId", |_| Ok(()));
impl_string_newtype!(InstanceId, "InstanceId", |_| Ok(()));

impl DelegateId {
    /// Predefined option: stake counted as abstaining on every action.
    pub const ALWAYS_ABSTAIN: &'static str = "drep_always_abstain";
    /// Predefined option: stake counted as no-confidence on every action.
    pub const ALWAYS_NO_CONFIDENCE: &'static str = "drep_always_no_confidence";

    pub fn is_predefined(&self) -> bool {
        self.0 == Self::ALWAYS_ABSTAIN || self.0 == Self::ALWAYS_NO_CONFIDENCE
    }
}

impl InstanceId {
    /// Generate a fresh instance identity.
    ///
    /// Uses UUIDv7 (time-ordered) so lock rows sort by process start.
    pub fn generate() -> Self {
        Self(format!("govsync-{}", Uuid::now_v7()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stake_address_requires_prefix() {
        assert!(StakeAddress::parse("stake1u9xyz").is_ok());
        assert!(StakeAddress::parse("stake_test1uabc").is_ok());
        assert!(matches!(
            StakeAddress::parse("addr1qxyz"),
            Err(DomainError::InvalidId(_))
        ));
        assert!(StakeAddress::parse("").is_err());
        assert!(StakeAddress::parse("stake1 u9").is_err());
    }

    #[test]
    fn delegate_id_recognizes_predefined_options() {
        let abstain = DelegateId::parse(DelegateId::ALWAYS_ABSTAIN).unwrap();
        assert!(abstain.is_predefined());

        let drep = DelegateId::parse("drep1ygr5").unwrap();
        assert!(!drep.is_predefined());
        assert!(DelegateId::parse("pool1xyz").is_err());
    }

    #[test]
    fn serde_round_trip_validates() {
        let addr: StakeAddress = serde_json::from_str("\"stake1u8aa\"").unwrap();
        assert_eq!(addr.as_str(), "stake1u8aa");
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"stake1u8aa\"");

        let bad: Result<StakeAddress, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn addresses_sort_bytewise() {
        let mut v = vec![
            StakeAddress::parse("stake1uc").unwrap(),
            StakeAddress::parse("stake1ua").unwrap(),
            StakeAddress::parse("stake1ub").unwrap(),
        ];
        v.sort();
        let sorted: Vec<_> = v.iter().map(|a| a.as_str()).collect();
        assert_eq!(sorted, vec!["stake1ua", "stake1ub", "stake1uc"]);
    }

    #[test]
    fn generated_instance_ids_are_unique() {
        assert_ne!(InstanceId::generate(), InstanceId::generate());
    }
}

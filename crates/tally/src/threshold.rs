//! Ratification thresholds and pass/fail evaluation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use govsync_core::{GovActionType, VoterClass};

use crate::percent::Percent;

/// Yes-thresholds for one action type. `None` means the class does not
/// participate in ratifying that action type.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassThresholds {
    pub drep: Option<Percent>,
    pub spo: Option<Percent>,
    pub committee: Option<Percent>,
}

impl ClassThresholds {
    pub fn for_class(&self, class: VoterClass) -> Option<Percent> {
        match class {
            VoterClass::Drep => self.drep,
            VoterClass::Spo => self.spo,
            VoterClass::Committee => self.committee,
        }
    }
}

/// Independently configured thresholds per governance action type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTable {
    entries: HashMap<GovActionType, ClassThresholds>,
}

impl ThresholdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, action: GovActionType, thresholds: ClassThresholds) -> Self {
        self.entries.insert(action, thresholds);
        self
    }

    /// Thresholds for an action type; unknown types have no participating class.
    pub fn get(&self, action: GovActionType) -> ClassThresholds {
        self.entries.get(&action).copied().unwrap_or_default()
    }

    /// Mainnet protocol-parameter thresholds.
    pub fn mainnet() -> Self {
        let p = Percent::from_whole;
        Self::new()
            .with(
                GovActionType::NoConfidence,
                ClassThresholds { drep: Some(p(67)), spo: Some(p(51)), committee: None },
            )
            .with(
                GovActionType::UpdateCommittee,
                ClassThresholds { drep: Some(p(67)), spo: Some(p(51)), committee: None },
            )
            .with(
                GovActionType::NewConstitution,
                ClassThresholds { drep: Some(p(75)), spo: None, committee: Some(p(67)) },
            )
            .with(
                GovActionType::HardForkInitiation,
                ClassThresholds { drep: Some(p(60)), spo: Some(p(51)), committee: Some(p(67)) },
            )
            .with(
                GovActionType::ParameterChange,
                ClassThresholds { drep: Some(p(67)), spo: None, committee: Some(p(67)) },
            )
            .with(
                GovActionType::TreasuryWithdrawals,
                ClassThresholds { drep: Some(p(67)), spo: None, committee: Some(p(67)) },
            )
            .with(GovActionType::InfoAction, ClassThresholds::default())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassVerdict {
    pub class: VoterClass,
    pub threshold: Percent,
    pub yes_pct: Percent,
    pub passed: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatificationStatus {
    Passed,
    Failed,
    /// No voter class participates (e.g. info actions).
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratification {
    pub status: RatificationStatus,
    pub classes: Vec<ClassVerdict>,
}

/// Evaluate a proposal against its action type's thresholds.
///
/// `check` returns, for a class, its yes percentage and whether its threshold was
/// met; `None` when the class has no tally data (which fails a participating
/// class). A class whose denominator is zero never meets a threshold.
pub fn evaluate<F>(thresholds: ClassThresholds, mut check: F) -> Ratification
where
    F: FnMut(VoterClass, Percent) -> Option<(Percent, bool)>,
{
    let mut classes = Vec::new();
    for class in [VoterClass::Drep, VoterClass::Spo, VoterClass::Committee] {
        let Some(threshold) = thresholds.for_class(class) else {
            continue;
        };
        let (yes_pct, passed) = check(class, threshold).unwrap_or((Percent::ZERO, false));
        classes.push(ClassVerdict {
            class,
            threshold,
            yes_pct,
            passed,
        });
    }

    let status = if classes.is_empty() {
        RatificationStatus::NotApplicable
    } else if classes.iter().all(|c| c.passed) {
        RatificationStatus::Passed
    } else {
        RatificationStatus::Failed
    };

    Ratification { status, classes }
}

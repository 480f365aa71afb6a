//! Ledger epochs.

use serde::{Deserialize, Serialize};

/// A discrete unit of ledger time; aggregates are computed per epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(pub u32);

impl Epoch {
    pub const GENESIS: Epoch = Epoch(0);

    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn number(self) -> u32 {
        self.0
    }

    /// The previous epoch, or `None` at genesis.
    pub fn prev(self) -> Option<Epoch> {
        self.0.checked_sub(1).map(Epoch)
    }

    pub fn next(self) -> Epoch {
        Epoch(self.0.saturating_add(1))
    }

    /// Iterate `[from, to]` inclusive. Empty when `from > to`.
    pub fn range_inclusive(from: Epoch, to: Epoch) -> impl Iterator<Item = Epoch> {
        (from.0..=to.0).map(Epoch)
    }
}

impl core::fmt::Display for Epoch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Epoch {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

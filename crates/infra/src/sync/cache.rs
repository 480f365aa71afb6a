//! Per-invocation memo of upstream reads shared by the steps of one job run.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use govsync_core::Epoch;

use super::source::LedgerSource;
use crate::error::SyncError;
use crate::store::{DrepEpochSnapshot, EpochStore};

/// Created at the start of a job invocation and dropped at its end; nothing
/// survives between runs.
#[derive(Debug, Default)]
pub struct JobCache {
    tip: Option<Epoch>,
    inventories: HashMap<Epoch, Arc<Vec<DrepEpochSnapshot>>>,
}

impl JobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current chain tip, fetched once per invocation.
    pub async fn tip(&mut self, source: &LedgerSource) -> Result<Epoch, SyncError> {
        if let Some(tip) = self.tip {
            return Ok(tip);
        }
        let tip = source.tip().await?;
        self.tip = Some(tip);
        Ok(tip)
    }

    /// Latest epoch whose aggregates are final.
    pub async fn latest_completed_epoch(&mut self, source: &LedgerSource) -> Result<Epoch, SyncError> {
        let tip = self.tip(source).await?;
        tip.prev().ok_or(SyncError::NoCompletedEpoch { tip })
    }

    pub fn put_inventory(&mut self, epoch: Epoch, rows: Vec<DrepEpochSnapshot>) -> Arc<Vec<DrepEpochSnapshot>> {
        let rows = Arc::new(rows);
        self.inventories.insert(epoch, rows.clone());
        rows
    }

    /// Inventory for `epoch`: memo first, then the stored snapshot, then upstream.
    pub async fn inventory(
        &mut self,
        epoch: Epoch,
        store: &dyn EpochStore,
        source: &LedgerSource,
    ) -> Result<Arc<Vec<DrepEpochSnapshot>>, SyncError> {
        if let Some(rows) = self.inventories.get(&epoch) {
            return Ok(rows.clone());
        }
        let stored = store.drep_snapshots(epoch).await?;
        if !stored.is_empty() {
            debug!(%epoch, rows = stored.len(), "inventory from store");
            return Ok(self.put_inventory(epoch, stored));
        }
        let fetched = source.drep_inventory(epoch).await?;
        debug!(%epoch, rows = fetched.len(), "inventory from upstream");
        Ok(self.put_inventory(epoch, fetched))
    }
}

//! Postgres-backed sync store.
//!
//! Amounts are stored as `NUMERIC` and moved across the wire as text, so
//! arbitrary-precision values never pass through a float or a bounded integer.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure) | `40001` | `Conflict` |
//! | Database (foreign key / check violation) | `23503` / `23514` | `Storage` |
//! | Database (other) | Any other | `Storage` |
//! | ColumnDecode / Decode | N/A | `Serialization` |
//! | PoolClosed, Io, other | N/A | `Storage` |

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::instrument;

use govsync_core::{DelegateId, Epoch, InstanceId, Lovelace, ProposalId, StakeAddress};
use govsync_tally::ProposalLedgerSnapshot;

use super::records::{
    BackfillCursor, DelegationChangeEvent, DelegationState, DrepDelegatorSummary,
    DrepEpochSnapshot, EpochCheckpoint, EpochStep, EpochTotals,
};
use super::{DelegationStore, EpochStore, JobLockStore, ProposalSnapshotStore, StoreError};
use crate::jobs::{JobLockState, JobResult};

/// Idempotent schema; applied by [`PostgresSyncStore::migrate`].
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS job_locks (
    job_name        TEXT PRIMARY KEY,
    is_running      BOOLEAN NOT NULL DEFAULT FALSE,
    started_at      TIMESTAMPTZ,
    expires_at      TIMESTAMPTZ,
    locked_by       TEXT,
    last_result     TEXT CHECK (last_result IN ('success', 'failed', 'expired')),
    error_message   TEXT,
    items_processed BIGINT,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK (NOT is_running OR expires_at IS NOT NULL)
);

CREATE TABLE IF NOT EXISTS epoch_sync_checkpoints (
    epoch                BIGINT PRIMARY KEY,
    dreps_synced_at      TIMESTAMPTZ,
    totals_synced_at     TIMESTAMPTZ,
    delegators_synced_at TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS drep_epoch_snapshots (
    epoch        BIGINT NOT NULL,
    drep_id      TEXT NOT NULL,
    registered   BOOLEAN NOT NULL,
    active       BOOLEAN NOT NULL,
    voting_power NUMERIC NOT NULL CHECK (voting_power >= 0),
    PRIMARY KEY (epoch, drep_id)
);

CREATE TABLE IF NOT EXISTS epoch_totals (
    epoch             BIGINT PRIMARY KEY,
    circulation       NUMERIC,
    treasury          NUMERIC,
    drep_voting_power NUMERIC,
    pool_voting_power NUMERIC,
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS drep_delegator_summaries (
    epoch            BIGINT NOT NULL,
    drep_id          TEXT NOT NULL,
    delegator_count  BIGINT NOT NULL,
    delegated_amount NUMERIC NOT NULL,
    PRIMARY KEY (epoch, drep_id)
);

CREATE TABLE IF NOT EXISTS delegation_states (
    stake_address  TEXT PRIMARY KEY,
    drep_id        TEXT NOT NULL,
    amount         NUMERIC,
    epoch_observed BIGINT NOT NULL,
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS delegation_change_events (
    id            BIGSERIAL PRIMARY KEY,
    stake_address TEXT NOT NULL,
    from_drep     TEXT,
    to_drep       TEXT NOT NULL,
    epoch         BIGINT NOT NULL,
    amount        NUMERIC,
    recorded_at   TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS delegation_change_events_address_idx
    ON delegation_change_events (stake_address, id);

CREATE TABLE IF NOT EXISTS backfill_cursors (
    job_name     TEXT PRIMARY KEY,
    last_address TEXT NOT NULL,
    processed    BIGINT NOT NULL,
    total        BIGINT NOT NULL,
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS backfill_completions (
    job_name     TEXT PRIMARY KEY,
    completed_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS proposal_snapshots (
    proposal_id TEXT PRIMARY KEY,
    snapshot    JSONB NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Postgres-backed implementation of every sync store trait.
///
/// `PostgresSyncStore` is `Send + Sync`; all multi-row writes run inside a
/// single transaction so a crash mid-batch leaves no partial batch behind.
#[derive(Debug, Clone)]
pub struct PostgresSyncStore {
    pool: Arc<PgPool>,
}

impl PostgresSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait]
impl JobLockStore for PostgresSyncStore {
    #[instrument(skip(self, holder), fields(holder = %holder), err)]
    async fn try_acquire_lease(
        &self,
        job_name: &str,
        holder: &InstanceId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let expires_at = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| StoreError::Storage(format!("lease out of range: {lease:?}")))?;

        let op = "try_acquire_lease";
        let mut tx = self.begin(op).await?;

        sqlx::query("INSERT INTO job_locks (job_name) VALUES ($1) ON CONFLICT (job_name) DO NOTHING")
            .bind(job_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;

        let row = sqlx::query(
            "SELECT is_running, expires_at FROM job_locks WHERE job_name = $1 FOR UPDATE",
        )
        .bind(job_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        let mut is_running: bool = row.try_get("is_running").map_err(decode_error)?;
        let current_expiry: Option<DateTime<Utc>> = row.try_get("expires_at").map_err(decode_error)?;

        if is_running && current_expiry.is_some_and(|at| at < now) {
            sqlx::query(
                r#"
                UPDATE job_locks
                SET is_running = FALSE, last_result = 'expired', updated_at = NOW()
                WHERE job_name = $1
                "#,
            )
            .bind(job_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
            is_running = false;
        }

        if is_running {
            tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE job_locks
            SET is_running = TRUE,
                started_at = $2,
                expires_at = $3,
                locked_by = $4,
                updated_at = NOW()
            WHERE job_name = $1
            "#,
        )
        .bind(job_name)
        .bind(now)
        .bind(expires_at)
        .bind(holder.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
        Ok(true)
    }

    #[instrument(skip(self, holder, error_message), fields(holder = %holder), err)]
    async fn release_lease(
        &self,
        job_name: &str,
        holder: &InstanceId,
        result: JobResult,
        items_processed: Option<u64>,
        error_message: Option<String>,
    ) -> Result<bool, StoreError> {
        let op = "release_lease";
        let updated = sqlx::query(
            r#"
            UPDATE job_locks
            SET is_running = FALSE,
                last_result = $3,
                items_processed = $4,
                error_message = $5,
                updated_at = NOW()
            WHERE job_name = $1 AND (NOT is_running OR locked_by = $2)
            "#,
        )
        .bind(job_name)
        .bind(holder.as_str())
        .bind(result.as_str())
        .bind(items_processed.map(to_i64))
        .bind(error_message)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        match self.lock_state(job_name).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("job lock {job_name}"))),
        }
    }

    #[instrument(skip(self, holder), fields(holder = %holder), err)]
    async fn renew_lease(
        &self,
        job_name: &str,
        holder: &InstanceId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let expires_at = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| StoreError::Storage(format!("lease out of range: {lease:?}")))?;

        let updated = sqlx::query(
            r#"
            UPDATE job_locks
            SET expires_at = $3, updated_at = NOW()
            WHERE job_name = $1 AND is_running AND locked_by = $2
            "#,
        )
        .bind(job_name)
        .bind(holder.as_str())
        .bind(expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("renew_lease", e))?;
        Ok(updated.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn lock_state(&self, job_name: &str) -> Result<Option<JobLockState>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_name, is_running, started_at, expires_at, locked_by,
                   last_result, error_message, items_processed
            FROM job_locks
            WHERE job_name = $1
            "#,
        )
        .bind(job_name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("lock_state", e))?;

        row.map(|row| lock_state_from_row(&row)).transpose()
    }
}

#[async_trait]
impl EpochStore for PostgresSyncStore {
    #[instrument(skip(self), err)]
    async fn checkpoint(&self, epoch: Epoch) -> Result<Option<EpochCheckpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT epoch, dreps_synced_at, totals_synced_at, delegators_synced_at
            FROM epoch_sync_checkpoints
            WHERE epoch = $1
            "#,
        )
        .bind(epoch_param(epoch))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("checkpoint", e))?;

        row.map(|row| checkpoint_from_row(&row)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn checkpoints_in_range(
        &self,
        from: Epoch,
        to: Epoch,
    ) -> Result<Vec<EpochCheckpoint>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT epoch, dreps_synced_at, totals_synced_at, delegators_synced_at
            FROM epoch_sync_checkpoints
            WHERE epoch BETWEEN $1 AND $2
            ORDER BY epoch ASC
            "#,
        )
        .bind(epoch_param(from))
        .bind(epoch_param(to))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("checkpoints_in_range", e))?;

        rows.iter().map(checkpoint_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn mark_step(
        &self,
        epoch: Epoch,
        step: EpochStep,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let column = match step {
            EpochStep::Dreps => "dreps_synced_at",
            EpochStep::Totals => "totals_synced_at",
            EpochStep::Delegators => "delegators_synced_at",
        };
        let sql = format!(
            r#"
            INSERT INTO epoch_sync_checkpoints (epoch, {column})
            VALUES ($1, $2)
            ON CONFLICT (epoch) DO UPDATE
            SET {column} = COALESCE(epoch_sync_checkpoints.{column}, EXCLUDED.{column})
            "#
        );
        sqlx::query(&sql)
            .bind(epoch_param(epoch))
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_step", e))?;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(row_count = rows.len()), err)]
    async fn upsert_drep_snapshots(&self, rows: &[DrepEpochSnapshot]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let op = "upsert_drep_snapshots";
        let mut tx = self.begin(op).await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO drep_epoch_snapshots (epoch, drep_id, registered, active, voting_power)
                VALUES ($1, $2, $3, $4, $5::numeric)
                ON CONFLICT (epoch, drep_id) DO UPDATE
                SET registered = EXCLUDED.registered,
                    active = EXCLUDED.active,
                    voting_power = EXCLUDED.voting_power
                "#,
            )
            .bind(epoch_param(row.epoch))
            .bind(row.drep_id.as_str())
            .bind(row.registered)
            .bind(row.active)
            .bind(row.voting_power.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn drep_snapshots(&self, epoch: Epoch) -> Result<Vec<DrepEpochSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT epoch, drep_id, registered, active, voting_power::text AS voting_power
            FROM drep_epoch_snapshots
            WHERE epoch = $1
            ORDER BY drep_id ASC
            "#,
        )
        .bind(epoch_param(epoch))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("drep_snapshots", e))?;

        rows.iter()
            .map(|row| {
                Ok(DrepEpochSnapshot {
                    epoch: get_epoch(row, "epoch")?,
                    drep_id: get_delegate(row, "drep_id")?,
                    registered: row.try_get("registered").map_err(decode_error)?,
                    active: row.try_get("active").map_err(decode_error)?,
                    voting_power: get_amount(row, "voting_power")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, totals), fields(epoch = %totals.epoch), err)]
    async fn upsert_totals(&self, totals: &EpochTotals) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO epoch_totals (epoch, circulation, treasury, drep_voting_power, pool_voting_power)
            VALUES ($1, $2::numeric, $3::numeric, $4::numeric, $5::numeric)
            ON CONFLICT (epoch) DO UPDATE
            SET circulation = EXCLUDED.circulation,
                treasury = EXCLUDED.treasury,
                drep_voting_power = EXCLUDED.drep_voting_power,
                pool_voting_power = EXCLUDED.pool_voting_power,
                updated_at = NOW()
            "#,
        )
        .bind(epoch_param(totals.epoch))
        .bind(totals.circulation.as_ref().map(Lovelace::to_string))
        .bind(totals.treasury.as_ref().map(Lovelace::to_string))
        .bind(totals.drep_voting_power.as_ref().map(Lovelace::to_string))
        .bind(totals.pool_voting_power.as_ref().map(Lovelace::to_string))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_totals", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn totals(&self, epoch: Epoch) -> Result<Option<EpochTotals>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT epoch,
                   circulation::text AS circulation,
                   treasury::text AS treasury,
                   drep_voting_power::text AS drep_voting_power,
                   pool_voting_power::text AS pool_voting_power
            FROM epoch_totals
            WHERE epoch = $1
            "#,
        )
        .bind(epoch_param(epoch))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("totals", e))?;

        row.map(|row| {
            Ok(EpochTotals {
                epoch: get_epoch(&row, "epoch")?,
                circulation: get_opt_amount(&row, "circulation")?,
                treasury: get_opt_amount(&row, "treasury")?,
                drep_voting_power: get_opt_amount(&row, "drep_voting_power")?,
                pool_voting_power: get_opt_amount(&row, "pool_voting_power")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, rows), fields(row_count = rows.len()), err)]
    async fn upsert_delegator_summaries(
        &self,
        rows: &[DrepDelegatorSummary],
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let op = "upsert_delegator_summaries";
        let mut tx = self.begin(op).await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO drep_delegator_summaries (epoch, drep_id, delegator_count, delegated_amount)
                VALUES ($1, $2, $3, $4::numeric)
                ON CONFLICT (epoch, drep_id) DO UPDATE
                SET delegator_count = EXCLUDED.delegator_count,
                    delegated_amount = EXCLUDED.delegated_amount
                "#,
            )
            .bind(epoch_param(row.epoch))
            .bind(row.drep_id.as_str())
            .bind(to_i64(row.delegator_count))
            .bind(row.delegated_amount.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delegator_summaries(
        &self,
        epoch: Epoch,
    ) -> Result<Vec<DrepDelegatorSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT epoch, drep_id, delegator_count, delegated_amount::text AS delegated_amount
            FROM drep_delegator_summaries
            WHERE epoch = $1
            ORDER BY drep_id ASC
            "#,
        )
        .bind(epoch_param(epoch))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delegator_summaries", e))?;

        rows.iter()
            .map(|row| {
                let count: i64 = row.try_get("delegator_count").map_err(decode_error)?;
                Ok(DrepDelegatorSummary {
                    epoch: get_epoch(row, "epoch")?,
                    drep_id: get_delegate(row, "drep_id")?,
                    delegator_count: u64::try_from(count)
                        .map_err(|_| StoreError::Serialization(format!("negative count {count}")))?,
                    delegated_amount: get_amount(row, "delegated_amount")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DelegationStore for PostgresSyncStore {
    #[instrument(skip(self), err)]
    async fn delegation_state_count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delegation_states")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delegation_state_count", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    #[instrument(skip(self, addresses), fields(address_count = addresses.len()), err)]
    async fn delegation_states(
        &self,
        addresses: &[StakeAddress],
    ) -> Result<HashMap<StakeAddress, DelegationState>, StoreError> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<&str> = addresses.iter().map(StakeAddress::as_str).collect();
        let rows = sqlx::query(
            r#"
            SELECT stake_address, drep_id, amount::text AS amount, epoch_observed
            FROM delegation_states
            WHERE stake_address = ANY($1)
            "#,
        )
        .bind(keys)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delegation_states", e))?;

        rows.iter()
            .map(|row| {
                let state = DelegationState {
                    stake_address: get_address(row, "stake_address")?,
                    drep_id: get_delegate(row, "drep_id")?,
                    amount: get_opt_amount(row, "amount")?,
                    epoch_observed: get_epoch(row, "epoch_observed")?,
                };
                Ok((state.stake_address.clone(), state))
            })
            .collect()
    }

    #[instrument(
        skip(self, events, states),
        fields(event_count = events.len(), state_count = states.len()),
        err
    )]
    async fn apply_changes(
        &self,
        events: &[DelegationChangeEvent],
        states: &[DelegationState],
    ) -> Result<(), StoreError> {
        if events.is_empty() && states.is_empty() {
            return Ok(());
        }
        let op = "apply_changes";
        let mut tx = self.begin(op).await?;
        insert_events(&mut tx, op, events).await?;
        for state in states {
            upsert_state(&mut tx, op, state).await?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
        Ok(())
    }

    #[instrument(
        skip(self, events, state, cursor),
        fields(job_name = %cursor.job_name, address = %cursor.last_address),
        err
    )]
    async fn apply_backfill(
        &self,
        events: &[DelegationChangeEvent],
        state: Option<&DelegationState>,
        cursor: &BackfillCursor,
    ) -> Result<(), StoreError> {
        let op = "apply_backfill";
        let mut tx = self.begin(op).await?;
        insert_events(&mut tx, op, events).await?;
        if let Some(state) = state {
            upsert_state(&mut tx, op, state).await?;
        }
        sqlx::query(
            r#"
            INSERT INTO backfill_cursors (job_name, last_address, processed, total)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_name) DO UPDATE
            SET last_address = EXCLUDED.last_address,
                processed = EXCLUDED.processed,
                total = EXCLUDED.total,
                updated_at = NOW()
            "#,
        )
        .bind(&cursor.job_name)
        .bind(cursor.last_address.as_str())
        .bind(to_i64(cursor.processed))
        .bind(to_i64(cursor.total))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;
        tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn change_events(
        &self,
        address: &StakeAddress,
    ) -> Result<Vec<DelegationChangeEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT stake_address, from_drep, to_drep, epoch, amount::text AS amount, recorded_at
            FROM delegation_change_events
            WHERE stake_address = $1
            ORDER BY id ASC
            "#,
        )
        .bind(address.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("change_events", e))?;

        rows.iter()
            .map(|row| {
                let from: Option<String> = row.try_get("from_drep").map_err(decode_error)?;
                Ok(DelegationChangeEvent {
                    stake_address: get_address(row, "stake_address")?,
                    from_drep: from.map(parse_id::<DelegateId>).transpose()?,
                    to_drep: get_delegate(row, "to_drep")?,
                    epoch: get_epoch(row, "epoch")?,
                    amount: get_opt_amount(row, "amount")?,
                    recorded_at: row.try_get("recorded_at").map_err(decode_error)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn backfill_cursor(&self, job_name: &str) -> Result<Option<BackfillCursor>, StoreError> {
        let row = sqlx::query(
            "SELECT job_name, last_address, processed, total FROM backfill_cursors WHERE job_name = $1",
        )
        .bind(job_name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("backfill_cursor", e))?;

        row.map(|row| {
            let processed: i64 = row.try_get("processed").map_err(decode_error)?;
            let total: i64 = row.try_get("total").map_err(decode_error)?;
            Ok(BackfillCursor {
                job_name: row.try_get("job_name").map_err(decode_error)?,
                last_address: get_address(&row, "last_address")?,
                processed: u64::try_from(processed).unwrap_or(0),
                total: u64::try_from(total).unwrap_or(0),
            })
        })
        .transpose()
    }

    #[instrument(skip(self), err)]
    async fn clear_backfill_cursor(&self, job_name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM backfill_cursors WHERE job_name = $1")
            .bind(job_name)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear_backfill_cursor", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn is_backfill_done(&self, job_name: &str) -> Result<bool, StoreError> {
        let done: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM backfill_completions WHERE job_name = $1)",
        )
        .bind(job_name)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("is_backfill_done", e))?;
        Ok(done)
    }

    #[instrument(skip(self), err)]
    async fn mark_backfill_done(
        &self,
        job_name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO backfill_completions (job_name, completed_at)
            VALUES ($1, $2)
            ON CONFLICT (job_name) DO NOTHING
            "#,
        )
        .bind(job_name)
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_backfill_done", e))?;
        Ok(())
    }
}

#[async_trait]
impl ProposalSnapshotStore for PostgresSyncStore {
    #[instrument(skip(self), err)]
    async fn proposal_snapshot(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<ProposalLedgerSnapshot>, StoreError> {
        let row: Option<Json<ProposalLedgerSnapshot>> = sqlx::query_scalar(
            "SELECT snapshot FROM proposal_snapshots WHERE proposal_id = $1",
        )
        .bind(proposal_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("proposal_snapshot", e))?;
        Ok(row.map(|Json(snapshot)| snapshot))
    }

    #[instrument(skip(self, snapshot), fields(proposal_id = %snapshot.proposal_id), err)]
    async fn upsert_proposal_snapshot(
        &self,
        snapshot: &ProposalLedgerSnapshot,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO proposal_snapshots (proposal_id, snapshot)
            VALUES ($1, $2)
            ON CONFLICT (proposal_id) DO UPDATE
            SET snapshot = EXCLUDED.snapshot, updated_at = NOW()
            "#,
        )
        .bind(snapshot.proposal_id.as_str())
        .bind(Json(snapshot))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_proposal_snapshot", e))?;
        Ok(())
    }
}

/// Rows per multi-row event insert; six binds each keeps a chunk well under the
/// 65535 bind parameter limit.
const EVENT_INSERT_CHUNK: usize = 1_000;

async fn insert_events(
    tx: &mut Transaction<'_, Postgres>,
    op: &str,
    events: &[DelegationChangeEvent],
) -> Result<(), StoreError> {
    // VALUES rows take BIGSERIAL ids in list order, which keeps the log in replay order.
    for chunk in events.chunks(EVENT_INSERT_CHUNK) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO delegation_change_events \
             (stake_address, from_drep, to_drep, epoch, amount, recorded_at) ",
        );
        qb.push_values(chunk, |mut row, event| {
            row.push_bind(event.stake_address.as_str())
                .push_bind(event.from_drep.as_ref().map(DelegateId::as_str))
                .push_bind(event.to_drep.as_str())
                .push_bind(epoch_param(event.epoch))
                .push_bind(event.amount.as_ref().map(Lovelace::to_string))
                .push_unseparated("::numeric")
                .push_bind(event.recorded_at);
        });
        qb.build()
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
    }
    Ok(())
}

/// A state without an amount (replayed from history) keeps the stored amount.
async fn upsert_state(
    tx: &mut Transaction<'_, Postgres>,
    op: &str,
    state: &DelegationState,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO delegation_states (stake_address, drep_id, amount, epoch_observed)
        VALUES ($1, $2, $3::numeric, $4)
        ON CONFLICT (stake_address) DO UPDATE
        SET drep_id = EXCLUDED.drep_id,
            amount = COALESCE(EXCLUDED.amount, delegation_states.amount),
            epoch_observed = EXCLUDED.epoch_observed,
            updated_at = NOW()
        "#,
    )
    .bind(state.stake_address.as_str())
    .bind(state.drep_id.as_str())
    .bind(state.amount.as_ref().map(Lovelace::to_string))
    .bind(epoch_param(state.epoch_observed))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error(op, e))?;
    Ok(())
}

fn lock_state_from_row(row: &PgRow) -> Result<JobLockState, StoreError> {
    let locked_by: Option<String> = row.try_get("locked_by").map_err(decode_error)?;
    let last_result: Option<String> = row.try_get("last_result").map_err(decode_error)?;
    let items: Option<i64> = row.try_get("items_processed").map_err(decode_error)?;
    Ok(JobLockState {
        job_name: row.try_get("job_name").map_err(decode_error)?,
        is_running: row.try_get("is_running").map_err(decode_error)?,
        started_at: row.try_get("started_at").map_err(decode_error)?,
        expires_at: row.try_get("expires_at").map_err(decode_error)?,
        locked_by: locked_by.map(parse_id::<InstanceId>).transpose()?,
        last_result: last_result
            .map(|r| JobResult::from_str(&r).map_err(StoreError::Serialization))
            .transpose()?,
        error_message: row.try_get("error_message").map_err(decode_error)?,
        items_processed: items.and_then(|n| u64::try_from(n).ok()),
    })
}

fn checkpoint_from_row(row: &PgRow) -> Result<EpochCheckpoint, StoreError> {
    Ok(EpochCheckpoint {
        epoch: get_epoch(row, "epoch")?,
        dreps_synced_at: row.try_get("dreps_synced_at").map_err(decode_error)?,
        totals_synced_at: row.try_get("totals_synced_at").map_err(decode_error)?,
        delegators_synced_at: row.try_get("delegators_synced_at").map_err(decode_error)?,
    })
}

fn epoch_param(epoch: Epoch) -> i64 {
    i64::from(epoch.number())
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn get_epoch(row: &PgRow, column: &str) -> Result<Epoch, StoreError> {
    let raw: i64 = row.try_get(column).map_err(decode_error)?;
    u32::try_from(raw)
        .map(Epoch)
        .map_err(|_| StoreError::Serialization(format!("{column}: epoch out of range: {raw}")))
}

fn get_amount(row: &PgRow, column: &str) -> Result<Lovelace, StoreError> {
    let raw: String = row.try_get(column).map_err(decode_error)?;
    parse_amount(column, &raw)
}

fn get_opt_amount(row: &PgRow, column: &str) -> Result<Option<Lovelace>, StoreError> {
    let raw: Option<String> = row.try_get(column).map_err(decode_error)?;
    raw.map(|r| parse_amount(column, &r)).transpose()
}

fn parse_amount(column: &str, raw: &str) -> Result<Lovelace, StoreError> {
    // NUMERIC text may carry a zero fraction, e.g. "42.0".
    let integral = match raw.split_once('.') {
        Some((whole, frac)) if frac.chars().all(|c| c == '0') => whole,
        _ => raw,
    };
    integral
        .parse()
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
}

fn get_delegate(row: &PgRow, column: &str) -> Result<DelegateId, StoreError> {
    let raw: String = row.try_get(column).map_err(decode_error)?;
    parse_id(raw)
}

fn get_address(row: &PgRow, column: &str) -> Result<StakeAddress, StoreError> {
    let raw: String = row.try_get(column).map_err(decode_error)?;
    parse_id(raw)
}

fn parse_id<T>(raw: String) -> Result<T, StoreError>
where
    T: TryFrom<String, Error = govsync_core::DomainError>,
{
    T::try_from(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}

/// Map SQLx errors to `StoreError` by PostgreSQL error code.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {}", operation)),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {}: {}", operation, err))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

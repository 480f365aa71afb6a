//! "Who delegates to whom": current state plus an append-only change log.
//!
//! A cycle observes every current delegator of every entity with voting power,
//! backfills history for addresses it has never seen, then diffs the
//! observation against stored state. Backfill is resumable through a cursor
//! keyed by job name and stops early when the upstream quota runs low.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use govsync_core::{DelegateId, Epoch, Lovelace, StakeAddress};

use super::cache::JobCache;
use super::source::LedgerSource;
use crate::error::SyncError;
use crate::jobs::{ConcurrencyLimitedFetcher, JobReport};
use crate::store::{BackfillCursor, DelegationChangeEvent, DelegationState, DelegationStore, EpochStore};
use crate::upstream::{DelegationUpdate, UpstreamError};

pub const FULL_BACKFILL_JOB: &str = "delegation-full-backfill";
pub const INCREMENTAL_BACKFILL_JOB: &str = "delegation-incremental-backfill";

#[derive(Debug, Clone)]
pub struct DelegationSyncSettings {
    /// Fan-out width over entities when reading current delegators.
    pub concurrency: usize,
    pub history_batch_size: usize,
    pub write_batch_size: usize,
    /// Backfill stops before a history batch when fewer requests than this remain.
    pub min_quota_reserve: u64,
}

impl Default for DelegationSyncSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            history_batch_size: 50,
            write_batch_size: 500,
            min_quota_reserve: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub drep_id: DelegateId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationSyncReport {
    pub epoch: Epoch,
    /// Distinct addresses observed across every entity.
    pub observed: usize,
    /// Addresses reported by more than one entity; the last report wins.
    pub duplicate_observations: usize,
    pub new_addresses: usize,
    pub full_backfill: bool,
    pub backfilled: usize,
    pub backfill_skipped: usize,
    pub events_recorded: usize,
    pub states_refreshed: usize,
    pub failed_entities: Vec<EntityFailure>,
}

impl JobReport for DelegationSyncReport {
    fn items_processed(&self) -> u64 {
        self.observed as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Observation {
    drep_id: DelegateId,
    amount: Lovelace,
}

#[derive(Debug, Default)]
struct BackfillOutcome {
    processed: HashSet<StakeAddress>,
    skipped: HashSet<StakeAddress>,
    events: usize,
}

pub struct DelegationChangeTracker {
    store: Arc<dyn DelegationStore>,
    epochs: Arc<dyn EpochStore>,
    source: LedgerSource,
    settings: DelegationSyncSettings,
}

impl DelegationChangeTracker {
    pub fn new(
        store: Arc<dyn DelegationStore>,
        epochs: Arc<dyn EpochStore>,
        source: LedgerSource,
        settings: DelegationSyncSettings,
    ) -> Self {
        Self {
            store,
            epochs,
            source,
            settings,
        }
    }

    #[instrument(skip(self, cache), err)]
    pub async fn sync(&self, cache: &mut JobCache) -> Result<DelegationSyncReport, SyncError> {
        let epoch = cache.latest_completed_epoch(&self.source).await?;
        let inventory = cache
            .inventory(epoch, self.epochs.as_ref(), &self.source)
            .await?;
        let targets: Vec<DelegateId> = inventory
            .iter()
            .filter(|row| !row.voting_power.is_zero())
            .map(|row| row.drep_id.clone())
            .collect();

        let (observed, duplicate_observations, failed_entities) = self.observe(targets).await;
        let mut addresses: Vec<StakeAddress> = observed.keys().cloned().collect();
        addresses.sort();

        let mut stored = self.store.delegation_states(&addresses).await?;
        let new: Vec<StakeAddress> = addresses
            .iter()
            .filter(|a| !stored.contains_key(*a))
            .cloned()
            .collect();

        let full_done = self.store.is_backfill_done(FULL_BACKFILL_JOB).await?;
        let full_cursor = self.store.backfill_cursor(FULL_BACKFILL_JOB).await?;
        let full_backfill = !full_done
            && (full_cursor.is_some() || self.store.delegation_state_count().await? == 0);

        // Addresses with stored state were already replayed or diffed; everything
        // else observed is pending, whichever side of a saved cursor it sorts on.
        let backfill = if full_backfill {
            self.backfill(FULL_BACKFILL_JOB, &new, full_cursor).await?
        } else if new.is_empty() {
            BackfillOutcome::default()
        } else {
            let cursor = self.store.backfill_cursor(INCREMENTAL_BACKFILL_JOB).await?;
            self.backfill(INCREMENTAL_BACKFILL_JOB, &new, cursor).await?
        };

        if !backfill.processed.is_empty() {
            let touched: Vec<StakeAddress> = backfill.processed.iter().cloned().collect();
            stored.extend(self.store.delegation_states(&touched).await?);
        }

        let mut report = DelegationSyncReport {
            epoch,
            observed: observed.len(),
            duplicate_observations,
            new_addresses: new.len(),
            full_backfill,
            backfilled: backfill.processed.len(),
            backfill_skipped: backfill.skipped.len(),
            events_recorded: backfill.events,
            states_refreshed: 0,
            failed_entities,
        };

        let diffable = addresses.iter().filter(|a| !backfill.skipped.contains(*a));
        self.write_diff(epoch, diffable, &observed, &stored, &mut report)
            .await?;

        info!(
            %epoch,
            observed = report.observed,
            duplicates = report.duplicate_observations,
            new_addresses = report.new_addresses,
            backfilled = report.backfilled,
            backfill_skipped = report.backfill_skipped,
            events = report.events_recorded,
            refreshed = report.states_refreshed,
            failed_entities = report.failed_entities.len(),
            "delegation sync finished"
        );
        Ok(report)
    }

    /// Current delegators of every target, aggregated last-write-wins.
    async fn observe(
        &self,
        targets: Vec<DelegateId>,
    ) -> (HashMap<StakeAddress, Observation>, usize, Vec<EntityFailure>) {
        let source = &self.source;
        let mut outcome = ConcurrencyLimitedFetcher::new(self.settings.concurrency)
            .run(targets, |drep_id: DelegateId| async move {
                let delegators = source.drep_delegators(&drep_id, None).await?;
                Ok::<_, UpstreamError>((drep_id, delegators))
            })
            .await;

        // Completion order is arbitrary; apply in entity order so reruns agree.
        outcome.successful.sort_by(|a, b| a.0.cmp(&b.0));

        let mut observed = HashMap::new();
        let mut duplicates = 0;
        for (drep_id, delegators) in outcome.successful {
            for d in delegators {
                let previous = observed.insert(
                    d.stake_address,
                    Observation {
                        drep_id: drep_id.clone(),
                        amount: d.amount,
                    },
                );
                if previous.is_some() {
                    duplicates += 1;
                }
            }
        }
        if duplicates > 0 {
            warn!(duplicates, "addresses reported under more than one entity; last report kept");
        }

        let failures = outcome
            .failed
            .into_iter()
            .map(|(drep_id, err)| {
                warn!(%drep_id, error = %err, "delegator fetch failed");
                EntityFailure {
                    drep_id,
                    error: err.to_string(),
                }
            })
            .collect();
        (observed, duplicates, failures)
    }

    /// Replay history for `pending` (sorted addresses with no stored state).
    ///
    /// A saved cursor only carries the progress count of an interrupted pass;
    /// it never excludes an address from `pending`.
    async fn backfill(
        &self,
        job_name: &str,
        pending: &[StakeAddress],
        cursor: Option<BackfillCursor>,
    ) -> Result<BackfillOutcome, SyncError> {
        let mut outcome = BackfillOutcome::default();
        let mut processed = cursor.as_ref().map_or(0, |c| c.processed);
        let total = processed + pending.len() as u64;

        info!(job_name, total, resume_from = processed, pending = pending.len(), "backfill starting");

        let batch_size = self.settings.history_batch_size.max(1);
        for (i, batch) in pending.chunks(batch_size).enumerate() {
            let remaining = self.source.remaining_quota();
            if let Some(remaining) = remaining.filter(|r| *r < self.settings.min_quota_reserve) {
                let rest = &pending[i * batch_size..];
                outcome.skipped.extend(rest.iter().cloned());
                warn!(
                    job_name,
                    remaining,
                    reserve = self.settings.min_quota_reserve,
                    skipped = rest.len(),
                    "upstream quota low; backfill stopped early"
                );
                return Ok(outcome);
            }

            let histories: HashMap<StakeAddress, Vec<DelegationUpdate>> = self
                .source
                .account_delegation_history(batch)
                .await?
                .into_iter()
                .map(|h| (h.stake_address, h.delegations))
                .collect();

            let now = Utc::now();
            for address in batch {
                let updates = histories.get(address).cloned().unwrap_or_default();
                let (events, state) = replay(address, updates, now);
                processed += 1;
                let cursor = BackfillCursor {
                    job_name: job_name.to_string(),
                    last_address: address.clone(),
                    processed,
                    total,
                };
                self.store
                    .apply_backfill(&events, state.as_ref(), &cursor)
                    .await?;
                outcome.events += events.len();
                outcome.processed.insert(address.clone());
            }
            debug!(job_name, processed, total, "backfill batch committed");
        }

        self.store.clear_backfill_cursor(job_name).await?;
        if job_name == FULL_BACKFILL_JOB {
            self.store.mark_backfill_done(job_name, Utc::now()).await?;
        }
        info!(job_name, processed = outcome.processed.len(), events = outcome.events, "backfill complete");
        Ok(outcome)
    }

    async fn write_diff<'a>(
        &self,
        epoch: Epoch,
        addresses: impl Iterator<Item = &'a StakeAddress>,
        observed: &HashMap<StakeAddress, Observation>,
        stored: &HashMap<StakeAddress, DelegationState>,
        report: &mut DelegationSyncReport,
    ) -> Result<(), SyncError> {
        let batch_size = self.settings.write_batch_size.max(1);
        let now = Utc::now();
        let mut events = Vec::new();
        let mut states = Vec::new();

        for address in addresses {
            let Some(obs) = observed.get(address) else {
                continue;
            };
            let next = DelegationState {
                stake_address: address.clone(),
                drep_id: obs.drep_id.clone(),
                amount: Some(obs.amount.clone()),
                epoch_observed: epoch,
            };
            match stored.get(address) {
                Some(current) if current.drep_id == obs.drep_id => {
                    if current.amount != next.amount || current.epoch_observed != epoch {
                        report.states_refreshed += 1;
                        states.push(next);
                    }
                }
                current => {
                    events.push(DelegationChangeEvent {
                        stake_address: address.clone(),
                        from_drep: current.map(|s| s.drep_id.clone()),
                        to_drep: obs.drep_id.clone(),
                        epoch,
                        amount: Some(obs.amount.clone()),
                        recorded_at: now,
                    });
                    states.push(next);
                }
            }

            if states.len() >= batch_size {
                report.events_recorded += events.len();
                self.store.apply_changes(&events, &states).await?;
                events.clear();
                states.clear();
            }
        }

        if !states.is_empty() {
            report.events_recorded += events.len();
            self.store.apply_changes(&events, &states).await?;
        }
        Ok(())
    }
}

/// One event per transition to a different delegate, in chain order, plus the
/// terminal state. No history means no events and no state.
fn replay(
    address: &StakeAddress,
    mut updates: Vec<DelegationUpdate>,
    recorded_at: DateTime<Utc>,
) -> (Vec<DelegationChangeEvent>, Option<DelegationState>) {
    updates.sort_by_key(DelegationUpdate::chain_order);

    let mut events = Vec::new();
    let mut current: Option<DelegateId> = None;
    for update in &updates {
        if current.as_ref() == Some(&update.drep_id) {
            continue;
        }
        events.push(DelegationChangeEvent {
            stake_address: address.clone(),
            from_drep: current.take(),
            to_drep: update.drep_id.clone(),
            epoch: update.epoch,
            amount: None,
            recorded_at,
        });
        current = Some(update.drep_id.clone());
    }

    let state = updates.last().map(|last| DelegationState {
        stake_address: address.clone(),
        drep_id: last.drep_id.clone(),
        amount: None,
        epoch_observed: last.epoch,
    });
    (events, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RetryPolicy;
    use crate::store::InMemorySyncStore;
    use crate::upstream::{Delegator, FakeLedgerApi};
    use proptest::prelude::*;

    fn drep(s: &str) -> DelegateId {
        DelegateId::parse(s).unwrap()
    }

    fn addr(s: &str) -> StakeAddress {
        StakeAddress::parse(s).unwrap()
    }

    fn ada(n: u64) -> Lovelace {
        Lovelace::from(n)
    }

    fn update(to: &str, epoch: u32, slot: u64) -> DelegationUpdate {
        DelegationUpdate {
            drep_id: drep(to),
            epoch: Epoch(epoch),
            epoch_slot: slot,
            abs_slot: u64::from(epoch) * 432_000 + slot,
            block_time: 1_600_000_000 + i64::from(epoch) * 432_000 + slot as i64,
        }
    }

    fn delegators(pairs: &[(&str, u64)]) -> Vec<Delegator> {
        pairs
            .iter()
            .map(|(a, amount)| Delegator {
                stake_address: addr(a),
                amount: ada(*amount),
            })
            .collect()
    }

    struct Harness {
        api: Arc<FakeLedgerApi>,
        store: Arc<InMemorySyncStore>,
        tracker: DelegationChangeTracker,
    }

    fn harness(settings: DelegationSyncSettings) -> Harness {
        let api = Arc::new(FakeLedgerApi::new());
        api.set_tip(Epoch(530));
        for name in ["drep1a", "drep1b", "drep1c"] {
            api.add_drep(drep(name), true, true);
            api.set_voting_power(Epoch(529), drep(name), ada(1_000));
        }
        let store = Arc::new(InMemorySyncStore::new());
        let source = LedgerSource::new(api.clone(), RetryPolicy::no_retry());
        let tracker = DelegationChangeTracker::new(store.clone(), store.clone(), source, settings);
        Harness { api, store, tracker }
    }

    async fn cycle(h: &Harness) -> DelegationSyncReport {
        h.tracker.sync(&mut JobCache::new()).await.unwrap()
    }

    fn event_tuples(events: &[DelegationChangeEvent]) -> Vec<(Option<DelegateId>, DelegateId, Epoch)> {
        events
            .iter()
            .map(|e| (e.from_drep.clone(), e.to_drep.clone(), e.epoch))
            .collect()
    }

    #[test]
    fn replay_emits_one_event_per_transition_in_chain_order() {
        let a = addr("stake1u1");
        let updates = vec![
            update("drep1b", 510, 5),
            update("drep1a", 500, 10),
            update("drep1b", 505, 1),
            update("drep1c", 510, 9),
        ];
        let (events, state) = replay(&a, updates, Utc::now());

        assert_eq!(
            event_tuples(&events),
            vec![
                (None, drep("drep1a"), Epoch(500)),
                (Some(drep("drep1a")), drep("drep1b"), Epoch(505)),
                (Some(drep("drep1b")), drep("drep1c"), Epoch(510)),
            ]
        );
        let state = state.unwrap();
        assert_eq!(state.drep_id, drep("drep1c"));
        assert_eq!(state.epoch_observed, Epoch(510));
    }

    #[tokio::test]
    async fn first_cycle_backfills_then_second_cycle_only_diffs() {
        let h = harness(DelegationSyncSettings::default());
        h.api.set_delegators(drep("drep1a"), delegators(&[("stake1u1", 10), ("stake1u2", 20)]));
        h.api.set_delegators(drep("drep1b"), delegators(&[("stake1u3", 30)]));
        h.api.set_history(addr("stake1u1"), vec![update("drep1b", 500, 1), update("drep1a", 510, 1)]);
        h.api.set_history(addr("stake1u2"), vec![update("drep1a", 520, 1)]);
        h.api.set_history(addr("stake1u3"), vec![update("drep1b", 515, 1)]);

        let first = cycle(&h).await;
        assert!(first.full_backfill);
        assert_eq!(first.observed, 3);
        assert_eq!(first.backfilled, 3);
        assert_eq!(first.events_recorded, 4);
        assert!(h.store.is_backfill_done(FULL_BACKFILL_JOB).await.unwrap());
        assert!(h.store.backfill_cursor(FULL_BACKFILL_JOB).await.unwrap().is_none());

        let state = h.store.delegation_states(&[addr("stake1u1")]).await.unwrap();
        assert_eq!(state[&addr("stake1u1")].amount, Some(ada(10)));

        // stake1u2 moves to drep1c; everyone else is unchanged
        h.api.set_delegators(drep("drep1a"), delegators(&[("stake1u1", 10)]));
        h.api.set_delegators(drep("drep1c"), delegators(&[("stake1u2", 20)]));
        let history_calls = h.api.calls("account_delegation_history");

        let second = cycle(&h).await;
        assert!(!second.full_backfill);
        assert_eq!(second.new_addresses, 0);
        assert_eq!(second.events_recorded, 1);
        assert_eq!(h.api.calls("account_delegation_history"), history_calls);

        let log = h.store.change_events(&addr("stake1u2")).await.unwrap();
        assert_eq!(
            event_tuples(&log).last(),
            Some(&(Some(drep("drep1a")), drep("drep1c"), Epoch(529)))
        );
    }

    #[tokio::test]
    async fn unchanged_cycle_records_no_events() {
        let h = harness(DelegationSyncSettings::default());
        h.api.set_delegators(drep("drep1a"), delegators(&[("stake1u1", 10)]));
        h.api.set_history(addr("stake1u1"), vec![update("drep1a", 500, 1)]);

        cycle(&h).await;
        let log_len = h.store.change_log_len().unwrap();

        let again = cycle(&h).await;
        assert_eq!(again.events_recorded, 0);
        assert_eq!(again.states_refreshed, 0);
        assert_eq!(h.store.change_log_len().unwrap(), log_len);
    }

    #[tokio::test]
    async fn only_unknown_addresses_are_backfilled_after_full_backfill() {
        let h = harness(DelegationSyncSettings::default());
        h.api.set_delegators(drep("drep1a"), delegators(&[("stake1u1", 10)]));
        h.api.set_history(addr("stake1u1"), vec![update("drep1a", 500, 1)]);
        cycle(&h).await;

        h.api.set_delegators(drep("drep1b"), delegators(&[("stake1u9", 5)]));
        h.api.set_history(addr("stake1u9"), vec![update("drep1c", 501, 1), update("drep1b", 502, 1)]);
        let report = cycle(&h).await;

        assert!(!report.full_backfill);
        assert_eq!(report.new_addresses, 1);
        assert_eq!(report.backfilled, 1);
        // two from history; the observation matches the terminal entry
        assert_eq!(report.events_recorded, 2);
        assert!(h.store.backfill_cursor(INCREMENTAL_BACKFILL_JOB).await.unwrap().is_none());
        assert!(h.store.change_events(&addr("stake1u1")).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn failed_entity_does_not_abort_the_cycle() {
        let h = harness(DelegationSyncSettings::default());
        h.api.set_delegators(drep("drep1a"), delegators(&[("stake1u1", 10)]));
        h.api.fail_delegators_of(
            drep("drep1b"),
            UpstreamError::Client {
                status: 400,
                message: "bad".into(),
            },
        );
        let report = cycle(&h).await;
        assert_eq!(report.observed, 1);
        assert_eq!(report.failed_entities.len(), 1);
        assert_eq!(report.failed_entities[0].drep_id, drep("drep1b"));
    }

    #[tokio::test]
    async fn duplicate_observations_keep_one_state() {
        let h = harness(DelegationSyncSettings::default());
        h.api.set_delegators(drep("drep1a"), delegators(&[("stake1u1", 10)]));
        h.api.set_delegators(drep("drep1b"), delegators(&[("stake1u1", 12)]));
        let report = cycle(&h).await;
        assert_eq!(report.observed, 1);
        assert_eq!(report.duplicate_observations, 1);
        let states = h.store.delegation_states(&[addr("stake1u1")]).await.unwrap();
        assert_eq!(states[&addr("stake1u1")].drep_id, drep("drep1b"));
    }

    #[tokio::test]
    async fn low_quota_stops_backfill_and_next_cycle_resumes() {
        let h = harness(DelegationSyncSettings {
            history_batch_size: 2,
            min_quota_reserve: 10,
            ..Default::default()
        });
        let observed: Vec<(String, u64)> = (0..6).map(|n| (format!("stake1u{n}"), 10)).collect();
        let pairs: Vec<(&str, u64)> = observed.iter().map(|(a, v)| (a.as_str(), *v)).collect();
        h.api.set_delegators(drep("drep1a"), delegators(&pairs));
        for (a, _) in &observed {
            h.api.set_history(addr(a), vec![update("drep1a", 500, 1)]);
        }
        // one batch fits above the reserve
        h.api.set_quota(Some(10));

        let first = cycle(&h).await;
        assert!(first.full_backfill);
        assert_eq!(first.backfilled, 2);
        assert_eq!(first.backfill_skipped, 4);
        let cursor = h.store.backfill_cursor(FULL_BACKFILL_JOB).await.unwrap().unwrap();
        assert_eq!(cursor.last_address, addr("stake1u1"));
        assert_eq!(cursor.processed, 2);
        assert!(!h.store.is_backfill_done(FULL_BACKFILL_JOB).await.unwrap());
        // skipped addresses are excluded from the diff
        assert!(h.store.delegation_states(&[addr("stake1u5")]).await.unwrap().is_empty());

        h.api.set_quota(None);
        let second = cycle(&h).await;
        assert!(second.full_backfill);
        assert_eq!(second.backfilled, 4);
        assert_eq!(second.backfill_skipped, 0);
        assert!(h.store.is_backfill_done(FULL_BACKFILL_JOB).await.unwrap());
        for (a, _) in &observed {
            assert_eq!(h.store.change_events(&addr(a)).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn address_sorting_before_the_cursor_is_still_backfilled() {
        let h = harness(DelegationSyncSettings {
            history_batch_size: 2,
            min_quota_reserve: 10,
            ..Default::default()
        });
        let first_seen = ["stake1u2", "stake1u3", "stake1u4", "stake1u5"];
        let pairs: Vec<(&str, u64)> = first_seen.iter().map(|a| (*a, 10)).collect();
        h.api.set_delegators(drep("drep1a"), delegators(&pairs));
        for a in first_seen {
            h.api.set_history(addr(a), vec![update("drep1a", 500, 1)]);
        }
        h.api.set_quota(Some(10));

        let first = cycle(&h).await;
        assert_eq!(first.backfilled, 2);
        let cursor = h.store.backfill_cursor(FULL_BACKFILL_JOB).await.unwrap().unwrap();
        assert_eq!(cursor.last_address, addr("stake1u3"));

        // stake1u0 appears after the cursor was saved and sorts below it
        let mut pairs = pairs.clone();
        pairs.push(("stake1u0", 7));
        h.api.set_delegators(drep("drep1a"), delegators(&pairs));
        h.api.set_history(addr("stake1u0"), vec![update("drep1b", 400, 1), update("drep1a", 450, 1)]);
        h.api.set_quota(None);

        let second = cycle(&h).await;
        assert!(second.full_backfill);
        assert_eq!(second.backfilled, 3);
        assert_eq!(second.backfill_skipped, 0);
        assert!(h.store.is_backfill_done(FULL_BACKFILL_JOB).await.unwrap());

        let log = h.store.change_events(&addr("stake1u0")).await.unwrap();
        assert_eq!(
            event_tuples(&log),
            vec![
                (None, drep("drep1b"), Epoch(400)),
                (Some(drep("drep1b")), drep("drep1a"), Epoch(450)),
            ]
        );
    }

    #[tokio::test]
    async fn incremental_backfill_ignores_a_stale_cursor() {
        let h = harness(DelegationSyncSettings::default());
        h.api.set_delegators(drep("drep1a"), delegators(&[("stake1u5", 10)]));
        h.api.set_history(addr("stake1u5"), vec![update("drep1a", 500, 1)]);
        cycle(&h).await;

        h.store
            .apply_backfill(
                &[],
                None,
                &BackfillCursor {
                    job_name: INCREMENTAL_BACKFILL_JOB.to_string(),
                    last_address: addr("stake1u8"),
                    processed: 1,
                    total: 2,
                },
            )
            .await
            .unwrap();

        h.api.set_delegators(drep("drep1b"), delegators(&[("stake1u1", 3)]));
        h.api.set_history(addr("stake1u1"), vec![update("drep1c", 490, 1), update("drep1b", 495, 1)]);
        let report = cycle(&h).await;

        assert_eq!(report.backfilled, 1);
        assert_eq!(h.store.change_events(&addr("stake1u1")).await.unwrap().len(), 2);
        assert!(h.store.backfill_cursor(INCREMENTAL_BACKFILL_JOB).await.unwrap().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Stopping a backfill at any point and resuming it yields the same
        /// change log as one uninterrupted run.
        #[test]
        fn interrupted_backfill_matches_uninterrupted(
            histories in prop::collection::vec(prop::collection::vec(0u8..3, 0..5), 1..8),
            stop_after_batches in 0usize..4,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let names = ["drep1a", "drep1b", "drep1c"];
                let setup = |h: &Harness| {
                    let addrs: Vec<(String, u64)> = (0..histories.len()).map(|n| (format!("stake1u{n:02}"), 1)).collect();
                    let pairs: Vec<(&str, u64)> = addrs.iter().map(|(a, v)| (a.as_str(), *v)).collect();
                    h.api.set_delegators(drep("drep1a"), delegators(&pairs));
                    for ((a, _), hist) in addrs.iter().zip(&histories) {
                        let updates = hist
                            .iter()
                            .enumerate()
                            .map(|(i, d)| update(names[usize::from(*d)], 500 + i as u32, 1))
                            .collect();
                        h.api.set_history(addr(a), updates);
                    }
                    addrs
                };
                let settings = DelegationSyncSettings {
                    history_batch_size: 2,
                    min_quota_reserve: 1,
                    ..Default::default()
                };

                let straight = harness(settings.clone());
                let addrs = setup(&straight);
                cycle(&straight).await;

                let resumed = harness(settings);
                setup(&resumed);
                resumed.api.set_quota(Some(stop_after_batches as u64));
                cycle(&resumed).await;
                resumed.api.set_quota(None);
                cycle(&resumed).await;

                for (a, _) in &addrs {
                    let x = straight.store.change_events(&addr(a)).await.unwrap();
                    let y = resumed.store.change_events(&addr(a)).await.unwrap();
                    assert_eq!(event_tuples(&x), event_tuples(&y), "address {a}");
                }
            });
        }
    }
}

//! False-positive reconciliation.
//!
//! Compares fingerprints the pipeline acted on (the observed corpus) against
//! an operator-curated known-bad corpus (the reference). Observed entries
//! that are not within `moderate_distance` of any reference fingerprint were
//! false positives and get whitelisted. The job only ever adds to the
//! whitelist; it never touches a stored label.
//!
//! ```text
//! Idle ──trigger──▶ Scanning ──corpora fetched──▶ Reconciling ──union──▶ Idle
//!                      │                               │
//!                      └──────── failure ──────────────┴──▶ Idle (no changes)
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, ReconcileConfig};
use crate::error::{Result, WardenError};
use crate::fingerprint::{ContentHash, Fingerprint, FingerprintSet};
use crate::gate::{ExemptionGate, WhitelistSet};
use crate::store::FingerprintStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileState {
    Idle,
    Scanning,
    Reconciling,
}

/// One enforced attachment as remembered by the enforcement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedFingerprint {
    pub content_hash: ContentHash,
    pub perceptual_hashes: Vec<Fingerprint>,
}

impl From<&FingerprintSet> for ObservedFingerprint {
    fn from(set: &FingerprintSet) -> Self {
        Self {
            content_hash: set.content_hash(),
            perceptual_hashes: set.perceptual_hashes().to_vec(),
        }
    }
}

/// Supplier of both reconciliation corpora.
///
/// Implementations may hit the network or disk; failures should surface as
/// [`WardenError::CollaboratorUnavailable`].
#[async_trait]
pub trait CorpusSource: Send + Sync {
    /// Up to `limit` most recent observed fingerprints.
    async fn observed(&self, limit: usize) -> Result<Vec<ObservedFingerprint>>;

    /// Known-bad reference fingerprints.
    async fn reference(&self) -> Result<Vec<Fingerprint>>;
}

/// Fixed corpora held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticCorpus {
    pub observed: Vec<ObservedFingerprint>,
    pub reference: Vec<Fingerprint>,
}

#[async_trait]
impl CorpusSource for StaticCorpus {
    async fn observed(&self, limit: usize) -> Result<Vec<ObservedFingerprint>> {
        Ok(self.observed.iter().take(limit).cloned().collect())
    }

    async fn reference(&self) -> Result<Vec<Fingerprint>> {
        Ok(self.reference.clone())
    }
}

/// Bounded log of fingerprints the pipeline took action on. Oldest entries
/// fall off once `capacity` is reached.
#[derive(Debug)]
pub struct EnforcementLog {
    entries: Mutex<VecDeque<ObservedFingerprint>>,
    capacity: usize,
}

impl EnforcementLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, observed: ObservedFingerprint) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(observed);
    }

    /// The `limit` most recent entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ObservedFingerprint> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Enforcement log as the observed corpus, the store's `phish` records as the
/// reference corpus.
#[derive(Debug, Clone)]
pub struct LoggedCorpus {
    log: Arc<EnforcementLog>,
    store: Arc<FingerprintStore>,
}

impl LoggedCorpus {
    pub fn new(log: Arc<EnforcementLog>, store: Arc<FingerprintStore>) -> Self {
        Self { log, store }
    }
}

#[async_trait]
impl CorpusSource for LoggedCorpus {
    async fn observed(&self, limit: usize) -> Result<Vec<ObservedFingerprint>> {
        Ok(self.log.recent(limit))
    }

    async fn reference(&self) -> Result<Vec<Fingerprint>> {
        Ok(self.store.phish_fingerprints())
    }
}

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub observed: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    /// Observed entries without a perceptual hash; never whitelisted
    pub unclassified: usize,
    /// Whitelist entries that were not present before
    pub newly_whitelisted: usize,
}

/// Resets the job to `Idle` however the cycle ends.
struct CycleGuard<'a>(&'a Mutex<ReconcileState>);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = ReconcileState::Idle;
    }
}

pub struct Reconciler {
    source: Arc<dyn CorpusSource>,
    gate: Arc<ExemptionGate>,
    moderate_distance: u32,
    observed_limit: usize,
    interval: Duration,
    persist: bool,
    state: Mutex<ReconcileState>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("moderate_distance", &self.moderate_distance)
            .field("observed_limit", &self.observed_limit)
            .field("interval", &self.interval)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn CorpusSource>,
        gate: Arc<ExemptionGate>,
        moderate_distance: u32,
        observed_limit: usize,
    ) -> Self {
        Self {
            source,
            gate,
            moderate_distance,
            observed_limit,
            interval: ReconcileConfig::default().interval(),
            persist: false,
            state: Mutex::new(ReconcileState::Idle),
        }
    }

    /// Thresholds, corpus limit and period taken from `config`.
    pub fn from_config(
        source: Arc<dyn CorpusSource>,
        gate: Arc<ExemptionGate>,
        config: &Config,
    ) -> Self {
        Self::new(
            source,
            gate,
            config.policy.moderate_distance,
            config.reconcile.observed_limit,
        )
        .with_interval(config.reconcile.interval())
    }

    /// Period used by [`Reconciler::spawn_periodic`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Write the extended whitelist to its backing file before publishing it.
    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn state(&self) -> ReconcileState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: ReconcileState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn begin(&self) -> Result<CycleGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != ReconcileState::Idle {
            return Err(WardenError::ReconcileInProgress);
        }
        *state = ReconcileState::Scanning;
        Ok(CycleGuard(&self.state))
    }

    /// Run one cycle.
    ///
    /// Corpus failures abort the cycle before anything is written.
    #[instrument(skip(self), fields(limit = self.observed_limit))]
    pub async fn run(&self) -> Result<ReconcileReport> {
        let _guard = self.begin()?;

        let observed = self
            .source
            .observed(self.observed_limit)
            .await
            .map_err(unavailable)?;
        let reference = self.source.reference().await.map_err(unavailable)?;

        if observed.is_empty() {
            return Err(WardenError::CorpusEmpty("observed"));
        }
        if reference.is_empty() {
            return Err(WardenError::CorpusEmpty("reference"));
        }

        self.set_state(ReconcileState::Reconciling);

        let mut report = ReconcileReport::default();
        let mut false_positives = WhitelistSet::default();
        for entry in observed.iter().take(self.observed_limit) {
            report.observed += 1;
            if entry.perceptual_hashes.is_empty() {
                report.unclassified += 1;
                continue;
            }
            if self.is_true_positive(entry, &reference) {
                report.true_positives += 1;
            } else {
                report.false_positives += 1;
                debug!(content_hash = %entry.content_hash.short(), "False positive");
                false_positives.content_hashes.insert(entry.content_hash);
                false_positives
                    .perceptual_hashes
                    .extend(entry.perceptual_hashes.iter().cloned());
            }
        }

        report.newly_whitelisted = if self.persist {
            self.gate.commit_whitelist(&false_positives)?
        } else {
            self.gate.union_whitelist(&false_positives)
        };

        info!(
            observed = report.observed,
            true_positives = report.true_positives,
            false_positives = report.false_positives,
            newly_whitelisted = report.newly_whitelisted,
            "Reconciliation cycle complete"
        );
        Ok(report)
    }

    fn is_true_positive(&self, entry: &ObservedFingerprint, reference: &[Fingerprint]) -> bool {
        entry.perceptual_hashes.iter().any(|observed| {
            reference.iter().any(|known| {
                observed
                    .distance(known)
                    .is_some_and(|d| d <= self.moderate_distance)
            })
        })
    }

    /// Run a cycle every [`interval`](Reconciler::interval) until the
    /// returned handle is aborted.
    ///
    /// The first cycle starts one full period after the call.
    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        // interval_at panics on a zero period.
        let period = self.interval.max(Duration::from_secs(1));
        info!(period_secs = period.as_secs(), "Periodic reconciliation scheduled");
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run().await {
                    warn!(error = %e, "Reconciliation cycle aborted");
                }
            }
        })
    }
}

fn unavailable(err: WardenError) -> WardenError {
    match err {
        WardenError::CollaboratorUnavailable(_) => err,
        other => WardenError::CollaboratorUnavailable(other.to_string()),
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide analytics store with blocking timestamp queries
//!
//! One mutex guards every series and a single condition variable is
//! notified on every insert, so all blocked readers re-check regardless of
//! which analytics id changed.

use super::types::{
    AnalyticsConfig, AnalyticsEntry, AnalyticsKind, DeltaSearchPolicy, NetworkConfig, Query,
    QueryKind,
};
use crate::errors::{MaskError, MaskResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

static GLOBAL_STORE: OnceLock<Arc<AnalyticsStore>> = OnceLock::new();

/// Retained results for one analytics id
#[derive(Debug)]
struct Series {
    config: NetworkConfig,
    entries: BTreeMap<Duration, Arc<AnalyticsEntry>>,
}

impl Series {
    fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    /// Set once any analytics configuration has been registered
    configured: bool,
    detection: HashMap<String, Series>,
    instance_segmentation: HashMap<String, Series>,
}

impl StoreState {
    fn series(&self, kind: AnalyticsKind) -> &HashMap<String, Series> {
        match kind {
            AnalyticsKind::Detection => &self.detection,
            AnalyticsKind::InstanceSegmentation => &self.instance_segmentation,
        }
    }

    fn series_mut(&mut self, kind: AnalyticsKind) -> &mut HashMap<String, Series> {
        match kind {
            AnalyticsKind::Detection => &mut self.detection,
            AnalyticsKind::InstanceSegmentation => &mut self.instance_segmentation,
        }
    }
}

/// Thread-safe, time-indexed cache of analytics results
///
/// Producers and consumers normally share one instance through an `Arc`
/// injected at construction; [`AnalyticsStore::global`] exists for stages
/// that cannot be wired explicitly.
#[derive(Debug, Default)]
pub struct AnalyticsStore {
    state: Mutex<StoreState>,
    entry_added: Condvar,
    delta_policy: DeltaSearchPolicy,
}

impl AnalyticsStore {
    /// Create an empty, unconfigured store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a non-default `WithinDelta` selection policy
    pub fn with_delta_policy(delta_policy: DeltaSearchPolicy) -> Self {
        Self {
            delta_policy,
            ..Self::default()
        }
    }

    /// Shared process-wide instance
    pub fn global() -> Arc<AnalyticsStore> {
        Arc::clone(GLOBAL_STORE.get_or_init(|| Arc::new(AnalyticsStore::new())))
    }

    pub fn delta_policy(&self) -> DeltaSearchPolicy {
        self.delta_policy
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge an application analytics configuration
    ///
    /// Every id present in `config` is (re)registered with an empty history,
    /// even if its configuration is unchanged.
    pub fn add_configuration(&self, config: &AnalyticsConfig) -> MaskResult<()> {
        for network in config
            .detection
            .values()
            .chain(config.instance_segmentation.values())
        {
            network.validate()?;
        }

        let mut state = self.lock();
        for (kind, configs) in [
            (AnalyticsKind::Detection, &config.detection),
            (AnalyticsKind::InstanceSegmentation, &config.instance_segmentation),
        ] {
            for (id, network) in configs {
                let replaced = state
                    .series_mut(kind)
                    .insert(id.clone(), Series::new(network.clone()))
                    .is_some();
                info!(
                    id = %id,
                    %kind,
                    max_entries = network.max_entries,
                    replaced,
                    "Registered analytics configuration"
                );
            }
        }

        if !config.is_empty() {
            state.configured = true;
        }
        Ok(())
    }

    /// Configuration registered for an analytics id
    pub fn network_config(&self, kind: AnalyticsKind, id: &str) -> MaskResult<NetworkConfig> {
        self.lock()
            .series(kind)
            .get(id)
            .map(|series| series.config.clone())
            .ok_or_else(|| MaskError::NotFound(format!("{} analytics id '{}'", kind, id)))
    }

    /// Insert a result, evicting the oldest entries beyond the retention bound
    pub fn add_entry(&self, kind: AnalyticsKind, id: &str, entry: AnalyticsEntry) -> MaskResult<()> {
        let mut state = self.lock();
        if !state.configured {
            return Err(MaskError::Configuration(
                "analytics store has no configuration".into(),
            ));
        }

        let series = state
            .series_mut(kind)
            .get_mut(id)
            .ok_or_else(|| MaskError::NotFound(format!("{} analytics id '{}'", kind, id)))?;

        let timestamp = entry.timestamp;
        series.entries.insert(timestamp, Arc::new(entry));
        while series.entries.len() > series.config.max_entries {
            if let Some((evicted, _)) = series.entries.pop_first() {
                trace!(id = %id, evicted_ns = evicted.as_nanos() as u64, "Evicted analytics entry");
            }
        }
        drop(state);

        trace!(id = %id, %kind, timestamp_ns = timestamp.as_nanos() as u64, "Added analytics entry");
        self.entry_added.notify_all();
        Ok(())
    }

    pub fn add_detection_entry(&self, id: &str, entry: AnalyticsEntry) -> MaskResult<()> {
        self.add_entry(AnalyticsKind::Detection, id, entry)
    }

    pub fn add_instance_segmentation_entry(
        &self,
        id: &str,
        entry: AnalyticsEntry,
    ) -> MaskResult<()> {
        self.add_entry(AnalyticsKind::InstanceSegmentation, id, entry)
    }

    /// Look up an entry, blocking until one matches or `query.timeout` elapses
    ///
    /// A timeout is reported as `NotFound`, the same as an id that never
    /// receives data.
    pub fn query(
        &self,
        kind: AnalyticsKind,
        id: &str,
        query: &Query,
    ) -> MaskResult<Arc<AnalyticsEntry>> {
        // A timeout too large for an Instant waits without a deadline
        let deadline = Instant::now().checked_add(query.timeout);
        let mut state = self.lock();

        loop {
            if let Some(entry) = state
                .series(kind)
                .get(id)
                .and_then(|series| self.find(&series.entries, query))
            {
                return Ok(entry);
            }

            let Some(deadline) = deadline else {
                state = self
                    .entry_added
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };

            let now = Instant::now();
            if now >= deadline {
                debug!(
                    id = %id,
                    %kind,
                    kind_of_query = ?query.kind,
                    timestamp_ns = query.timestamp.as_nanos() as u64,
                    "Analytics query timed out"
                );
                return Err(MaskError::NotFound(format!(
                    "no {} entry for '{}' matching {:?} at {:?}",
                    kind, id, query.kind, query.timestamp
                )));
            }

            let (guard, _) = self
                .entry_added
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    pub fn query_detection(&self, id: &str, query: &Query) -> MaskResult<Arc<AnalyticsEntry>> {
        self.query(AnalyticsKind::Detection, id, query)
    }

    pub fn query_instance_segmentation(
        &self,
        id: &str,
        query: &Query,
    ) -> MaskResult<Arc<AnalyticsEntry>> {
        self.query(AnalyticsKind::InstanceSegmentation, id, query)
    }

    /// Number of retained entries for an id (0 if unknown)
    pub fn entry_count(&self, kind: AnalyticsKind, id: &str) -> usize {
        self.lock()
            .series(kind)
            .get(id)
            .map_or(0, |series| series.entries.len())
    }

    /// Timestamps retained for an id, oldest first
    pub fn timestamps(&self, kind: AnalyticsKind, id: &str) -> Vec<Duration> {
        self.lock()
            .series(kind)
            .get(id)
            .map(|series| series.entries.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Drop every configuration and entry, returning to the unconfigured state
    pub fn clear(&self) {
        *self.lock() = StoreState::default();
        info!("Cleared analytics store");
    }

    fn find(
        &self,
        entries: &BTreeMap<Duration, Arc<AnalyticsEntry>>,
        query: &Query,
    ) -> Option<Arc<AnalyticsEntry>> {
        let target = query.timestamp;
        let found = match query.kind {
            QueryKind::Exact => entries.get(&target),
            QueryKind::Closest => entries
                .iter()
                .min_by_key(|(timestamp, _)| timestamp.abs_diff(target))
                .map(|(_, entry)| entry),
            QueryKind::WithinDelta => {
                let lower = target.saturating_sub(query.delta);
                let upper = target.saturating_add(query.delta);
                match self.delta_policy {
                    DeltaSearchPolicy::PastFirst => entries
                        .range(lower..target)
                        .next_back()
                        .or_else(|| entries.range(target..=upper).next())
                        .map(|(_, entry)| entry),
                    DeltaSearchPolicy::Nearest => {
                        let past = entries.range(lower..target).next_back();
                        let future = entries.range(target..=upper).next();
                        match (past, future) {
                            (Some(p), Some(f)) => {
                                if f.0.abs_diff(target) < p.0.abs_diff(target) {
                                    Some(f.1)
                                } else {
                                    Some(p.1)
                                }
                            }
                            (p, f) => p.or(f).map(|(_, entry)| entry),
                        }
                    }
                }
            }
        };
        found.map(Arc::clone)
    }
}

//! Per-call-site history tables and pending-operation registries.
//!
//! # Architecture
//!
//! - **`History`** - one record per key (normally a `traceId`), created on
//!   first observation and kept until an explicit reset
//! - **`OnlineRegistry`** - ephemeral registrations of pending operations,
//!   keyed by host handle, each removed at most once
//! - **`CallCounters`** - total calls per entry point
//!
//! # Performance
//!
//! - `record_call()`: O(1) amortized (HashMap entry)
//! - `collect()`: O(n log n) where n = distinct call sites (sorting)
//! - Memory: unbounded until reset

use callscope_common::{CallSite, ClearRecord, DisplayValue, Fact, Record, RecordHeader, TraceId};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::domain::Handle;
use crate::host::HostValue;
use crate::validation::validate_handler;

// =============================================================================
// HISTORY
// =============================================================================

/// Records keyed by call-site identity.
#[derive(Debug, Clone)]
pub struct History<K, R> {
    records: HashMap<K, R>,
}

/// The common case: one record per traced call site.
pub type CallSiteHistory<R> = History<TraceId, R>;

impl<K, R> Default for History<K, R> {
    fn default() -> Self {
        Self { records: HashMap::new() }
    }
}

impl<K, R> History<K, R>
where
    K: Eq + Hash + Ord + Clone,
    R: Record + Clone,
{
    /// Count one call for `key`, creating its record from `site` on first
    /// observation. Returns the record for further updates.
    pub fn record_call(
        &mut self,
        key: K,
        site: &CallSite,
        create: impl FnOnce(RecordHeader) -> R,
    ) -> &mut R {
        let record = self.records.entry(key).or_insert_with(|| create(RecordHeader::new(site.clone())));
        record.header_mut().calls += 1;
        record
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&R> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut R> {
        self.records.get_mut(key)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut R> {
        self.records.values_mut()
    }

    /// Records ordered by calls (descending), ties broken by key.
    #[must_use]
    pub fn collect(&self) -> Vec<R> {
        let mut entries: Vec<(&K, &R)> = self.records.iter().collect();
        entries.sort_unstable_by(|(ka, a), (kb, b)| {
            b.header().calls.cmp(&a.header().calls).then_with(|| ka.cmp(kb))
        });
        entries.into_iter().map(|(_, record)| record.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// ONLINE REGISTRY
// =============================================================================

/// Pending operations keyed by the handle the host issued.
#[derive(Debug, Clone)]
pub struct OnlineRegistry<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Default for OnlineRegistry<K, V> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<K: Eq + Hash, V> OnlineRegistry<K, V> {
    pub fn register(&mut self, key: K, registration: V) {
        self.entries.insert(key, registration);
    }

    /// Remove and return the registration. A second take returns `None`.
    pub fn take(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of registrations matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&V) -> bool) -> u64 {
        self.entries.values().filter(|v| predicate(v)).count() as u64
    }
}

/// What a cancellation argument resolved to.
#[derive(Debug)]
pub enum CancelLookup<V> {
    /// Not a positive integer; carries the tagged display form
    BadHandler(DisplayValue),
    /// Valid handle with no pending registration
    NotFound(Handle),
    Found(Handle, V),
}

impl<V> OnlineRegistry<Handle, V> {
    /// Validate a cancellation argument and take its registration.
    /// Invalid handles are never looked up.
    pub fn lookup_cancel(&mut self, value: &HostValue) -> CancelLookup<V> {
        match validate_handler(value) {
            Err(tagged) => CancelLookup::BadHandler(tagged),
            Ok(handle) => match self.take(&handle) {
                Some(registration) => CancelLookup::Found(handle, registration),
                None => CancelLookup::NotFound(handle),
            },
        }
    }
}

/// Display form of a valid handle.
#[must_use]
pub fn handle_display(handle: Handle) -> DisplayValue {
    DisplayValue::Number(f64::from(handle.0))
}

/// Upsert the canceler's record in a clear-history.
pub fn record_clear(
    history: &mut CallSiteHistory<ClearRecord>,
    site: &CallSite,
    handler: DisplayValue,
    delay: Option<DisplayValue>,
    fact: Option<Fact>,
) {
    let record = history.record_call(site.trace_id.clone(), site, |header| ClearRecord {
        header,
        handler: DisplayValue::Unset,
        delay: None,
    });
    record.handler = handler;
    record.delay = delay;
    if let Some(fact) = fact {
        record.header.facts.assign(fact);
    }
}

// =============================================================================
// CALL COUNTERS
// =============================================================================

/// Total invocations per entry point, reported even when a capability's
/// collections are hidden.
#[derive(Debug, Clone, Default)]
pub struct CallCounters {
    counts: BTreeMap<&'static str, u64>,
}

impl CallCounters {
    /// Counters for `entry_points`, all starting at zero.
    #[must_use]
    pub fn new(entry_points: &[&'static str]) -> Self {
        Self { counts: entry_points.iter().map(|name| (*name, 0)).collect() }
    }

    pub fn bump(&mut self, entry_point: &'static str) {
        *self.counts.entry(entry_point).or_insert(0) += 1;
    }

    #[must_use]
    pub fn get(&self, entry_point: &str) -> u64 {
        self.counts.get(entry_point).copied().unwrap_or(0)
    }

    pub fn write_into(&self, target: &mut BTreeMap<String, u64>) {
        for (name, count) in &self.counts {
            target.insert((*name).to_owned(), *count);
        }
    }

    pub fn zero(&mut self) {
        self.counts.values_mut().for_each(|count| *count = 0);
    }
}

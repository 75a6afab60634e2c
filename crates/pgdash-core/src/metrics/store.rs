//! Per-session metric store.
//!
//! Owns the session clock and one `MetricSeries` per catalog entry. Raw
//! samples are routed through a dispatch table keyed by source category,
//! built once in `reset()` and reused every cycle.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::catalog::{Derivation, MetricDefinition, MetricGroup, SessionContext, builtin_catalog, series_name};
use super::series::{MetricSeries, smooth_boundary};
use crate::snapshot::{Category, PollSnapshot, RawFields, numeric_field};

// ---------------------------------------------------------------------------
// Persistence form
// ---------------------------------------------------------------------------

/// Fully materialized store contents: the clock plus every series' values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub clock: Vec<DateTime<Utc>>,
    pub series: BTreeMap<String, Vec<f64>>,
}

impl StoreSnapshot {
    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `100 * numerator / (numerator + denominator)` rounded to one decimal,
/// `default_when_empty` when the total is zero.
pub fn ratio_percent(numerator: f64, denominator: f64, default_when_empty: f64) -> f64 {
    let total = numerator + denominator;
    if total > 0.0 {
        (numerator / total * 1000.0).round_ties_even() / 10.0
    } else {
        default_when_empty
    }
}

/// Per-second rate between two raw counter readings, halves rounded to even;
/// 0 when no time passed.
pub fn per_second(raw: f64, last: f64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        ((raw - last) / elapsed_secs).round_ties_even()
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct SeriesSlot {
    name: String,
    definition: MetricDefinition,
    contexts: &'static [SessionContext],
    series: MetricSeries,
}

/// A sampled metric fed by one raw field of a category.
struct DispatchEntry {
    field: &'static str,
    slot: usize,
    contexts: &'static [SessionContext],
}

/// Metric store for one monitoring session.
pub struct MetricStore {
    catalog: Vec<MetricGroup>,
    context: SessionContext,
    slots: Vec<SeriesSlot>,
    by_name: HashMap<String, usize>,
    dispatch: HashMap<Category, Vec<DispatchEntry>>,
    derived: Vec<usize>,
    /// Latest raw fields per category, merged across cycles.
    raw: BTreeMap<Category, RawFields>,
    clock: VecDeque<DateTime<Utc>>,
    /// Set after the first ingest; nothing is emitted before that.
    initialized: bool,
}

impl MetricStore {
    /// Store with the built-in catalog.
    pub fn new(context: SessionContext) -> Self {
        Self::with_catalog(builtin_catalog(), context)
    }

    pub fn with_catalog(catalog: Vec<MetricGroup>, context: SessionContext) -> Self {
        let mut store = Self {
            catalog,
            context,
            slots: Vec::new(),
            by_name: HashMap::new(),
            dispatch: HashMap::new(),
            derived: Vec::new(),
            raw: BTreeMap::new(),
            clock: VecDeque::new(),
            initialized: false,
        };
        store.reset();
        store
    }

    /// Rebuilds every series from the catalog, clears the clock and rebuilds
    /// the dispatch table. Wipes all history.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.by_name.clear();
        self.dispatch.clear();
        self.derived.clear();
        self.raw.clear();
        self.clock.clear();
        self.initialized = false;

        for group in &self.catalog {
            for definition in &group.metrics {
                let slot = self.slots.len();
                let name = series_name(group.name, definition.field);
                match (definition.derivation, group.source) {
                    (Derivation::Sampled, Some(category)) => {
                        self.dispatch.entry(category).or_default().push(DispatchEntry {
                            field: definition.field,
                            slot,
                            contexts: group.contexts,
                        });
                    }
                    (Derivation::Sampled, None) => {
                        debug!(series = %name, "sampled metric without a source, never fed");
                    }
                    _ => self.derived.push(slot),
                }
                self.by_name.insert(name.clone(), slot);
                self.slots.push(SeriesSlot {
                    name,
                    definition: definition.clone(),
                    contexts: group.contexts,
                    series: MetricSeries::new(definition.visible),
                });
            }
        }
    }

    pub fn context(&self) -> SessionContext {
        self.context
    }

    pub fn catalog(&self) -> &[MetricGroup] {
        &self.catalog
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Ingests one cycle's raw input.
    ///
    /// `elapsed_secs` is the time since the previous cycle started, the
    /// divisor for per-second rates. The first call only records baselines;
    /// it emits nothing and does not advance the clock.
    pub fn ingest(&mut self, snapshot: &PollSnapshot, elapsed_secs: f64, timestamp: DateTime<Utc>) {
        for (category, fields) in snapshot.categories() {
            if category == Category::SessionVariables {
                continue;
            }
            self.raw
                .entry(category)
                .or_default()
                .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let emit = self.initialized;
        self.update_sampled(elapsed_secs, emit);
        if emit {
            self.update_derived();
        }
        self.update_last_values();

        if emit {
            self.advance_clock(timestamp);
        }
        self.initialized = true;
        trace!(clock_len = self.clock.len(), "ingested cycle");
    }

    fn update_sampled(&mut self, elapsed_secs: f64, emit: bool) {
        let context = self.context;
        for (category, entries) in &self.dispatch {
            let fields = self.raw.get(category);
            for entry in entries {
                if !entry.contexts.contains(&context) {
                    continue;
                }
                let slot = &mut self.slots[entry.slot];
                let save_history = slot.definition.save_history;

                // A category not seen yet, or seen for the first time, has no
                // delta. Emit a zero so the series stays aligned with the clock.
                let (Some(fields), Some(last)) = (fields, slot.series.last_value) else {
                    if emit {
                        slot.series.push(0.0, save_history);
                    }
                    continue;
                };

                let raw = numeric_field(fields, entry.field);
                let mut value = if slot.definition.per_second {
                    per_second(raw, last, elapsed_secs)
                } else {
                    raw
                };
                if slot.definition.smooth_boundary {
                    value = smooth_boundary(&mut slot.series, value);
                }
                slot.series.push(value, save_history);
            }
        }
    }

    fn update_derived(&mut self) {
        let context = self.context;
        for &index in &self.derived {
            if !self.slots[index].contexts.contains(&context) {
                continue;
            }
            let value = match self.slots[index].definition.derivation {
                Derivation::Direct { category, field } => self
                    .raw
                    .get(&category)
                    .map(|f| numeric_field(f, field))
                    .unwrap_or(0.0),
                Derivation::Ratio {
                    category,
                    numerator,
                    denominator,
                    default_when_empty,
                } => self.derive_ratio(category, numerator, denominator, default_when_empty),
                Derivation::Sampled => continue,
            };
            let slot = &mut self.slots[index];
            slot.series.push(value, slot.definition.save_history);
        }
    }

    /// Raw values are committed only after every emission of the cycle.
    fn update_last_values(&mut self) {
        for (category, entries) in &self.dispatch {
            let Some(fields) = self.raw.get(category) else {
                continue;
            };
            for entry in entries {
                self.slots[entry.slot].series.last_value = Some(numeric_field(fields, entry.field));
            }
        }
    }

    /// Percentage ratio of two raw fields of `category`, from the latest
    /// merged raw data.
    pub fn derive_ratio(
        &self,
        category: Category,
        numerator_field: &str,
        denominator_field: &str,
        default_when_empty: f64,
    ) -> f64 {
        match self.raw.get(&category) {
            Some(fields) => ratio_percent(
                numeric_field(fields, numerator_field),
                numeric_field(fields, denominator_field),
                default_when_empty,
            ),
            None => default_when_empty,
        }
    }

    /// Appends a cycle timestamp. Live polling only; replay loads its clock.
    pub fn advance_clock(&mut self, timestamp: DateTime<Utc>) {
        self.clock.push_back(timestamp);
    }

    /// Drops every cycle older than `age` relative to now. Returns the number
    /// of cycles dropped.
    pub fn evict_older_than(&mut self, age: Duration) -> usize {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        match Utc::now().checked_sub_signed(age) {
            Some(cutoff) => self.evict_before(cutoff),
            None => 0,
        }
    }

    /// Drops every cycle stamped before `cutoff`, popping the clock and every
    /// history series in lockstep.
    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while self.clock.front().is_some_and(|ts| *ts < cutoff) {
            self.clock.pop_front();
            for slot in &mut self.slots {
                if slot.definition.save_history {
                    slot.series.values.pop_front();
                }
            }
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, remaining = self.clock.len(), "evicted expired cycles");
        }
        evicted
    }

    pub fn snapshot_for_persistence(&self) -> StoreSnapshot {
        StoreSnapshot {
            clock: self.clock.iter().copied().collect(),
            series: self
                .slots
                .iter()
                .map(|slot| (slot.name.clone(), slot.series.values.iter().copied().collect()))
                .collect(),
        }
    }

    /// Replaces the clock and all series values wholesale. Series absent from
    /// `snapshot` are emptied; unknown names are ignored. Raw baselines are
    /// dropped, so a following live ingest starts a new baseline.
    pub fn load_from_persistence(&mut self, snapshot: &StoreSnapshot) {
        self.clock = snapshot.clock.iter().copied().collect();
        self.raw.clear();
        for slot in &mut self.slots {
            slot.series.clear();
            if let Some(values) = snapshot.series.get(&slot.name) {
                slot.series.values.extend(values.iter().copied());
            }
        }
        for name in snapshot.series.keys() {
            if !self.by_name.contains_key(name) {
                debug!(series = %name, "ignoring unknown series");
            }
        }
        self.initialized = false;
    }

    pub fn get_series(&self, name: &str) -> Option<&MetricSeries> {
        self.by_name.get(name).map(|&i| &self.slots[i].series)
    }

    pub fn definition(&self, name: &str) -> Option<&MetricDefinition> {
        self.by_name.get(name).map(|&i| &self.slots[i].definition)
    }

    /// Toggles a series' visibility. Returns false for unknown or fixed
    /// metrics.
    pub fn set_visible(&mut self, name: &str, visible: bool) -> bool {
        match self.by_name.get(name) {
            Some(&i) if self.slots[i].definition.toggleable => {
                self.slots[i].series.visible = visible;
                true
            }
            _ => false,
        }
    }

    /// Series names in catalog order.
    pub fn series_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.name.as_str())
    }

    pub fn clock(&self) -> &VecDeque<DateTime<Utc>> {
        &self.clock
    }

    /// Latest raw fields of `category`, merged across cycles.
    pub fn raw(&self, category: Category) -> Option<&RawFields> {
        self.raw.get(&category)
    }
}

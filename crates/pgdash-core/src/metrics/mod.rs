//! Metric time-series engine.
//!
//! - `catalog` - static metric definitions grouped into graphs
//! - `series` - bounded per-metric value history and boundary smoothing
//! - `store` - per-session store: dispatch, rate derivation, clock, eviction

pub mod catalog;
pub mod series;
pub mod store;

pub use catalog::{
    Color, Derivation, MetricDefinition, MetricGroup, SessionContext, builtin_catalog, series_name,
};
pub use series::MetricSeries;
pub use store::{MetricStore, StoreSnapshot, ratio_percent};

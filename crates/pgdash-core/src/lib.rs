//! pgdash-core - polling, metric and record/replay engine for the pgdash dashboard.
//!
//! Provides:
//! - `collector` - data sources (PostgreSQL, PgBouncer admin console, `/proc`) and mocks
//! - `metrics` - metric catalog, bounded series store, rate derivation and eviction
//! - `scheduler` - per-session poll loop, session set, reconnect backoff, ad-hoc commands, debouncing
//! - `replay` - zstd-compressed session recorder and frame-by-frame player
//! - `provider` - live / replay state providers consumed by the renderer
//! - `snapshot` - raw per-cycle input (`PollSnapshot`)
//! - `view` - materialized dashboard state handed to the renderer

pub mod collector;
pub mod config;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod replay;
pub mod scheduler;
pub mod snapshot;
pub mod view;

//! Data sources a monitoring session polls.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    DataSource (trait)                    │
//! │  ┌────────────────┐ ┌────────────────┐ ┌──────────────┐  │
//! │  │ PostgresSource │ │ PgBouncerSource│ │ScriptedSource│  │
//! │  │  pg_stat_*     │ │  SHOW POOLS    │ │  (testing)   │  │
//! │  └───────┬────────┘ └───────┬────────┘ └──────────────┘  │
//! │          └────────┬─────────┘                            │
//! │            ┌──────▼──────────┐    ┌────────────────┐     │
//! │            │ CompositeSource ├───►│ SystemSampler  │     │
//! │            └─────────────────┘    └───────┬────────┘     │
//! └───────────────────────────────────────────┼──────────────┘
//!                                      ┌──────▼──────┐
//!                                      │  FileSystem │ RealFs / MockFs
//!                                      └─────────────┘
//! ```
//!
//! ## Testing
//!
//! ```
//! use pgdash_core::collector::{MockFs, SystemSampler};
//!
//! let mut sampler = SystemSampler::new(MockFs::typical_system(), "/proc");
//! let sample = sampler.sample();
//! assert!(sample.contains_key("Memory_Used"));
//! ```

pub mod composite;
pub mod mock;
mod pg_collector;
pub mod pgbouncer;
pub mod procfs;
pub mod system;
pub mod traits;

pub use composite::CompositeSource;
pub use mock::{MockFs, ScriptedSource};
pub use pg_collector::{ConnParams, PRIVILEGE_SQLSTATES, PostgresSource};
pub use pgbouncer::PgBouncerSource;
pub use system::SystemSampler;
pub use traits::{AdHocCommand, AdHocOutput, DataSource, FileSystem, RealFs, SourceError};

//! A database source combined with the local system sampler.

use super::system::SystemSampler;
use super::traits::{AdHocCommand, AdHocOutput, DataSource, FileSystem, SourceError};
use crate::snapshot::{Category, PollSnapshot};

/// Wraps a database source and adds `system_utilization` from `/proc`.
///
/// Connection state and ad-hoc commands belong to the inner source; the
/// sampler only contributes when the inner fetch succeeds, so a lost
/// connection still fails the whole cycle.
pub struct CompositeSource<S: DataSource, F: FileSystem> {
    inner: S,
    system: SystemSampler<F>,
}

impl<S: DataSource, F: FileSystem> CompositeSource<S, F> {
    pub fn new(inner: S, system: SystemSampler<F>) -> Self {
        Self { inner, system }
    }
}

impl<S: DataSource, F: FileSystem> DataSource for CompositeSource<S, F> {
    fn connect(&mut self) -> Result<(), SourceError> {
        self.inner.connect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn fetch_snapshot(&mut self, categories: &[Category]) -> Result<PollSnapshot, SourceError> {
        let mut snapshot = self.inner.fetch_snapshot(categories)?;
        if categories.contains(&Category::SystemUtilization) {
            let sample = self.system.sample();
            if !sample.is_empty() {
                snapshot.merge(PollSnapshot::new().with(Category::SystemUtilization, sample));
            }
        }
        Ok(snapshot)
    }

    fn run_ad_hoc(&mut self, command: &AdHocCommand) -> Result<AdHocOutput, SourceError> {
        self.inner.run_ad_hoc(command)
    }

    fn describe(&self) -> String {
        format!("{} + system", self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockFs, ScriptedSource};
    use crate::snapshot::fields;

    #[test]
    fn system_category_is_merged() {
        let scripted = ScriptedSource::new();
        scripted.push_snapshot(PollSnapshot::new().with(Category::DatabaseStats, fields([("xact_commit", 1)])));
        let mut source = CompositeSource::new(
            scripted.clone(),
            SystemSampler::new(MockFs::typical_system(), "/proc"),
        );
        source.connect().unwrap();

        let snap = source
            .fetch_snapshot(&[Category::DatabaseStats, Category::SystemUtilization])
            .unwrap();
        assert!(snap.contains(Category::DatabaseStats));
        assert!(snap.contains(Category::SystemUtilization));
    }

    #[test]
    fn system_category_only_when_requested() {
        let scripted = ScriptedSource::new();
        let mut source = CompositeSource::new(
            scripted,
            SystemSampler::new(MockFs::typical_system(), "/proc"),
        );
        source.connect().unwrap();
        let snap = source.fetch_snapshot(&[Category::DatabaseStats]).unwrap();
        assert!(!snap.contains(Category::SystemUtilization));
    }

    #[test]
    fn inner_failure_skips_sampling() {
        let scripted = ScriptedSource::new();
        let mut source = CompositeSource::new(
            scripted,
            SystemSampler::new(MockFs::typical_system(), "/proc"),
        );
        // never connected
        assert!(source.fetch_snapshot(&[Category::SystemUtilization]).is_err());
    }
}

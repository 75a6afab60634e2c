//! Per-session cache of queries the server refused for lack of privileges.
//!
//! A denied query is reported once, then its category is no longer
//! requested for the rest of the session.

use std::collections::HashMap;

use xxhash_rust::xxh3::xxh3_64;

use crate::snapshot::{Category, QueryDenial};

/// Identity of a query: hash of its text.
pub fn query_id(query: &str) -> u64 {
    xxh3_64(query.as_bytes())
}

#[derive(Debug, Default)]
pub struct PrivilegeCache {
    denied: HashMap<u64, Category>,
}

impl PrivilegeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a denial. Returns true the first time a query is seen, i.e.
    /// when the denial should be surfaced.
    pub fn record(&mut self, denial: &QueryDenial) -> bool {
        self.denied
            .insert(query_id(&denial.query), denial.category)
            .is_none()
    }

    pub fn is_skipped(&self, category: Category) -> bool {
        self.denied.values().any(|c| *c == category)
    }

    /// `categories` minus those whose query was denied.
    pub fn filter(&self, categories: &[Category]) -> Vec<Category> {
        categories
            .iter()
            .copied()
            .filter(|c| !self.is_skipped(*c))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.denied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.denied.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denial(query: &str, category: Category) -> QueryDenial {
        QueryDenial {
            category,
            query: query.to_string(),
            code: "42501".to_string(),
            message: "permission denied".to_string(),
        }
    }

    #[test]
    fn first_denial_is_reported_once() {
        let mut cache = PrivilegeCache::new();
        let d = denial("SELECT * FROM pg_stat_replication", Category::ReplicationStatus);
        assert!(cache.record(&d));
        assert!(!cache.record(&d));
        assert_eq!(cache.len(), 1);
        assert!(cache.is_skipped(Category::ReplicationStatus));
        assert!(!cache.is_skipped(Category::DatabaseStats));
    }

    #[test]
    fn denied_categories_are_filtered() {
        let mut cache = PrivilegeCache::new();
        cache.record(&denial("q", Category::BgwriterStats));
        let remaining = cache.filter(&[
            Category::DatabaseStats,
            Category::BgwriterStats,
            Category::ConnectionStats,
        ]);
        assert_eq!(remaining, vec![Category::DatabaseStats, Category::ConnectionStats]);
    }
}

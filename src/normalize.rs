//! Metric name normalization
//!
//! Source systems name the same metric differently. A lookup table maps
//! each source name to a canonical one; it is read once at startup into a
//! [`NormalizationCache`] and shared read-only by every worker.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

use crate::error::CacheLoadError;

/// Where the source → canonical name pairs come from
#[async_trait]
pub trait LookupSource: Send + Sync {
    /// Fetch every mapping in the lookup table
    async fn fetch_mappings(&self) -> Result<Vec<(String, String)>, CacheLoadError>;

    /// Human readable name of the lookup table, for logs
    fn describe(&self) -> String;
}

/// Immutable source → canonical metric name table
#[derive(Debug, Clone, Default)]
pub struct NormalizationCache {
    mappings: HashMap<String, String>,
}

impl NormalizationCache {
    /// Load the full lookup table. Any failure is fatal for the caller.
    pub async fn load(source: &dyn LookupSource) -> Result<Self, CacheLoadError> {
        let mappings = source.fetch_mappings().await?;
        let cache = Self::from_entries(mappings);
        info!(
            "Loaded {} metric normalization mappings from {}",
            cache.len(),
            source.describe()
        );
        Ok(cache)
    }

    /// Build a cache from in-memory pairs. Later duplicates win.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            mappings: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Canonical name for `name`, or `name` itself when unmapped
    pub fn normalize<'a>(&'a self, name: &'a str) -> &'a str {
        self.mappings.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Number of mappings
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticLookup(Result<Vec<(String, String)>, String>);

    #[async_trait]
    impl LookupSource for StaticLookup {
        async fn fetch_mappings(&self) -> Result<Vec<(String, String)>, CacheLoadError> {
            self.0.clone().map_err(|reason| CacheLoadError::Query {
                table: self.describe(),
                reason,
            })
        }

        fn describe(&self) -> String {
            "test.lookup".to_string()
        }
    }

    #[test]
    fn test_normalize_mapped_and_unmapped() {
        let cache = NormalizationCache::from_entries([("ifInOctets", "inbound_octets")]);
        assert_eq!(cache.normalize("ifInOctets"), "inbound_octets");
        assert_eq!(cache.normalize("unknownX"), "unknownX");
        assert_eq!(cache.normalize(""), "");
    }

    #[test]
    fn test_empty_cache_is_identity() {
        let cache = NormalizationCache::default();
        assert!(cache.is_empty());
        assert_eq!(cache.normalize("cpu"), "cpu");
    }

    #[tokio::test]
    async fn test_load_from_source() {
        let source = StaticLookup(Ok(vec![
            ("a".to_string(), "alpha".to_string()),
            ("b".to_string(), "beta".to_string()),
        ]));
        let cache = NormalizationCache::load(&source).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.normalize("b"), "beta");
    }

    #[tokio::test]
    async fn test_load_failure_is_reported() {
        let source = StaticLookup(Err("permission denied".to_string()));
        let err = NormalizationCache::load(&source).await.unwrap_err();
        assert!(matches!(err, CacheLoadError::Query { .. }));
        assert!(err.to_string().contains("permission denied"));
    }
}

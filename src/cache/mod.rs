//! # Cache Module
//!
//! Result cache for the media resolver.
//!
//! Resolved tracks are keyed by the normalized query text. Entries have two
//! thresholds:
//!
//! - **Stale** (`CACHE_STALE_HOURS`): still served, but the resolver tries to
//!   refresh them first and only falls back to the cached value on failure
//! - **Expired** (`CACHE_MAX_AGE_HOURS`): dropped on access and by the hourly
//!   cleanup task
//!
//! When full, the least recently accessed 20% of entries are evicted.

pub mod lru_cache;

pub use lru_cache::{CacheLookup, CacheMetrics};

use lru_cache::LRUCache;
use std::time::Duration;
use tracing::info;

use crate::{config::Config, sources::ResolvedTrack};

/// Cache de resoluciones indexado por consulta normalizada
pub type MusicCache = LRUCache<String, ResolvedTrack>;

impl MusicCache {
    /// `None` cuando el cache está desactivado
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.enable_performance_cache {
            return None;
        }
        Some(Self::new(
            config.cache_max_size,
            Duration::from_secs(config.cache_max_age_hours * 3600),
            Duration::from_secs(config.cache_stale_hours * 3600),
        ))
    }

    /// Limpieza periódica de entradas expiradas
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            let metrics = self.metrics();
            info!(
                "🧹 Cache cleanup: {} entradas expiradas, {} restantes, hit rate {:.0}%",
                removed,
                metrics.entries,
                metrics.hit_rate() * 100.0
            );
        }
    }
}

/// Clave de cache: minúsculas y espacios colapsados
pub fn cache_key(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_normalizes_whitespace_and_case() {
        assert_eq!(cache_key("  Never   Gonna\tGive "), "never gonna give");
    }
}

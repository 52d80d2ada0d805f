use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::debug;

/// Entrada del cache con marcas de tiempo
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: Instant,
    last_accessed: Instant,
    hit_count: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            cached_at: now,
            last_accessed: now,
            hit_count: 0,
        }
    }

    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.cached_at)
    }
}

/// Resultado de una búsqueda en el cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<V> {
    /// Dentro del umbral de frescura
    Fresh(V),
    /// Vigente pero viejo: conviene refrescarlo
    Stale(V),
    Miss,
}

/// Cache acotado con expiración y umbral de frescura.
///
/// Al llenarse descarta el 20% de entradas accedidas hace más tiempo.
#[derive(Debug)]
pub struct LRUCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    capacity: usize,
    max_age: Duration,
    stale_after: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl<K, V> LRUCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, max_age: Duration, stale_after: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            max_age,
            stale_after: stale_after.min(max_age),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.evict_least_recent();
        }
        self.data
            .insert(key, CacheEntry::new(value, Instant::now()))
            .map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> CacheLookup<V> {
        let now = Instant::now();
        let Some(mut entry) = self.data.get_mut(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Miss;
        };

        let age = entry.age(now);
        if age >= self.max_age {
            drop(entry);
            self.data.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Miss;
        }

        entry.last_accessed = now;
        entry.hit_count += 1;
        self.hits.fetch_add(1, Ordering::Relaxed);

        if age >= self.stale_after {
            CacheLookup::Stale(entry.value.clone())
        } else {
            CacheLookup::Fresh(entry.value.clone())
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.data.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_least_recent(&self) {
        let mut by_access: Vec<(K, Instant)> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_accessed))
            .collect();
        by_access.sort_by_key(|(_, accessed)| *accessed);

        let to_remove = (self.capacity / 5).max(1);
        let mut removed = 0u64;
        for (key, _) in by_access.into_iter().take(to_remove) {
            if self.data.remove(&key).is_some() {
                removed += 1;
            }
        }

        self.evictions.fetch_add(removed, Ordering::Relaxed);
        debug!("Cache lleno: {} entradas desalojadas", removed);
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let max_age = self.max_age;
        let before = self.data.len();
        self.data.retain(|_, entry| entry.age(now) < max_age);
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }

        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.data.len(),
        }
    }
}

impl<K, V> Clone for LRUCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            capacity: self.capacity,
            max_age: self.max_age,
            stale_after: self.stale_after,
            hits: Arc::clone(&self.hits),
            misses: Arc::clone(&self.misses),
            evictions: Arc::clone(&self.evictions),
        }
    }
}

/// Métricas básicas del cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

//! In-memory TTL cache with pluggable eviction and an optional background sweep.

// std
use std::{
	borrow::Borrow,
	collections::HashMap,
	future::Future,
	hash::Hash,
	sync::{
		Mutex, MutexGuard, PoisonError,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use serde::{Deserialize, Serialize};
use tokio::time;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	cache::{entry::CacheEntry, eviction::EvictionPolicy},
	metrics,
};

/// Sizing, expiry, and sweep settings of a cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
	/// Label attached to metrics and logs.
	#[serde(default = "default_name")]
	pub name: String,
	/// Entry count at which inserting a new key evicts a victim.
	#[serde(default = "default_max_entries")]
	pub max_entries: usize,
	/// Lifetime of entries stored without an explicit TTL.
	#[serde(default = "default_ttl")]
	pub default_ttl: Duration,
	/// Victim selection strategy.
	#[serde(default)]
	pub eviction_policy: EvictionPolicy,
	/// Period of the background sweep.
	#[serde(default = "default_cleanup_interval")]
	pub cleanup_interval: Duration,
}
impl CacheConfig {
	/// Override the metric label.
	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();

		self
	}

	/// Override the capacity.
	pub fn with_max_entries(mut self, max_entries: usize) -> Self {
		self.max_entries = max_entries;

		self
	}

	/// Override the eviction policy.
	pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
		self.eviction_policy = policy;

		self
	}

	/// Validate capacity and timers.
	pub fn validate(&self) -> Result<()> {
		if self.max_entries == 0 {
			return Err(Error::Validation {
				field: "cache.max_entries",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.default_ttl.is_zero() {
			return Err(Error::Validation {
				field: "cache.default_ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.cleanup_interval.is_zero() {
			return Err(Error::Validation {
				field: "cache.cleanup_interval",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			name: default_name(),
			max_entries: default_max_entries(),
			default_ttl: default_ttl(),
			eviction_policy: EvictionPolicy::default(),
			cleanup_interval: default_cleanup_interval(),
		}
	}
}

/// Snapshot of cache counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
	/// Reads served from a live entry.
	pub hits: u64,
	/// Reads that found nothing or an expired entry.
	pub misses: u64,
	/// Entries removed to make room.
	pub evictions: u64,
	/// Entries removed because they expired.
	pub expirations: u64,
	/// Entries currently stored, including expired ones not yet swept.
	pub entries: usize,
}
impl CacheStatistics {
	/// Share of reads served from the cache.
	pub fn hit_rate(&self) -> f64 {
		let total = self.hits + self.misses;

		if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
	}
}

#[derive(Debug, Default)]
struct Counters {
	hits: AtomicU64,
	misses: AtomicU64,
	evictions: AtomicU64,
	expirations: AtomicU64,
}

#[derive(Debug)]
struct Store<K, V> {
	entries: HashMap<K, CacheEntry<V>>,
	seq: u64,
}
impl<K, V> Store<K, V> {
	fn next_seq(&mut self) -> u64 {
		self.seq = self.seq.wrapping_add(1);

		self.seq
	}
}

enum Lookup<V> {
	Hit(V),
	Expired,
	Missing,
}

/// Thread-safe key/value cache whose entries expire after a TTL.
///
/// Expired entries are never served: reads evict them lazily, and [`TtlCache::cleanup`] or the
/// optional background sweep removes the rest. Concurrent misses for the same key are not
/// coalesced.
#[derive(Debug)]
pub struct TtlCache<K, V> {
	config: CacheConfig,
	store: Mutex<Store<K, V>>,
	counters: Counters,
	sweeper: Mutex<Option<CancellationToken>>,
}
impl<K, V> TtlCache<K, V>
where
	K: Eq + Hash + Clone,
	V: Clone,
{
	/// Create an empty cache.
	pub fn new(config: CacheConfig) -> Result<Self> {
		config.validate()?;

		Ok(Self {
			config,
			store: Mutex::new(Store { entries: HashMap::new(), seq: 0 }),
			counters: Counters::default(),
			sweeper: Mutex::new(None),
		})
	}

	/// Configuration in use.
	pub fn config(&self) -> &CacheConfig {
		&self.config
	}

	/// Return the live value for `key`, evicting it first if it expired.
	pub fn get<Q>(&self, key: &Q) -> Option<V>
	where
		K: Borrow<Q>,
		Q: ?Sized + Eq + Hash,
	{
		match self.lookup(key, Instant::now()) {
			Lookup::Hit(value) => {
				self.counters.hits.fetch_add(1, Ordering::Relaxed);
				metrics::record_cache_hit(&self.config.name);

				Some(value)
			},
			Lookup::Expired => {
				self.counters.misses.fetch_add(1, Ordering::Relaxed);
				self.note_expired(1);
				metrics::record_cache_miss(&self.config.name);

				None
			},
			Lookup::Missing => {
				self.counters.misses.fetch_add(1, Ordering::Relaxed);
				metrics::record_cache_miss(&self.config.name);

				None
			},
		}
	}

	/// Store `value` under `key` with the default TTL.
	pub fn set(&self, key: K, value: V) {
		self.set_with_ttl(key, value, self.config.default_ttl);
	}

	/// Store `value` under `key`, evicting a victim when inserting a new key into a full cache.
	pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
		let now = Instant::now();
		let mut store = self.lock();
		let evicted = if !store.entries.contains_key(&key)
			&& store.entries.len() >= self.config.max_entries
		{
			let victim = self.config.eviction_policy.select_victim(&store.entries).cloned();

			victim.and_then(|victim| store.entries.remove(&victim)).is_some()
		} else {
			false
		};
		let seq = store.next_seq();

		store.entries.insert(key, CacheEntry::new(value, now, ttl, seq));

		drop(store);

		if evicted {
			self.counters.evictions.fetch_add(1, Ordering::Relaxed);
			metrics::record_cache_eviction(&self.config.name, self.config.eviction_policy);

			tracing::debug!(
				cache = %self.config.name,
				policy = self.config.eviction_policy.as_str(),
				"cache full; entry evicted"
			);
		}
	}

	/// Return the cached value or run `fetch`, store its result, and return it.
	///
	/// Errors from `fetch` are returned and nothing is stored.
	pub async fn get_or_fetch<F, Fut>(&self, key: K, ttl: Option<Duration>, fetch: F) -> Result<V>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<V>>,
	{
		if let Some(value) = self.get(&key) {
			return Ok(value);
		}

		let value = fetch().await?;

		self.set_with_ttl(key, value.clone(), ttl.unwrap_or(self.config.default_ttl));

		Ok(value)
	}

	/// Remove `key`, returning its value when it was still live.
	pub fn remove<Q>(&self, key: &Q) -> Option<V>
	where
		K: Borrow<Q>,
		Q: ?Sized + Eq + Hash,
	{
		let entry = self.lock().entries.remove(key)?;

		(!entry.is_expired(Instant::now())).then(|| entry.value().clone())
	}

	/// Whether a live entry exists for `key`; an expired one is evicted.
	pub fn contains<Q>(&self, key: &Q) -> bool
	where
		K: Borrow<Q>,
		Q: ?Sized + Eq + Hash,
	{
		let now = Instant::now();
		let mut store = self.lock();
		let expired = match store.entries.get(key) {
			None => return false,
			Some(entry) => entry.is_expired(now),
		};

		if expired {
			store.entries.remove(key);
			drop(store);
			self.note_expired(1);
		}

		!expired
	}

	/// Drop every entry. Counters are kept.
	pub fn clear(&self) {
		self.lock().entries.clear();
	}

	/// Remove all expired entries, returning how many were removed.
	pub fn cleanup(&self) -> usize {
		let now = Instant::now();
		let removed = {
			let mut store = self.lock();
			let before = store.entries.len();

			store.entries.retain(|_, entry| !entry.is_expired(now));

			before - store.entries.len()
		};

		if removed > 0 {
			self.note_expired(removed as u64);

			tracing::debug!(cache = %self.config.name, removed, "expired entries swept");
		}

		removed
	}

	/// Number of stored entries, including expired ones not yet swept.
	pub fn len(&self) -> usize {
		self.lock().entries.len()
	}

	/// Whether the cache holds no entries.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Snapshot of the counters; does not touch any entry.
	pub fn statistics(&self) -> CacheStatistics {
		CacheStatistics {
			hits: self.counters.hits.load(Ordering::Relaxed),
			misses: self.counters.misses.load(Ordering::Relaxed),
			evictions: self.counters.evictions.load(Ordering::Relaxed),
			expirations: self.counters.expirations.load(Ordering::Relaxed),
			entries: self.len(),
		}
	}

	fn lookup<Q>(&self, key: &Q, now: Instant) -> Lookup<V>
	where
		K: Borrow<Q>,
		Q: ?Sized + Eq + Hash,
	{
		let mut store = self.lock();
		let seq = store.next_seq();
		let Some(entry) = store.entries.get_mut(key) else {
			return Lookup::Missing;
		};

		if entry.is_expired(now) {
			store.entries.remove(key);

			return Lookup::Expired;
		}

		*entry = entry.touched(now, seq);

		Lookup::Hit(entry.value().clone())
	}

	fn note_expired(&self, count: u64) {
		self.counters.expirations.fetch_add(count, Ordering::Relaxed);
		metrics::record_cache_expiration(&self.config.name, count);
	}

	fn lock(&self) -> MutexGuard<'_, Store<K, V>> {
		self.store.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
impl<K, V> TtlCache<K, V>
where
	K: 'static + Send + Sync + Eq + Hash + Clone,
	V: 'static + Send + Sync + Clone,
{
	/// Spawn the periodic sweep unless it is already running.
	///
	/// The task only holds a weak reference, so it ends when the cache is dropped or
	/// [`TtlCache::stop_cleanup`] is called.
	pub fn start_cleanup(self: &Arc<Self>) {
		let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);

		if sweeper.as_ref().is_some_and(|token| !token.is_cancelled()) {
			return;
		}

		let token = CancellationToken::new();
		let cancelled = token.clone();
		let cache = Arc::downgrade(self);
		let interval = self.config.cleanup_interval;
		let name = self.config.name.clone();

		*sweeper = Some(token);

		tokio::spawn(async move {
			loop {
				tokio::select! {
					biased;
					_ = cancelled.cancelled() => break,
					_ = time::sleep(interval) => {},
				}

				let Some(cache) = cache.upgrade() else {
					break;
				};

				cache.cleanup();
			}

			tracing::debug!(cache = %name, "cache sweep stopped");
		});
	}
}
impl<K, V> TtlCache<K, V> {
	/// Stop the periodic sweep if it is running.
	pub fn stop_cleanup(&self) {
		if let Some(token) = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take() {
			token.cancel();
		}
	}
}
impl<K, V> Drop for TtlCache<K, V> {
	fn drop(&mut self) {
		if let Some(token) = self.sweeper.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
			token.cancel();
		}
	}
}

fn default_name() -> String {
	"default".into()
}

fn default_max_entries() -> usize {
	1_000
}

fn default_ttl() -> Duration {
	Duration::from_secs(300)
}

fn default_cleanup_interval() -> Duration {
	Duration::from_secs(60)
}

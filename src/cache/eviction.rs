//! Victim selection for a full cache.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::cache::entry::CacheEntry;

/// Strategy used to pick the entry evicted when the cache is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
	/// Least recently accessed.
	#[default]
	Lru,
	/// Least frequently accessed; ties go to the least recently accessed.
	Lfu,
	/// Oldest insertion.
	Fifo,
	/// Soonest expiry; ties go to the oldest insertion.
	Ttl,
}
impl EvictionPolicy {
	/// Stable label used in logs and metrics.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Lru => "lru",
			Self::Lfu => "lfu",
			Self::Fifo => "fifo",
			Self::Ttl => "ttl",
		}
	}

	/// Pick the key to evict among `entries`.
	pub fn select_victim<'a, K, V, I>(self, entries: I) -> Option<&'a K>
	where
		K: 'a,
		V: 'a,
		I: IntoIterator<Item = (&'a K, &'a CacheEntry<V>)>,
	{
		let entries = entries.into_iter();
		let victim = match self {
			Self::Lru => entries.min_by_key(|(_, entry)| entry.accessed_seq()),
			Self::Lfu => entries.min_by_key(|(_, entry)| (entry.access_count(), entry.accessed_seq())),
			Self::Fifo => entries.min_by_key(|(_, entry)| entry.inserted_seq()),
			Self::Ttl => entries.min_by_key(|(_, entry)| (entry.expires_at(), entry.inserted_seq())),
		};

		victim.map(|(key, _)| key)
	}
}

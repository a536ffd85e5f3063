//! Cache entry with expiry and access bookkeeping.

// self
use crate::_prelude::*;

/// Deadline used when `now + ttl` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Value stored in a [`TtlCache`](crate::TtlCache).
///
/// Entries are never mutated in place: every access replaces the entry with a copy carrying the
/// updated access count and timestamp.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
	value: V,
	created_at: Instant,
	expires_at: Instant,
	access_count: u64,
	last_accessed_at: Instant,
	inserted_seq: u64,
	accessed_seq: u64,
}
impl<V> CacheEntry<V> {
	/// Create an entry inserted at `now` that lives for `ttl`.
	///
	/// `seq` is a monotonic insertion counter used to break ties between entries created at the
	/// same instant. A `ttl` too large to represent, such as [`Duration::MAX`], saturates to a
	/// deadline a century away.
	pub fn new(value: V, now: Instant, ttl: Duration, seq: u64) -> Self {
		let expires_at = now
			.checked_add(ttl)
			.or_else(|| now.checked_add(FAR_FUTURE))
			.unwrap_or(now);

		Self {
			value,
			created_at: now,
			expires_at,
			access_count: 0,
			last_accessed_at: now,
			inserted_seq: seq,
			accessed_seq: seq,
		}
	}

	/// Stored value.
	pub fn value(&self) -> &V {
		&self.value
	}

	/// Instant the entry was inserted.
	pub fn created_at(&self) -> Instant {
		self.created_at
	}

	/// Instant the entry stops being served.
	pub fn expires_at(&self) -> Instant {
		self.expires_at
	}

	/// Number of reads served from this entry.
	pub fn access_count(&self) -> u64 {
		self.access_count
	}

	/// Instant of the most recent read, or of insertion when never read.
	pub fn last_accessed_at(&self) -> Instant {
		self.last_accessed_at
	}

	/// Whether the entry is logically absent at `now`.
	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.expires_at
	}

	/// Time left before expiry.
	pub fn remaining(&self, now: Instant) -> Duration {
		self.expires_at.saturating_duration_since(now)
	}

	pub(crate) fn inserted_seq(&self) -> u64 {
		self.inserted_seq
	}

	pub(crate) fn accessed_seq(&self) -> u64 {
		self.accessed_seq
	}
}
impl<V> CacheEntry<V>
where
	V: Clone,
{
	/// Copy of this entry recording one more read at `now`.
	pub fn touched(&self, now: Instant, seq: u64) -> Self {
		Self {
			value: self.value.clone(),
			created_at: self.created_at,
			expires_at: self.expires_at,
			access_count: self.access_count.saturating_add(1),
			last_accessed_at: now,
			inserted_seq: self.inserted_seq,
			accessed_seq: seq,
		}
	}
}

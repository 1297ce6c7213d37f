use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use sluice_pool::{MAX_POOLED_CAPACITY, PooledHashSet};

/// Set of item keys already pending in the next batch.
pub(crate) trait DedupSet<I>: Send {
	/// Records `item`. Returns `false` if an equal item is already pending.
	fn insert(&mut self, item: &I) -> bool;

	/// Forgets every recorded item.
	fn clear(&mut self);
}

struct KeyedDedup<K: 'static, F> {
	seen: PooledHashSet<K>,
	key: F,
}

impl<I, K, F> DedupSet<I> for KeyedDedup<K, F>
where
	K: Hash + Eq + Send + 'static,
	F: Fn(&I) -> K + Send,
{
	fn insert(&mut self, item: &I) -> bool {
		self.seen.insert((self.key)(item))
	}

	fn clear(&mut self) {
		if self.seen.capacity() > MAX_POOLED_CAPACITY {
			self.seen = PooledHashSet::get_instance();
		} else {
			self.seen.clear();
		}
	}
}

/// Configuration for one [`BatchingWorkQueue`](super::BatchingWorkQueue).
pub struct WorkQueueSpec<I> {
	pub(crate) name: String,
	pub(crate) delay: Duration,
	pub(crate) dedup: Option<Box<dyn DedupSet<I>>>,
}

impl<I: 'static> WorkQueueSpec<I> {
	/// Creates a spec for a queue that waits `delay` after the first
	/// pending item before dispatching a batch.
	pub fn new(name: impl Into<String>, delay: Duration) -> Self {
		Self {
			name: name.into(),
			delay,
			dedup: None,
		}
	}

	/// Drops items equal to one already pending in the next batch.
	#[must_use]
	pub fn dedup(self) -> Self
	where
		I: Hash + Eq + Clone + Send,
	{
		self.dedup_by_key(I::clone)
	}

	/// Drops items whose key equals the key of an item already pending in
	/// the next batch. The first item with a given key wins.
	#[must_use]
	pub fn dedup_by_key<K>(mut self, key: impl Fn(&I) -> K + Send + 'static) -> Self
	where
		K: Hash + Eq + Send + 'static,
	{
		self.dedup = Some(Box::new(KeyedDedup {
			seen: PooledHashSet::get_instance(),
			key,
		}));
		self
	}

	/// Queue name used in tracing events.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Debounce delay.
	pub const fn delay(&self) -> Duration {
		self.delay
	}
}

impl<I> fmt::Debug for WorkQueueSpec<I> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkQueueSpec")
			.field("name", &self.name)
			.field("delay", &self.delay)
			.field("dedup", &self.dedup.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keyed_dedup_accepts_first_key_only() {
		let mut dedup = KeyedDedup {
			seen: PooledHashSet::get_instance(),
			key: |item: &u32| item % 10,
		};
		assert!(dedup.insert(&1u32));
		assert!(!dedup.insert(&11u32));
		DedupSet::<u32>::clear(&mut dedup);
		assert!(dedup.insert(&21u32));
	}

	#[test]
	fn clearing_after_a_burst_releases_storage() {
		let mut dedup = KeyedDedup {
			seen: PooledHashSet::get_instance(),
			key: |item: &u64| *item,
		};
		for item in 0..1_000u64 {
			dedup.insert(&item);
		}
		assert!(dedup.seen.capacity() > MAX_POOLED_CAPACITY);
		DedupSet::<u64>::clear(&mut dedup);
		assert!(dedup.seen.is_empty());
		assert!(dedup.seen.capacity() <= MAX_POOLED_CAPACITY);
	}
}

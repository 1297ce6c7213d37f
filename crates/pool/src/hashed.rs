//! Pool-recycled hash set and hash map.

use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::object_pool::{ObjectPool, PoolSpec};
use crate::registry::shared_pool;

/// Hash set checked out of a shared pool.
///
/// Dereferences to the inner [`FxHashSet`]. Dropping the set clears it and
/// returns it to the pool unless it grew past the retained-capacity limit.
pub struct PooledHashSet<T: 'static> {
	set: FxHashSet<T>,
	pool: &'static ObjectPool<FxHashSet<T>>,
}

impl<T> PooledHashSet<T>
where
	T: Hash + Eq + Send + 'static,
{
	/// Checks an empty set out of the shared pool.
	pub fn get_instance() -> Self {
		let pool = shared_pool(|| ObjectPool::new(PoolSpec::default(), FxHashSet::default));
		let set = pool.allocate();
		debug_assert!(set.is_empty(), "pooled set must be returned empty");
		Self { set, pool }
	}

	/// Returns the set to its pool.
	pub fn free(self) {}
}

impl<T: 'static> Drop for PooledHashSet<T> {
	fn drop(&mut self) {
		if self.set.capacity() > self.pool.spec().retained_capacity_limit() {
			tracing::trace!(capacity = self.set.capacity(), "pool.set.abandon");
			return;
		}
		self.set.clear();
		self.pool.free(std::mem::take(&mut self.set));
	}
}

impl<T: 'static> Deref for PooledHashSet<T> {
	type Target = FxHashSet<T>;

	fn deref(&self) -> &FxHashSet<T> {
		&self.set
	}
}

impl<T: 'static> DerefMut for PooledHashSet<T> {
	fn deref_mut(&mut self) -> &mut FxHashSet<T> {
		&mut self.set
	}
}

impl<T: Hash + Eq + 'static> Extend<T> for PooledHashSet<T> {
	fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
		self.set.extend(iter);
	}
}

impl<T: Hash + Eq + Send + 'static> FromIterator<T> for PooledHashSet<T> {
	fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
		let mut set = Self::get_instance();
		set.extend(iter);
		set
	}
}

impl<T: fmt::Debug + 'static> fmt::Debug for PooledHashSet<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(&self.set).finish()
	}
}

/// Hash map checked out of a shared pool.
///
/// Same discipline as [`PooledHashSet`].
pub struct PooledHashMap<K: 'static, V: 'static> {
	map: FxHashMap<K, V>,
	pool: &'static ObjectPool<FxHashMap<K, V>>,
}

impl<K, V> PooledHashMap<K, V>
where
	K: Hash + Eq + Send + 'static,
	V: Send + 'static,
{
	/// Checks an empty map out of the shared pool.
	pub fn get_instance() -> Self {
		let pool = shared_pool(|| ObjectPool::new(PoolSpec::default(), FxHashMap::default));
		let map = pool.allocate();
		debug_assert!(map.is_empty(), "pooled map must be returned empty");
		Self { map, pool }
	}

	/// Returns the map to its pool.
	pub fn free(self) {}
}

impl<K: 'static, V: 'static> Drop for PooledHashMap<K, V> {
	fn drop(&mut self) {
		if self.map.capacity() > self.pool.spec().retained_capacity_limit() {
			tracing::trace!(capacity = self.map.capacity(), "pool.map.abandon");
			return;
		}
		self.map.clear();
		self.pool.free(std::mem::take(&mut self.map));
	}
}

impl<K: 'static, V: 'static> Deref for PooledHashMap<K, V> {
	type Target = FxHashMap<K, V>;

	fn deref(&self) -> &FxHashMap<K, V> {
		&self.map
	}
}

impl<K: 'static, V: 'static> DerefMut for PooledHashMap<K, V> {
	fn deref_mut(&mut self) -> &mut FxHashMap<K, V> {
		&mut self.map
	}
}

impl<K: Hash + Eq + 'static, V: 'static> Extend<(K, V)> for PooledHashMap<K, V> {
	fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
		self.map.extend(iter);
	}
}

impl<K: Hash + Eq + Send + 'static, V: Send + 'static> FromIterator<(K, V)> for PooledHashMap<K, V> {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut map = Self::get_instance();
		map.extend(iter);
		map
	}
}

impl<K: fmt::Debug + 'static, V: fmt::Debug + 'static> fmt::Debug for PooledHashMap<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_map().entries(&self.map).finish()
	}
}

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::{DEFAULT_POOL_SIZE, MAX_POOLED_CAPACITY};

/// Sizing configuration for one object pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSpec {
	pub(crate) size: usize,
	pub(crate) max_retained_capacity: usize,
}

impl PoolSpec {
	/// Creates a pool spec retaining at most `size` free instances.
	///
	/// # Panics
	///
	/// Panics if `size` is zero.
	#[must_use]
	pub fn with_size(size: usize) -> Self {
		assert!(size > 0, "pool size must be > 0");
		Self { size, ..Self::default() }
	}

	/// Sets the largest backing capacity a container may have and still be
	/// returned to this pool.
	#[must_use]
	pub fn max_retained_capacity(mut self, capacity: usize) -> Self {
		self.max_retained_capacity = capacity;
		self
	}

	/// Number of free instances retained.
	pub const fn size(&self) -> usize {
		self.size
	}

	/// Capacity threshold above which containers are abandoned on free.
	pub const fn retained_capacity_limit(&self) -> usize {
		self.max_retained_capacity
	}
}

impl Default for PoolSpec {
	fn default() -> Self {
		Self {
			size: DEFAULT_POOL_SIZE,
			max_retained_capacity: MAX_POOLED_CAPACITY,
		}
	}
}

/// Counter snapshot for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
	/// Allocations satisfied from the free list.
	pub hits: u64,
	/// Allocations that had to construct a fresh instance.
	pub misses: u64,
	/// Instances accepted back into the free list.
	pub returns: u64,
	/// Instances dropped because the free list was full.
	pub drops: u64,
}

/// Bounded free list of reusable instances.
///
/// `allocate` hands out the most recently freed instance, or a fresh one
/// from the factory when the free list is empty. `free` keeps at most
/// [`PoolSpec::size`] instances and drops the rest. An allocated instance
/// is owned by its caller alone until it is freed again.
///
/// The free list is guarded by a mutex; `allocate` and `free` may be
/// called concurrently from any number of threads.
pub struct ObjectPool<T> {
	spec: PoolSpec,
	factory: Box<dyn Fn() -> T + Send + Sync>,
	free: Mutex<Vec<T>>,
	hits: AtomicU64,
	misses: AtomicU64,
	returns: AtomicU64,
	drops: AtomicU64,
}

impl<T> ObjectPool<T> {
	/// Creates an empty pool that constructs instances with `factory`.
	pub fn new(spec: PoolSpec, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
		Self {
			spec,
			factory: Box::new(factory),
			free: Mutex::new(Vec::new()),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
			returns: AtomicU64::new(0),
			drops: AtomicU64::new(0),
		}
	}

	/// Returns a recycled instance, or constructs a new one.
	pub fn allocate(&self) -> T {
		let recycled = self.free.lock().pop();
		match recycled {
			Some(item) => {
				self.hits.fetch_add(1, Ordering::Relaxed);
				item
			}
			None => {
				self.misses.fetch_add(1, Ordering::Relaxed);
				tracing::trace!(retain = self.spec.size, "pool.allocate.miss");
				(self.factory)()
			}
		}
	}

	/// Returns `item` to the free list, or drops it if the list is full.
	///
	/// The caller is responsible for resetting the instance first.
	pub fn free(&self, item: T) {
		let mut free = self.free.lock();
		if free.len() < self.spec.size {
			free.push(item);
			drop(free);
			self.returns.fetch_add(1, Ordering::Relaxed);
		} else {
			drop(free);
			self.drops.fetch_add(1, Ordering::Relaxed);
			drop(item);
		}
	}

	/// Allocates an instance wrapped in a guard that frees it on drop.
	pub fn acquire(&self) -> Pooled<'_, T> {
		Pooled {
			pool: self,
			item: Some(self.allocate()),
		}
	}

	/// Number of instances currently retained in the free list.
	pub fn retained(&self) -> usize {
		self.free.lock().len()
	}

	/// Returns this pool's sizing configuration.
	pub const fn spec(&self) -> &PoolSpec {
		&self.spec
	}

	/// Returns a snapshot of the pool counters.
	pub fn stats(&self) -> PoolStats {
		PoolStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			returns: self.returns.load(Ordering::Relaxed),
			drops: self.drops.load(Ordering::Relaxed),
		}
	}
}

impl<T> fmt::Debug for ObjectPool<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ObjectPool")
			.field("spec", &self.spec)
			.field("retained", &self.retained())
			.field("stats", &self.stats())
			.finish_non_exhaustive()
	}
}

/// Guard over one instance checked out of an [`ObjectPool`].
///
/// The instance goes back to its pool when the guard drops.
pub struct Pooled<'a, T> {
	pool: &'a ObjectPool<T>,
	item: Option<T>,
}

impl<T> Pooled<'_, T> {
	/// Detaches the instance from the pool.
	pub fn into_inner(mut self) -> T {
		match self.item.take() {
			Some(item) => item,
			None => unreachable!("pooled guard holds its instance until dropped"),
		}
	}
}

impl<T> Deref for Pooled<'_, T> {
	type Target = T;

	fn deref(&self) -> &T {
		match &self.item {
			Some(item) => item,
			None => unreachable!("pooled guard holds its instance until dropped"),
		}
	}
}

impl<T> DerefMut for Pooled<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		match &mut self.item {
			Some(item) => item,
			None => unreachable!("pooled guard holds its instance until dropped"),
		}
	}
}

impl<T> Drop for Pooled<'_, T> {
	fn drop(&mut self) {
		if let Some(item) = self.item.take() {
			self.pool.free(item);
		}
	}
}

impl<T: fmt::Debug> fmt::Debug for Pooled<'_, T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Pooled").field(&self.item).finish()
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;
	use std::sync::Arc;
	use std::sync::atomic::AtomicUsize;

	use super::*;

	fn counting_pool(size: usize) -> (ObjectPool<Box<usize>>, Arc<AtomicUsize>) {
		let created = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&created);
		let pool = ObjectPool::new(PoolSpec::with_size(size), move || Box::new(counter.fetch_add(1, Ordering::SeqCst)));
		(pool, created)
	}

	#[test]
	fn allocate_constructs_when_empty() {
		let (pool, created) = counting_pool(4);
		let a = pool.allocate();
		let b = pool.allocate();
		assert_eq!((*a, *b), (0, 1));
		assert_eq!(created.load(Ordering::SeqCst), 2);
		assert_eq!(pool.stats().misses, 2);
	}

	#[test]
	fn freed_instance_is_reused_lifo() {
		let (pool, created) = counting_pool(4);
		let a = pool.allocate();
		let b = pool.allocate();
		pool.free(a);
		pool.free(b);

		assert_eq!(*pool.allocate(), 1, "most recently freed comes back first");
		assert_eq!(*pool.allocate(), 0);
		assert_eq!(created.load(Ordering::SeqCst), 2);
		assert_eq!(pool.stats().hits, 2);
	}

	#[test]
	fn free_past_capacity_drops_instance() {
		let (pool, _) = counting_pool(2);
		let items: Vec<_> = (0..3).map(|_| pool.allocate()).collect();
		for item in items {
			pool.free(item);
		}
		assert_eq!(pool.retained(), 2);
		let stats = pool.stats();
		assert_eq!(stats.returns, 2);
		assert_eq!(stats.drops, 1);
	}

	#[test]
	fn guard_returns_instance_on_drop() {
		let (pool, created) = counting_pool(2);
		{
			let mut guard = pool.acquire();
			**guard += 10;
			assert_eq!(pool.retained(), 0);
		}
		assert_eq!(pool.retained(), 1);
		assert_eq!(*pool.allocate(), 10);
		assert_eq!(created.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn guard_into_inner_detaches() {
		let (pool, _) = counting_pool(2);
		let item = pool.acquire().into_inner();
		assert_eq!(*item, 0);
		assert_eq!(pool.retained(), 0);
	}

	#[test]
	#[should_panic(expected = "pool size must be > 0")]
	fn zero_sized_pool_is_rejected() {
		let _ = PoolSpec::with_size(0);
	}

	#[test]
	fn concurrent_checkouts_never_share_an_instance() {
		let (pool, created) = counting_pool(8);
		let live = Mutex::new(HashSet::new());

		std::thread::scope(|scope| {
			for _ in 0..8 {
				scope.spawn(|| {
					for _ in 0..500 {
						let item = pool.allocate();
						assert!(live.lock().insert(*item), "instance {} handed to two owners", *item);
						std::hint::spin_loop();
						assert!(live.lock().remove(&*item));
						pool.free(item);
					}
				});
			}
		});

		let stats = pool.stats();
		assert_eq!(stats.hits + stats.misses, 4000);
		assert_eq!(stats.misses as usize, created.load(Ordering::SeqCst));
		assert!(pool.retained() <= 8);
	}
}

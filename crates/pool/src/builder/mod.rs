//! Pool-recycled growable sequence.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::hashed::PooledHashSet;
use crate::object_pool::{ObjectPool, PoolSpec};
use crate::registry::shared_pool;

/// Growable sequence whose storage is checked out of a shared pool.
///
/// Obtain one with [`PooledBuilder::get_instance`], fill it, then consume it
/// with [`PooledBuilder::to_immutable_and_free`] (or simply drop it). The
/// backing `Vec` goes back to the pool on drop as long as its capacity
/// stays within the pool's retained-capacity limit; oversized storage is
/// abandoned so a single large batch does not pin memory forever.
///
/// Slice methods and indexing are available through `Deref<Target = [T]>`.
/// Indexing past `len()` panics.
pub struct PooledBuilder<T: 'static> {
	items: Vec<T>,
	pool: Option<&'static ObjectPool<Vec<T>>>,
}

fn vec_pool<T: Send + 'static>() -> &'static ObjectPool<Vec<T>> {
	shared_pool(|| ObjectPool::new(PoolSpec::default(), Vec::new))
}

/// Grows `items` so it can hold at least `capacity` elements, at least
/// doubling the current capacity when a reallocation is needed.
pub(crate) fn ensure_vec_capacity<T>(items: &mut Vec<T>, capacity: usize) {
	if items.capacity() >= capacity {
		return;
	}
	let target = items.capacity().saturating_mul(2).max(capacity);
	items.reserve_exact(target - items.len());
}

impl<T: Send + 'static> PooledBuilder<T> {
	/// Checks an empty builder out of the shared pool.
	pub fn get_instance() -> Self {
		let pool = vec_pool::<T>();
		let items = pool.allocate();
		debug_assert!(items.is_empty(), "pooled builder storage must be returned empty");
		Self { items, pool: Some(pool) }
	}

	/// Checks a builder out of the shared pool with room for `capacity` items.
	pub fn get_instance_with_capacity(capacity: usize) -> Self {
		let mut builder = Self::get_instance();
		builder.ensure_capacity(capacity);
		builder
	}

	/// Checks a builder out of the shared pool holding `count` copies of `value`.
	pub fn get_instance_filled(count: usize, value: T) -> Self
	where
		T: Clone,
	{
		let mut builder = Self::get_instance_with_capacity(count);
		builder.add_many(value, count);
		builder
	}

	/// Checks a builder out of `pool` instead of the shared one.
	pub fn get_instance_from(pool: &'static ObjectPool<Vec<T>>) -> Self {
		let items = pool.allocate();
		debug_assert!(items.is_empty(), "pooled builder storage must be returned empty");
		Self { items, pool: Some(pool) }
	}
}

impl<T: 'static> PooledBuilder<T> {
	/// Creates a builder that is not backed by any pool.
	pub const fn new() -> Self {
		Self { items: Vec::new(), pool: None }
	}

	/// Creates an unpooled builder with room for `capacity` items.
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			items: Vec::with_capacity(capacity),
			pool: None,
		}
	}

	/// Number of live items.
	pub fn len(&self) -> usize {
		self.items.len()
	}

	/// Returns `true` if there are no live items.
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	/// Size of the backing storage.
	pub fn capacity(&self) -> usize {
		self.items.capacity()
	}

	/// Returns `true` if this builder's storage returns to a pool on drop.
	pub fn is_pooled(&self) -> bool {
		self.pool.is_some()
	}

	/// Grows the backing storage to hold at least `capacity` items.
	pub fn ensure_capacity(&mut self, capacity: usize) {
		ensure_vec_capacity(&mut self.items, capacity);
	}

	/// Appends one item.
	pub fn add(&mut self, item: T) {
		self.items.push(item);
	}

	/// Appends every item of `items`.
	pub fn add_range(&mut self, items: impl IntoIterator<Item = T>) {
		self.items.extend(items);
	}

	/// Appends `count` copies of `item`.
	pub fn add_many(&mut self, item: T, count: usize)
	where
		T: Clone,
	{
		self.items.extend(std::iter::repeat_n(item, count));
	}

	/// Inserts `item` at `index`, shifting later items right.
	///
	/// # Panics
	///
	/// Panics if `index > len()`.
	pub fn insert(&mut self, index: usize, item: T) {
		self.items.insert(index, item);
	}

	/// Stores `item` at `index`, appending default values to fill any gap.
	pub fn set_item(&mut self, index: usize, item: T)
	where
		T: Default,
	{
		while index > self.items.len() {
			self.items.push(T::default());
		}
		if index == self.items.len() {
			self.items.push(item);
		} else {
			self.items[index] = item;
		}
	}

	/// Removes and returns the item at `index`.
	///
	/// # Panics
	///
	/// Panics if `index >= len()`.
	pub fn remove_at(&mut self, index: usize) -> T {
		self.items.remove(index)
	}

	/// Removes and returns the last item.
	///
	/// # Panics
	///
	/// Panics if the builder is empty.
	pub fn remove_last(&mut self) -> T {
		match self.items.pop() {
			Some(item) => item,
			None => panic!("remove_last on an empty builder"),
		}
	}

	/// Removes the first item equal to `item`. Returns whether one was found.
	pub fn remove(&mut self, item: &T) -> bool
	where
		T: PartialEq,
	{
		match self.index_of(item) {
			Some(index) => {
				self.items.remove(index);
				true
			}
			None => false,
		}
	}

	/// Truncates the builder to `limit` items.
	///
	/// # Panics
	///
	/// Panics if `limit > len()`.
	pub fn clip(&mut self, limit: usize) {
		assert!(limit <= self.items.len(), "clip limit {limit} exceeds length {}", self.items.len());
		self.items.truncate(limit);
	}

	/// Removes all items, keeping the storage.
	pub fn clear(&mut self) {
		self.items.clear();
	}

	/// Pushes an item, treating the builder as a stack.
	pub fn push(&mut self, item: T) {
		self.items.push(item);
	}

	/// Pops the top of the stack.
	pub fn pop(&mut self) -> Option<T> {
		self.items.pop()
	}

	/// Returns the top of the stack.
	pub fn peek(&self) -> Option<&T> {
		self.items.last()
	}

	/// Position of the first item equal to `item`.
	pub fn index_of(&self, item: &T) -> Option<usize>
	where
		T: PartialEq,
	{
		self.items.iter().position(|it| it == item)
	}

	/// Sorts the items.
	pub fn sort(&mut self)
	where
		T: Ord,
	{
		self.items.sort();
	}

	/// Sorts the items with `compare`.
	pub fn sort_by(&mut self, compare: impl FnMut(&T, &T) -> Ordering) {
		self.items.sort_by(compare);
	}

	/// Sorts with `compare`, then collapses each run of equal items to its
	/// first element.
	pub fn sort_and_remove_duplicates(&mut self, mut compare: impl FnMut(&T, &T) -> Ordering) {
		if self.items.len() <= 1 {
			return;
		}
		self.items.sort_by(&mut compare);
		self.items.dedup_by(|later, earlier| compare(earlier, later) == Ordering::Equal);
	}

	/// Returns a snapshot of the items, leaving the builder untouched.
	pub fn to_immutable(&self) -> Arc<[T]>
	where
		T: Clone,
	{
		Arc::from(self.items.as_slice())
	}

	/// Moves the items into a snapshot and empties the builder.
	pub fn to_immutable_and_clear(&mut self) -> Arc<[T]> {
		self.items.drain(..).collect()
	}

	/// Moves the items into a snapshot and returns the builder to its pool.
	pub fn to_immutable_and_free(mut self) -> Arc<[T]> {
		self.to_immutable_and_clear()
	}

	/// Moves the items into an owned vector and returns the builder to its pool.
	pub fn to_vec_and_free(mut self) -> Vec<T> {
		self.items.drain(..).collect()
	}

	/// Returns the builder to its pool.
	pub fn free(self) {}
}

impl<T: Hash + Eq + 'static> PooledBuilder<T> {
	/// Removes later occurrences of equal items, keeping first occurrences
	/// in their original order.
	pub fn remove_duplicates(&mut self)
	where
		T: Clone + Send,
	{
		self.remove_duplicates_by_key(T::clone);
	}
}

impl<T: 'static> PooledBuilder<T> {
	/// Removes every item whose key was already produced by an earlier item.
	///
	/// Runs in linear time using a pooled set of keys. Use this when the
	/// items' own equality is not the relation to deduplicate by.
	pub fn remove_duplicates_by_key<K>(&mut self, mut key: impl FnMut(&T) -> K)
	where
		K: Hash + Eq + Send + 'static,
	{
		if self.items.len() <= 1 {
			return;
		}
		let mut seen = PooledHashSet::<K>::get_instance();
		self.items.retain(|item| seen.insert(key(item)));
	}
}

impl<T: 'static> Default for PooledBuilder<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: 'static> Drop for PooledBuilder<T> {
	fn drop(&mut self) {
		let Some(pool) = self.pool.take() else {
			return;
		};
		let capacity = self.items.capacity();
		if capacity > pool.spec().retained_capacity_limit() {
			tracing::trace!(capacity, "pool.builder.abandon");
			return;
		}
		self.items.clear();
		pool.free(std::mem::take(&mut self.items));
	}
}

impl<T: 'static> Deref for PooledBuilder<T> {
	type Target = [T];

	fn deref(&self) -> &[T] {
		&self.items
	}
}

impl<T: 'static> DerefMut for PooledBuilder<T> {
	fn deref_mut(&mut self) -> &mut [T] {
		&mut self.items
	}
}

impl<T: 'static> Extend<T> for PooledBuilder<T> {
	fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
		self.items.extend(iter);
	}
}

impl<T: Send + 'static> FromIterator<T> for PooledBuilder<T> {
	fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
		let mut builder = Self::get_instance();
		builder.add_range(iter);
		builder
	}
}

impl<'a, T: 'static> IntoIterator for &'a PooledBuilder<T> {
	type Item = &'a T;
	type IntoIter = std::slice::Iter<'a, T>;

	fn into_iter(self) -> Self::IntoIter {
		self.items.iter()
	}
}

impl<T: fmt::Debug + 'static> fmt::Debug for PooledBuilder<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(&self.items).finish()
	}
}

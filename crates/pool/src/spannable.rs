//! Pooled builder exposing its backing storage as contiguous slices.

use std::fmt;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::builder::ensure_vec_capacity;
use crate::object_pool::{ObjectPool, PoolSpec};
use crate::registry::shared_pool;

/// Storage cell of the spannable pool, kept apart from [`crate::PooledBuilder`]'s pool.
struct SpanStorage<T>(Vec<T>);

/// Pooled builder whose live items can be borrowed as one contiguous slice.
///
/// [`as_span`](Self::as_span) borrows `[0, len)` without copying. Every
/// view borrows the builder, so the borrow checker rejects any growth
/// (`add`, `ensure_capacity`) while a view is alive; the backing array
/// may be reallocated by those calls.
///
/// Consumers that fill the buffer directly can write into
/// [`spare_capacity`](Self::spare_capacity) and then publish the written
/// prefix with [`set_count`](Self::set_count).
pub struct SpannableBuilder<T: 'static> {
	items: Vec<T>,
	pool: Option<&'static ObjectPool<SpanStorage<T>>>,
}

impl<T: Send + 'static> SpannableBuilder<T> {
	/// Checks an empty builder out of the shared spannable pool.
	pub fn get_instance() -> Self {
		let pool = shared_pool(|| ObjectPool::new(PoolSpec::default(), || SpanStorage(Vec::new())));
		let SpanStorage(items) = pool.allocate();
		debug_assert!(items.is_empty(), "spannable storage must be returned empty");
		Self { items, pool: Some(pool) }
	}

	/// Checks a builder out of the shared pool with room for `capacity` items.
	pub fn get_instance_with_capacity(capacity: usize) -> Self {
		let mut builder = Self::get_instance();
		builder.ensure_capacity(capacity);
		builder
	}
}

impl<T: 'static> SpannableBuilder<T> {
	/// Creates a builder that is not backed by any pool.
	pub const fn new() -> Self {
		Self { items: Vec::new(), pool: None }
	}

	/// Number of live items.
	pub fn len(&self) -> usize {
		self.items.len()
	}

	/// Returns `true` if there are no live items.
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	/// Size of the backing array.
	pub fn capacity(&self) -> usize {
		self.items.capacity()
	}

	/// Grows the backing array to at least `capacity` slots.
	///
	/// Growth allocates `max(capacity() * 2, capacity)` slots and moves the
	/// live items over.
	pub fn ensure_capacity(&mut self, capacity: usize) {
		ensure_vec_capacity(&mut self.items, capacity);
	}

	/// Appends one item, doubling the backing array when it is full.
	pub fn add(&mut self, item: T) {
		if self.items.len() == self.items.capacity() {
			self.ensure_capacity(self.items.len() + 1);
		}
		self.items.push(item);
	}

	/// Appends every item of `items`.
	pub fn add_range(&mut self, items: impl IntoIterator<Item = T>) {
		let items = items.into_iter();
		let (lower, _) = items.size_hint();
		self.ensure_capacity(self.items.len().saturating_add(lower));
		for item in items {
			self.add(item);
		}
	}

	/// Removes all items, keeping the backing array.
	pub fn clear(&mut self) {
		self.items.clear();
	}

	/// Borrows the live items.
	pub fn as_span(&self) -> &[T] {
		&self.items
	}

	/// Mutably borrows the live items.
	pub fn as_span_mut(&mut self) -> &mut [T] {
		&mut self.items
	}

	/// Borrows the unused tail `[len, capacity)` of the backing array.
	pub fn spare_capacity(&mut self) -> &mut [MaybeUninit<T>] {
		self.items.spare_capacity_mut()
	}

	/// Borrows the whole backing array, live prefix included.
	///
	/// # Safety
	///
	/// The caller must leave every slot in `[0, len)` initialized. Writing
	/// into a live slot overwrites the old value without dropping it.
	pub unsafe fn as_capacity(&mut self) -> &mut [MaybeUninit<T>] {
		let capacity = self.items.capacity();
		let ptr = self.items.as_mut_ptr().cast::<MaybeUninit<T>>();
		// SAFETY: `ptr` points at an allocation of `capacity` slots of `T`, and
		// `MaybeUninit<T>` has the layout of `T`. The caller keeps the live
		// prefix initialized.
		unsafe { std::slice::from_raw_parts_mut(ptr, capacity) }
	}

	/// Sets the number of live items.
	///
	/// Items cut off by a shrinking count are forgotten, not dropped.
	///
	/// # Safety
	///
	/// Every slot in `[0, count)` must be initialized.
	///
	/// # Panics
	///
	/// Panics if `count > capacity()`.
	pub unsafe fn set_count(&mut self, count: usize) {
		assert!(count <= self.items.capacity(), "count {count} exceeds capacity {}", self.items.capacity());
		// SAFETY: bounded by capacity above; initialization is the caller's contract.
		unsafe { self.items.set_len(count) }
	}

	/// Returns a snapshot of the live items, leaving the builder untouched.
	pub fn to_immutable(&self) -> Arc<[T]>
	where
		T: Clone,
	{
		Arc::from(self.items.as_slice())
	}

	/// Moves the items into a snapshot and returns the builder to its pool.
	pub fn to_immutable_and_free(mut self) -> Arc<[T]> {
		self.items.drain(..).collect()
	}

	/// Returns the builder to its pool.
	pub fn free(self) {}
}

impl<T: 'static> Default for SpannableBuilder<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: 'static> Drop for SpannableBuilder<T> {
	fn drop(&mut self) {
		let Some(pool) = self.pool.take() else {
			return;
		};
		let capacity = self.items.capacity();
		if capacity > pool.spec().retained_capacity_limit() {
			tracing::trace!(capacity, "pool.spannable.abandon");
			return;
		}
		self.items.clear();
		pool.free(SpanStorage(std::mem::take(&mut self.items)));
	}
}

impl<T: 'static> Deref for SpannableBuilder<T> {
	type Target = [T];

	fn deref(&self) -> &[T] {
		&self.items
	}
}

impl<T: 'static> DerefMut for SpannableBuilder<T> {
	fn deref_mut(&mut self) -> &mut [T] {
		&mut self.items
	}
}

impl<T: fmt::Debug + 'static> fmt::Debug for SpannableBuilder<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SpannableBuilder")
			.field("items", &self.items)
			.field("capacity", &self.items.capacity())
			.finish_non_exhaustive()
	}
}

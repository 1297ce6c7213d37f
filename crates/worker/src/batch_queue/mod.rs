//! Debounced, serialized batch processing.
//!
//! Producers add items from any task or thread. The first item added while
//! no batch is scheduled starts the debounce delay; when it elapses, every
//! item pending at that moment is handed to the callback as one immutable
//! batch. Items added while a batch is being processed go to the next batch,
//! which is dispatched only after the current callback has returned.
//!
//! Two cancellation scopes apply:
//! * the entire-queue token, a child of the lifetime token passed at
//!   construction. Once cancelled, nothing is dispatched again.
//! * the per-batch token handed to the callback. It is cancelled by
//!   [`BatchingWorkQueue::cancel_existing_work`], which also discards the
//!   pending items. A callback already running only observes it cooperatively.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sluice_pool::{MAX_POOLED_CAPACITY, PooledBuilder};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BatchError, BatchResult};
use crate::token::CancellationSeries;

mod slot;
mod spec;

use slot::BatchSlot;
pub use spec::WorkQueueSpec;
use spec::DedupSet;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type ProcessFn<I, R> = dyn Fn(Arc<[I]>, CancellationToken) -> BoxFuture<Result<R, String>> + Send + Sync;

/// Counter snapshot for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
	/// Batches whose callback returned a result.
	pub batches_completed: u64,
	/// Batches whose callback returned an error or panicked.
	pub batches_failed: u64,
	/// Batches that produced no result because of cancellation.
	pub batches_cancelled: u64,
	/// Items handed to the callback across all batches.
	pub items_dispatched: u64,
}

#[derive(Default)]
struct QueueCounters {
	completed: AtomicU64,
	failed: AtomicU64,
	cancelled: AtomicU64,
	items: AtomicU64,
}

struct QueueState<I: 'static, R> {
	pending: PooledBuilder<I>,
	dedup: Option<Box<dyn DedupSet<I>>>,
	series: CancellationSeries,
	task_in_flight: bool,
	closed: bool,
	/// Slot of the most recently scheduled batch.
	latest: BatchSlot<R>,
}

impl<I: 'static, R> QueueState<I, R> {
	fn discard_pending(&mut self) -> usize {
		let discarded = self.pending.len();
		self.pending.clear();
		if let Some(dedup) = self.dedup.as_mut() {
			dedup.clear();
		}
		self.series.create_next();
		discarded
	}
}

struct QueueInner<I: 'static, R> {
	name: String,
	delay: Duration,
	cancel: CancellationToken,
	process: Arc<ProcessFn<I, R>>,
	state: Mutex<QueueState<I, R>>,
	scheduled: Notify,
	counters: QueueCounters,
}

impl<I, R> QueueInner<I, R>
where
	I: Send + Sync + 'static,
	R: Send + Sync + 'static,
{
	fn add_work(&self, items: impl IntoIterator<Item = I>, cancel_existing: bool) {
		if self.cancel.is_cancelled() {
			tracing::trace!(queue = %self.name, "worker.batch_queue.add_after_shutdown");
			return;
		}

		let mut guard = self.state.lock();
		let state = &mut *guard;
		if state.closed {
			return;
		}
		if cancel_existing {
			let discarded = state.discard_pending();
			tracing::debug!(queue = %self.name, discarded, "worker.batch_queue.cancel_existing");
		}

		let mut added = 0usize;
		for item in items {
			let fresh = match state.dedup.as_mut() {
				Some(dedup) => dedup.insert(&item),
				None => true,
			};
			if fresh {
				state.pending.add(item);
				added += 1;
			}
		}

		if added == 0 || state.task_in_flight {
			return;
		}
		state.task_in_flight = true;
		state.latest = BatchSlot::pending();
		drop(guard);
		self.scheduled.notify_one();
	}

	/// Swaps out the pending items for an empty buffer.
	///
	/// Returns `None` once the queue is shut down.
	fn take_batch(&self) -> Option<(Arc<[I]>, CancellationToken, BatchSlot<R>)> {
		let mut guard = self.state.lock();
		if self.cancel.is_cancelled() {
			return None;
		}
		let state = &mut *guard;
		state.task_in_flight = false;
		let batch = state.pending.to_immutable_and_clear();
		if state.pending.capacity() > MAX_POOLED_CAPACITY {
			// The old buffer is dropped and abandoned by its pool.
			state.pending = PooledBuilder::get_instance();
		}
		if let Some(dedup) = state.dedup.as_mut() {
			dedup.clear();
		}
		Some((batch, state.series.current(), state.latest.clone()))
	}

	async fn process_batch(&self, batch: Arc<[I]>, token: CancellationToken) -> BatchResult<R> {
		if batch.is_empty() {
			self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
			tracing::debug!(queue = %self.name, "worker.batch_queue.empty");
			return Ok(None);
		}

		let items = batch.len();
		self.counters.items.fetch_add(items as u64, Ordering::Relaxed);
		tracing::debug!(queue = %self.name, items, "worker.batch_queue.dispatch");

		// The callback is invoked inside its own task so a panic, even one
		// raised before it returns a future, stays contained.
		let process = Arc::clone(&self.process);
		let batch_token = token.clone();
		let joined = crate::spawn(&self.name, async move { process(batch, batch_token).await }).await;
		let outcome = match joined {
			Ok(Ok(result)) => Ok(Some(result)),
			Ok(Err(_)) if self.cancel.is_cancelled() => Err(BatchError::ShutDown),
			Ok(Err(_)) if token.is_cancelled() => Ok(None),
			Ok(Err(msg)) => Err(BatchError::Failed(msg)),
			Err(err) => Err(BatchError::from_join_error(err)),
		};

		match &outcome {
			Ok(Some(_)) => {
				self.counters.completed.fetch_add(1, Ordering::Relaxed);
				tracing::debug!(queue = %self.name, items, "worker.batch_queue.completed");
			}
			Ok(None) | Err(BatchError::ShutDown) => {
				self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
				tracing::debug!(queue = %self.name, items, "worker.batch_queue.cancelled");
			}
			Err(err) => {
				self.counters.failed.fetch_add(1, Ordering::Relaxed);
				tracing::warn!(queue = %self.name, items, error = %err, "worker.batch_queue.failed");
			}
		}
		outcome
	}

	/// Marks the queue closed and settles the newest scheduled batch.
	fn close(&self) {
		let mut guard = self.state.lock();
		let state = &mut *guard;
		state.closed = true;
		let discarded = state.pending.len();
		state.pending.clear();
		if let Some(dedup) = state.dedup.as_mut() {
			dedup.clear();
		}
		let latest = state.latest.clone();
		drop(guard);

		let abandoned = !latest.is_completed();
		latest.complete(Err(BatchError::ShutDown));
		tracing::debug!(queue = %self.name, discarded, abandoned, "worker.batch_queue.shutdown");
	}

	fn stats(&self) -> QueueStats {
		QueueStats {
			batches_completed: self.counters.completed.load(Ordering::Relaxed),
			batches_failed: self.counters.failed.load(Ordering::Relaxed),
			batches_cancelled: self.counters.cancelled.load(Ordering::Relaxed),
			items_dispatched: self.counters.items.load(Ordering::Relaxed),
		}
	}
}

async fn run_queue<I, R>(inner: Arc<QueueInner<I, R>>)
where
	I: Send + Sync + 'static,
	R: Send + Sync + 'static,
{
	loop {
		tokio::select! {
			biased;
			() = inner.cancel.cancelled() => break,
			() = inner.scheduled.notified() => {}
		}

		// Let the producer that scheduled us finish before the delay starts.
		tokio::task::yield_now().await;

		if !inner.delay.is_zero() {
			tokio::select! {
				biased;
				() = inner.cancel.cancelled() => break,
				() = tokio::time::sleep(inner.delay) => {}
			}
		}

		let Some((batch, token, slot)) = inner.take_batch() else {
			break;
		};
		let outcome = inner.process_batch(batch, token).await;
		slot.complete(outcome);
	}
	inner.close();
}

/// Debounced queue delivering pending items to an async callback in batches.
///
/// At most one batch is in flight at a time, and batches reach the callback
/// in the order they were scheduled. A failing or panicking callback is
/// reported and the queue keeps running; only the caller waiting on that
/// batch sees the error.
///
/// Dropping the queue disposes it.
pub struct BatchingWorkQueue<I, R>
where
	I: Send + Sync + 'static,
	R: Clone + Send + Sync + 'static,
{
	inner: Arc<QueueInner<I, R>>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl<I, R> BatchingWorkQueue<I, R>
where
	I: Send + Sync + 'static,
	R: Clone + Send + Sync + 'static,
{
	/// Creates a queue and spawns its worker.
	///
	/// The queue shuts down when `lifetime` is cancelled or the queue is
	/// disposed, whichever comes first.
	pub fn new<F, Fut, E>(spec: WorkQueueSpec<I>, process_batch: F, lifetime: &CancellationToken) -> Self
	where
		F: Fn(Arc<[I]>, CancellationToken) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<R, E>> + Send + 'static,
		E: fmt::Display + 'static,
	{
		let process: Arc<ProcessFn<I, R>> = Arc::new(move |batch: Arc<[I]>, token: CancellationToken| {
			let fut = process_batch(batch, token);
			let boxed: BoxFuture<Result<R, String>> = Box::pin(async move { fut.await.map_err(|err| err.to_string()) });
			boxed
		});

		let cancel = lifetime.child_token();
		let inner = Arc::new(QueueInner {
			name: spec.name,
			delay: spec.delay,
			cancel: cancel.clone(),
			process,
			state: Mutex::new(QueueState {
				pending: PooledBuilder::get_instance(),
				dedup: spec.dedup,
				series: CancellationSeries::new(cancel),
				task_in_flight: false,
				closed: false,
				latest: BatchSlot::completed(Ok(None)),
			}),
			scheduled: Notify::new(),
			counters: QueueCounters::default(),
		});

		let worker = crate::spawn(&inner.name, run_queue(Arc::clone(&inner)));
		Self {
			inner,
			worker: Mutex::new(Some(worker)),
		}
	}

	/// Queue name.
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Adds one item to the next batch.
	pub fn add_item(&self, item: I) {
		self.inner.add_work(std::iter::once(item), false);
	}

	/// Adds items to the next batch, scheduling it if none is scheduled.
	///
	/// Does nothing once the queue is shut down.
	pub fn add_work(&self, items: impl IntoIterator<Item = I>) {
		self.inner.add_work(items, false);
	}

	/// Discards pending items, then adds `items` to the next batch.
	pub fn cancel_and_add_work(&self, items: impl IntoIterator<Item = I>) {
		self.inner.add_work(items, true);
	}

	/// Discards items not yet dispatched and cancels the batch token.
	///
	/// A callback already running keeps its batch and only sees the
	/// cancellation through its token.
	pub fn cancel_existing_work(&self) {
		let discarded = self.inner.state.lock().discard_pending();
		tracing::debug!(queue = %self.inner.name, discarded, "worker.batch_queue.cancel_existing");
	}

	/// Waits for the batch that is scheduled or running at the time of the
	/// call, and returns its outcome.
	///
	/// When nothing is in flight, returns the outcome of the last batch.
	pub async fn wait_until_current_batch_completes(&self) -> BatchResult<R> {
		let slot = self.inner.state.lock().latest.clone();
		slot.wait().await
	}

	/// Number of items waiting for the next batch.
	pub fn pending_len(&self) -> usize {
		self.inner.state.lock().pending.len()
	}

	/// Returns true once the queue has been disposed or its lifetime ended.
	pub fn is_shut_down(&self) -> bool {
		self.inner.cancel.is_cancelled()
	}

	/// Returns a snapshot of the queue counters.
	pub fn stats(&self) -> QueueStats {
		self.inner.stats()
	}

	/// Stops scheduling batches. A running callback is not interrupted.
	pub fn dispose(&self) {
		self.inner.cancel.cancel();
	}

	/// Disposes the queue and waits for its worker to exit.
	///
	/// A callback already running is allowed to finish first.
	pub async fn shutdown(&self) {
		self.dispose();
		let worker = self.worker.lock().take();
		if let Some(worker) = worker {
			let _ = worker.await;
		}
	}
}

impl<I, R> Drop for BatchingWorkQueue<I, R>
where
	I: Send + Sync + 'static,
	R: Clone + Send + Sync + 'static,
{
	fn drop(&mut self) {
		self.dispose();
	}
}

impl<I, R> fmt::Debug for BatchingWorkQueue<I, R>
where
	I: Send + Sync + 'static,
	R: Clone + Send + Sync + 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BatchingWorkQueue")
			.field("name", &self.inner.name)
			.field("delay", &self.inner.delay)
			.field("shut_down", &self.is_shut_down())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests;

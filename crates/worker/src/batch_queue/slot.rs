use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{BatchError, BatchResult};

/// Completion cell for one scheduled batch.
///
/// Completed exactly once; later completions are ignored. Any number of
/// waiters may observe the outcome.
pub(super) struct BatchSlot<R> {
	tx: Arc<watch::Sender<Option<BatchResult<R>>>>,
}

impl<R> Clone for BatchSlot<R> {
	fn clone(&self) -> Self {
		Self { tx: Arc::clone(&self.tx) }
	}
}

impl<R> BatchSlot<R> {
	/// Slot for a batch that has been scheduled but not run.
	pub(super) fn pending() -> Self {
		let (tx, _rx) = watch::channel(None);
		Self { tx: Arc::new(tx) }
	}

	/// Slot that already holds `outcome`.
	pub(super) fn completed(outcome: BatchResult<R>) -> Self {
		let (tx, _rx) = watch::channel(Some(outcome));
		Self { tx: Arc::new(tx) }
	}

	/// Stores `outcome` unless the slot was already completed.
	pub(super) fn complete(&self, outcome: BatchResult<R>) {
		self.tx.send_if_modified(|slot| {
			if slot.is_some() {
				return false;
			}
			*slot = Some(outcome);
			true
		});
	}

	pub(super) fn is_completed(&self) -> bool {
		self.tx.borrow().is_some()
	}
}

impl<R: Clone> BatchSlot<R> {
	/// Waits for the outcome.
	pub(super) async fn wait(&self) -> BatchResult<R> {
		let mut rx = self.tx.subscribe();
		let outcome = match rx.wait_for(Option::is_some).await {
			Ok(outcome) => outcome.clone(),
			Err(_) => None,
		};
		outcome.unwrap_or(Err(BatchError::ShutDown))
	}
}

use thiserror::Error;
use tokio::task::JoinError;

/// Why a batch did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
	/// The batch callback returned an error.
	#[error("batch processing failed: {0}")]
	Failed(String),
	/// The batch callback panicked.
	#[error("batch processing panicked: {0}")]
	Panicked(String),
	/// The queue shut down before the batch produced a result.
	#[error("work queue shut down")]
	ShutDown,
}

impl BatchError {
	/// Maps the failure of a batch's child task.
	///
	/// A panic keeps its message; a task aborted by its runtime counts as
	/// shutdown.
	pub(crate) fn from_join_error(err: JoinError) -> Self {
		let payload = match err.try_into_panic() {
			Ok(payload) => payload,
			Err(_) => return Self::ShutDown,
		};
		let msg = if let Some(msg) = payload.downcast_ref::<&'static str>() {
			(*msg).to_string()
		} else if let Some(msg) = payload.downcast_ref::<String>() {
			msg.clone()
		} else {
			"non-string panic payload".to_string()
		};
		Self::Panicked(msg)
	}
}

/// Outcome of one batch.
///
/// `Ok(None)` means the batch produced no result: its items were all
/// discarded, or the callback gave up after its batch token was cancelled.
pub type BatchResult<R> = Result<Option<R>, BatchError>;

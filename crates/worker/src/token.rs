use tokio_util::sync::CancellationToken;

/// Chain of cancellation tokens derived from one parent.
///
/// Each call to [`create_next`](Self::create_next) cancels the token handed
/// out before it and returns a fresh child of the parent. Cancelling the
/// parent cancels whichever token is current.
#[derive(Debug)]
pub struct CancellationSeries {
	parent: CancellationToken,
	current: CancellationToken,
	generation: u64,
}

impl CancellationSeries {
	/// Creates a series whose first token is a child of `parent`.
	pub fn new(parent: CancellationToken) -> Self {
		let current = parent.child_token();
		Self {
			parent,
			current,
			generation: 0,
		}
	}

	/// Returns the current token.
	pub fn current(&self) -> CancellationToken {
		self.current.clone()
	}

	/// Returns how many tokens have been superseded so far.
	pub const fn generation(&self) -> u64 {
		self.generation
	}

	/// Returns true while the current token has not been cancelled.
	pub fn has_active_token(&self) -> bool {
		!self.current.is_cancelled()
	}

	/// Cancels the current token and replaces it with a fresh child of the parent.
	pub fn create_next(&mut self) -> CancellationToken {
		let next = self.parent.child_token();
		let previous = std::mem::replace(&mut self.current, next.clone());
		previous.cancel();
		self.generation = self.generation.wrapping_add(1);
		next
	}

	/// Cancels the current token without replacing it.
	pub fn cancel(&self) {
		self.current.cancel();
	}
}

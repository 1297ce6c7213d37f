use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// Runtime for queues constructed outside of any tokio context.
fn fallback_runtime() -> &'static Runtime {
	static FALLBACK: OnceLock<Runtime> = OnceLock::new();
	FALLBACK.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("sluice-queue")
			.build()
			.expect("failed to build sluice fallback tokio runtime")
	})
}

/// Spawns `fut` on the ambient runtime, or on a shared fallback runtime
/// when called outside of one.
///
/// `label` names the task in trace events; queues pass their own name.
pub fn spawn<F>(label: &str, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task = label, "worker.spawn");
	match Handle::try_current() {
		Ok(handle) => handle.spawn(fut),
		Err(_) => fallback_runtime().spawn(fut),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn spawns_outside_a_runtime() {
		let handle = spawn("fallback-test", async { 21 * 2 });
		let value = fallback_runtime().block_on(handle).unwrap();
		assert_eq!(value, 42);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn spawns_on_ambient_runtime() {
		let ambient = std::thread::current().id();
		let seen = spawn("ambient-test", async { std::thread::current().id() }).await.unwrap();
		assert_eq!(seen, ambient, "current-thread runtime runs its tasks on the test thread");
	}
}

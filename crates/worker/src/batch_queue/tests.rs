use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize};

use super::*;

type Recorded<I> = Arc<Mutex<Vec<Vec<I>>>>;

/// Queue whose callback records every batch and returns its length.
fn recording_queue<I>(spec: WorkQueueSpec<I>, lifetime: &CancellationToken) -> (BatchingWorkQueue<I, usize>, Recorded<I>)
where
	I: Clone + Send + Sync + 'static,
{
	let recorded: Recorded<I> = Arc::default();
	let sink = Arc::clone(&recorded);
	let queue = BatchingWorkQueue::new(
		spec,
		move |batch: Arc<[I]>, _token| {
			let sink = Arc::clone(&sink);
			async move {
				sink.lock().push(batch.to_vec());
				Ok::<_, Infallible>(batch.len())
			}
		},
		lifetime,
	);
	(queue, recorded)
}

fn spec(delay_ms: u64) -> WorkQueueSpec<u32> {
	WorkQueueSpec::new("test", Duration::from_millis(delay_ms))
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn coalesces_items_added_within_delay() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(50), &lifetime);

	queue.add_item(1);
	queue.add_item(2);
	assert_eq!(queue.pending_len(), 2);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(2)));
	assert_eq!(*recorded.lock(), vec![vec![1, 2]]);
	assert_eq!(queue.pending_len(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn items_after_dispatch_form_next_batch() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(50), &lifetime);

	queue.add_work([1, 2]);
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(*recorded.lock(), vec![vec![1, 2]]);

	queue.add_item(3);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(1)));
	assert_eq!(*recorded.lock(), vec![vec![1, 2], vec![3]]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn zero_delay_still_batches() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(0), &lifetime);

	queue.add_work([4, 5]);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(2)));
	assert_eq!(*recorded.lock(), vec![vec![4, 5]]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn wait_without_work_returns_last_outcome() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(10), &lifetime);

	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(None));
	queue.add_item(1);
	queue.wait_until_current_batch_completes().await.unwrap();
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(1)));
	assert_eq!(recorded.lock().len(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dedup_drops_items_already_pending() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(10).dedup(), &lifetime);

	queue.add_work([1, 1, 2, 1]);
	queue.wait_until_current_batch_completes().await.unwrap();
	queue.add_work([1, 2]);
	queue.wait_until_current_batch_completes().await.unwrap();
	assert_eq!(*recorded.lock(), vec![vec![1, 2], vec![1, 2]]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dedup_by_key_keeps_first_item() {
	let lifetime = CancellationToken::new();
	let spec = WorkQueueSpec::new("paths", Duration::from_millis(10)).dedup_by_key(|path: &String| path.to_lowercase());
	let (queue, recorded) = recording_queue(spec, &lifetime);

	queue.add_work(["Cargo.toml", "cargo.TOML", "src/lib.rs"].map(String::from));
	queue.wait_until_current_batch_completes().await.unwrap();
	assert_eq!(*recorded.lock(), vec![vec!["Cargo.toml".to_string(), "src/lib.rs".to_string()]]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unit_items_act_as_trigger() {
	let lifetime = CancellationToken::new();
	let runs = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&runs);
	let queue = BatchingWorkQueue::new(
		WorkQueueSpec::new("refresh", Duration::from_millis(20)).dedup(),
		move |batch: Arc<[()]>, _token| {
			assert_eq!(batch.len(), 1);
			counter.fetch_add(1, Ordering::SeqCst);
			async { Ok::<(), Infallible>(()) }
		},
		&lifetime,
	);

	queue.add_item(());
	queue.add_item(());
	queue.add_item(());
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(())));
	assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn cancel_and_add_work_replaces_pending_items() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(50).dedup(), &lifetime);

	queue.add_work([1, 2]);
	queue.cancel_and_add_work([2]);
	queue.wait_until_current_batch_completes().await.unwrap();
	assert_eq!(*recorded.lock(), vec![vec![2]]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn cancelling_everything_pending_skips_the_callback() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(50), &lifetime);

	queue.add_work([1, 2]);
	queue.cancel_existing_work();
	assert_eq!(queue.pending_len(), 0);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(None));
	assert!(recorded.lock().is_empty());
	assert_eq!(queue.stats().batches_cancelled, 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_batch_does_not_stop_the_queue() {
	let lifetime = CancellationToken::new();
	let queue = BatchingWorkQueue::new(
		spec(10),
		|batch: Arc<[u32]>, _token| async move {
			if batch.contains(&0) {
				return Err("zero is not allowed");
			}
			Ok(batch.len())
		},
		&lifetime,
	);

	queue.add_item(0);
	assert_eq!(
		queue.wait_until_current_batch_completes().await,
		Err(BatchError::Failed("zero is not allowed".to_string()))
	);

	queue.add_work([1, 2]);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(2)));

	let stats = queue.stats();
	assert_eq!(stats.batches_failed, 1);
	assert_eq!(stats.batches_completed, 1);
	assert_eq!(stats.items_dispatched, 3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn panicking_batch_is_isolated() {
	let lifetime = CancellationToken::new();
	let queue = BatchingWorkQueue::new(
		spec(10),
		|batch: Arc<[u32]>, _token| async move {
			if batch.contains(&0) {
				panic!("bad item in batch");
			}
			Ok::<_, Infallible>(batch.len())
		},
		&lifetime,
	);

	queue.add_item(0);
	match queue.wait_until_current_batch_completes().await {
		Err(BatchError::Panicked(msg)) => assert!(msg.contains("bad item"), "unexpected message: {msg}"),
		other => panic!("expected a panic outcome, got {other:?}"),
	}

	queue.add_item(7);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(1)));
	assert!(!queue.is_shut_down());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn panic_before_returning_future_is_isolated() {
	let lifetime = CancellationToken::new();
	let queue = BatchingWorkQueue::new(
		spec(10),
		|batch: Arc<[u32]>, _token| {
			assert!(!batch.contains(&0), "zero rejected before any await");
			async move { Ok::<_, Infallible>(batch.len()) }
		},
		&lifetime,
	);

	queue.add_item(0);
	match queue.wait_until_current_batch_completes().await {
		Err(BatchError::Panicked(msg)) => assert!(msg.contains("zero rejected"), "unexpected message: {msg}"),
		other => panic!("expected a panic outcome, got {other:?}"),
	}
	assert!(!queue.is_shut_down());

	queue.add_item(7);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(1)));
	assert_eq!(queue.stats().batches_failed, 1);
	assert_eq!(queue.stats().batches_completed, 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn burst_does_not_pin_pending_storage() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(10), &lifetime);

	queue.add_work(0..1_000);
	assert!(queue.inner.state.lock().pending.capacity() > MAX_POOLED_CAPACITY);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(1_000)));
	assert!(queue.inner.state.lock().pending.capacity() <= MAX_POOLED_CAPACITY);

	queue.add_item(1);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(1)));
	assert_eq!(recorded.lock().len(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn cancel_during_execution_only_signals_running_batch() {
	let lifetime = CancellationToken::new();
	let recorded: Recorded<u32> = Arc::default();
	let tokens: Arc<Mutex<Vec<CancellationToken>>> = Arc::default();
	let started = Arc::new(Notify::new());
	let gate = Arc::new(Notify::new());

	let queue = {
		let recorded = Arc::clone(&recorded);
		let tokens = Arc::clone(&tokens);
		let started = Arc::clone(&started);
		let gate = Arc::clone(&gate);
		BatchingWorkQueue::new(
			spec(10),
			move |batch: Arc<[u32]>, token| {
				recorded.lock().push(batch.to_vec());
				tokens.lock().push(token);
				let started = Arc::clone(&started);
				let gate = Arc::clone(&gate);
				async move {
					started.notify_one();
					if batch.contains(&1) {
						gate.notified().await;
					}
					Ok::<_, Infallible>(batch.len())
				}
			},
			&lifetime,
		)
	};

	queue.add_item(1);
	started.notified().await;

	queue.cancel_existing_work();
	queue.add_item(3);
	assert!(tokens.lock()[0].is_cancelled());
	assert_eq!(*recorded.lock(), vec![vec![1]]);

	gate.notify_one();
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(1)));
	assert_eq!(*recorded.lock(), vec![vec![1], vec![3]]);
	assert!(!tokens.lock()[1].is_cancelled());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn callback_giving_up_after_cancellation_yields_no_result() {
	let lifetime = CancellationToken::new();
	let started = Arc::new(Notify::new());
	let signal = Arc::clone(&started);
	let queue = BatchingWorkQueue::new(
		spec(10),
		move |_batch: Arc<[u32]>, token: CancellationToken| {
			let signal = Arc::clone(&signal);
			async move {
				signal.notify_one();
				token.cancelled().await;
				Err::<usize, _>("gave up")
			}
		},
		&lifetime,
	);

	queue.add_item(1);
	started.notified().await;
	queue.cancel_existing_work();
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(None));
	assert_eq!(queue.stats().batches_cancelled, 1);
	assert_eq!(queue.stats().batches_failed, 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lifetime_cancellation_stops_dispatch() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(50), &lifetime);

	queue.add_work([1, 2]);
	lifetime.cancel();
	assert_eq!(queue.wait_until_current_batch_completes().await, Err(BatchError::ShutDown));
	assert!(queue.is_shut_down());

	queue.add_item(3);
	assert_eq!(queue.pending_len(), 0);
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(recorded.lock().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dispose_abandons_scheduled_batch() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(50), &lifetime);

	queue.add_item(1);
	queue.dispose();
	assert_eq!(queue.wait_until_current_batch_completes().await, Err(BatchError::ShutDown));
	assert!(recorded.lock().is_empty());
	assert!(!lifetime.is_cancelled(), "disposing a queue must not cancel its lifetime");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn shutdown_waits_for_worker_and_ignores_later_work() {
	let lifetime = CancellationToken::new();
	let (queue, recorded) = recording_queue(spec(10), &lifetime);

	queue.add_work([1, 2]);
	queue.wait_until_current_batch_completes().await.unwrap();
	queue.shutdown().await;

	queue.add_item(3);
	assert_eq!(queue.pending_len(), 0);
	assert_eq!(queue.wait_until_current_batch_completes().await, Ok(Some(2)));
	assert_eq!(*recorded.lock(), vec![vec![1, 2]]);
	assert_eq!(
		queue.stats(),
		QueueStats {
			batches_completed: 1,
			batches_failed: 0,
			batches_cancelled: 0,
			items_dispatched: 2,
		}
	);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_get_serialized_batches() {
	const PRODUCERS: u32 = 4;
	const PER_PRODUCER: u32 = 250;

	let lifetime = CancellationToken::new();
	let active = Arc::new(AtomicUsize::new(0));
	let overlapped = Arc::new(AtomicBool::new(false));
	let seen: Arc<Mutex<Vec<u32>>> = Arc::default();

	let queue = {
		let active = Arc::clone(&active);
		let overlapped = Arc::clone(&overlapped);
		let seen = Arc::clone(&seen);
		BatchingWorkQueue::new(
			WorkQueueSpec::new("concurrent", Duration::from_millis(1)),
			move |batch: Arc<[u32]>, _token| {
				let active = Arc::clone(&active);
				let overlapped = Arc::clone(&overlapped);
				let seen = Arc::clone(&seen);
				async move {
					if active.fetch_add(1, Ordering::SeqCst) != 0 {
						overlapped.store(true, Ordering::SeqCst);
					}
					seen.lock().extend(batch.iter().copied());
					tokio::task::yield_now().await;
					active.fetch_sub(1, Ordering::SeqCst);
					Ok::<_, Infallible>(batch.len())
				}
			},
			&lifetime,
		)
	};
	let queue = Arc::new(queue);

	let producers: Vec<_> = (0..PRODUCERS)
		.map(|producer| {
			let queue = Arc::clone(&queue);
			tokio::spawn(async move {
				for i in 0..PER_PRODUCER {
					queue.add_item(producer * 1_000 + i);
					if i % 16 == 0 {
						tokio::task::yield_now().await;
					}
				}
			})
		})
		.collect();
	for producer in producers {
		producer.await.unwrap();
	}
	queue.wait_until_current_batch_completes().await.unwrap();

	assert!(!overlapped.load(Ordering::SeqCst), "batches ran concurrently");
	let mut seen = seen.lock().clone();
	seen.sort_unstable();
	let expected: Vec<u32> = (0..PRODUCERS).flat_map(|p| (0..PER_PRODUCER).map(move |i| p * 1_000 + i)).collect();
	assert_eq!(seen, expected);
}

#[test]
fn spec_accessors() {
	let spec = WorkQueueSpec::<u8>::new("diagnostics", Duration::from_millis(250)).dedup();
	assert_eq!(spec.name(), "diagnostics");
	assert_eq!(spec.delay(), Duration::from_millis(250));
	assert!(format!("{spec:?}").contains("dedup: true"));
}

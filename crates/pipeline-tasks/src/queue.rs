use std::sync::{
	atomic::{AtomicBool, AtomicU64, Ordering},
	Arc,
};

use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{instrument, trace};

use crate::{
	controller::{ErasedQueue, TaskRemoteController},
	interrupt::{InterruptHandle, Interrupter},
	priority::{Priority, SharedPriority},
	task::{ExecStatus, Task, TaskId},
};

/// One pending or in-flight entry on a named queue.
struct Entry<E> {
	id: TaskId,
	seq: u64,
	priority: Arc<SharedPriority>,
	interrupt_handle: Arc<InterruptHandle>,
	interrupter: Interrupter,
	task: Box<dyn Task<E>>,
	result_tx: oneshot::Sender<Result<ExecStatus, E>>,
}

/// A single named, bounded-concurrency priority queue.
///
/// Pending entries live in a plain `Vec` rather than a binary heap: priority
/// is stored in a shared atomic cell (see [`SharedPriority`]) so
/// re-prioritizing a pending entry is an `O(1)` store, and picking the next
/// entry to run is an `O(n)` scan over what is, for a client image pipeline,
/// always a small number of outstanding operations.
pub(crate) struct Queue<E> {
	pending: AsyncMutex<Vec<Entry<E>>>,
	has_work: Notify,
	permits: Arc<Semaphore>,
	next_seq: AtomicU64,
	shutdown: AtomicBool,
}

impl<E> Queue<E>
where
	E: std::error::Error + Send + Sync + 'static,
{
	pub(crate) fn new(concurrency: usize) -> Arc<Self> {
		Arc::new(Self {
			pending: AsyncMutex::new(Vec::new()),
			has_work: Notify::new(),
			permits: Arc::new(Semaphore::new(concurrency.max(1))),
			next_seq: AtomicU64::new(0),
			shutdown: AtomicBool::new(false),
		})
	}

	/// Enqueues a task and returns the controller/result pair handed back to
	/// the caller.
	pub(crate) async fn push(
		self: &Arc<Self>,
		priority: Priority,
		task: Box<dyn Task<E>>,
	) -> (TaskRemoteController, oneshot::Receiver<Result<ExecStatus, E>>) {
		let id = task.id();
		let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
		let shared_priority = Arc::new(SharedPriority::new(priority));
		let (interrupter, interrupt_handle) = Interrupter::new();
		let interrupt_handle = Arc::new(interrupt_handle);
		let (result_tx, result_rx) = oneshot::channel();

		let controller = TaskRemoteController::new(
			id,
			Arc::clone(&shared_priority),
			Arc::clone(&interrupt_handle),
			Arc::clone(self) as Arc<dyn ErasedQueue>,
		);

		{
			let mut pending = self.pending.lock().await;
			pending.push(Entry {
				id,
				seq,
				priority: shared_priority,
				interrupt_handle,
				interrupter,
				task,
				result_tx,
			});
		}
		// `notify_one`, not `notify_waiters`: there is exactly one consumer
		// (`run_dispatch_loop`, spawned once per queue), and only `notify_one`
		// buffers a permit for a `notified()` call that hasn't been made yet.
		// `notify_waiters` only wakes waiters already registered at the time
		// of the call, so a `push` landing between the dispatch loop's
		// `pending.is_empty()` check and its `notified().await` would
		// otherwise be silently dropped, stalling the queue.
		self.has_work.notify_one();

		(controller, result_rx)
	}

	fn pop_best(pending: &mut Vec<Entry<E>>) -> Option<Entry<E>> {
		if pending.is_empty() {
			return None;
		}
		let mut best = 0usize;
		for idx in 1..pending.len() {
			let candidate_priority = pending[idx].priority.get();
			let current_priority = pending[best].priority.get();
			let better = candidate_priority > current_priority
				|| (candidate_priority == current_priority && pending[idx].seq < pending[best].seq);
			if better {
				best = idx;
			}
		}
		Some(pending.remove(best))
	}

	/// Runs the dispatch loop for this queue until the queue is shut down.
	/// Spawned once per queue by [`TaskSystem::new`](crate::TaskSystem::new).
	#[instrument(skip(self))]
	pub(crate) async fn run_dispatch_loop(self: Arc<Self>) {
		loop {
			if self.shutdown.load(Ordering::Acquire) {
				return;
			}

			loop {
				if !self.pending.lock().await.is_empty() {
					break;
				}
				if self.shutdown.load(Ordering::Acquire) {
					return;
				}
				self.has_work.notified().await;
			}

			let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
				return;
			};

			let entry = {
				let mut pending = self.pending.lock().await;
				Self::pop_best(&mut pending)
			};

			let Some(entry) = entry else {
				drop(permit);
				continue;
			};

			tokio::spawn(Self::execute(entry, permit));
		}
	}

	async fn execute(mut entry: Entry<E>, permit: OwnedSemaphorePermit) {
		let _permit = permit;

		if entry.interrupt_handle.is_canceled() {
			let _ = entry.result_tx.send(Ok(ExecStatus::Canceled));
			return;
		}

		trace!(task_id = %entry.id, "running task");
		let result = entry.task.run(&entry.interrupter).await;
		let _ = entry.result_tx.send(result);
	}

	pub(crate) async fn shutdown(&self) {
		self.shutdown.store(true, Ordering::Release);
		let mut pending = self.pending.lock().await;
		for entry in pending.drain(..) {
			let _ = entry.result_tx.send(Ok(ExecStatus::Canceled));
		}
		self.has_work.notify_one();
	}

	pub(crate) async fn remove_pending(&self, id: TaskId) -> bool {
		let mut pending = self.pending.lock().await;
		if let Some(idx) = pending.iter().position(|e| e.id == id) {
			let entry = pending.remove(idx);
			let _ = entry.result_tx.send(Ok(ExecStatus::Canceled));
			true
		} else {
			false
		}
	}
}

#[async_trait::async_trait]
impl<E> ErasedQueue for Queue<E>
where
	E: std::error::Error + Send + Sync + 'static,
{
	async fn remove_pending(&self, id: TaskId) -> bool {
		Queue::remove_pending(self, id).await
	}
}

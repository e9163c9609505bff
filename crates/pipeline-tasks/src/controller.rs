use std::sync::Arc;

use async_trait::async_trait;

use crate::{
	error::TaskSystemError,
	interrupt::InterruptHandle,
	priority::{Priority, SharedPriority},
	task::TaskId,
};

/// Object-safe surface of a queue, used so [`TaskRemoteController`] doesn't
/// need to be generic over the queue's task error type.
#[async_trait]
pub(crate) trait ErasedQueue: Send + Sync {
	async fn remove_pending(&self, id: TaskId) -> bool;
}

/// A handle to a dispatched task that lets its owner re-prioritize or cancel
/// it without holding on to the task itself.
///
/// Cloning is cheap — every clone controls the same underlying task.
#[derive(Clone)]
pub struct TaskRemoteController {
	id: TaskId,
	priority: Arc<SharedPriority>,
	interrupt: Arc<InterruptHandle>,
	queue: Arc<dyn ErasedQueue>,
}

impl TaskRemoteController {
	pub(crate) fn new(
		id: TaskId,
		priority: Arc<SharedPriority>,
		interrupt: Arc<InterruptHandle>,
		queue: Arc<dyn ErasedQueue>,
	) -> Self {
		Self {
			id,
			priority,
			interrupt,
			queue,
		}
	}

	#[must_use]
	pub fn id(&self) -> TaskId {
		self.id
	}

	/// Re-sorts this task's position in its queue. Takes effect the next
	/// time the queue picks its next entry to run — immediately, if the
	/// queue is currently idle-waiting.
	pub fn set_priority(&self, priority: Priority) {
		self.priority.set(priority);
	}

	#[must_use]
	pub fn priority(&self) -> Priority {
		self.priority.get()
	}

	/// Cancels the task. If it hasn't started running yet, it's removed from
	/// the queue and never runs at all. If it's already running, its
	/// [`Interrupter`](crate::Interrupter) fires and the task is expected to
	/// notice at its next cooperative check point.
	///
	/// Returns [`TaskSystemError::TaskNotFound`] when the task was neither
	/// pending nor still running (already finished, or already canceled) —
	/// a benign, expected outcome for callers racing a task's own
	/// completion, not a reason to treat the cancellation as failed.
	pub async fn cancel(&self) -> Result<(), TaskSystemError> {
		self.interrupt.cancel();
		if self.queue.remove_pending(self.id).await {
			Ok(())
		} else {
			Err(TaskSystemError::TaskNotFound(self.id))
		}
	}

	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.interrupt.is_canceled()
	}
}

impl std::fmt::Debug for TaskRemoteController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TaskRemoteController")
			.field("id", &self.id)
			.field("priority", &self.priority.get())
			.finish()
	}
}

use std::{collections::HashMap, fmt, hash::Hash, sync::Arc};

use crate::{dispatcher::BaseTaskDispatcher, error::TaskSystemError, queue::Queue};

/// Owns the named, bounded-concurrency queues behind a pipeline's work
/// stages and runs their dispatch loops for as long as the system lives.
///
/// `Stage` is whatever small closed enum the caller uses to name its queues
/// (e.g. data loading, decoding, processing, decompressing) — this crate has
/// no opinion on what the stages are, only on how work within each one is
/// scheduled.
pub struct TaskSystem<Stage, E> {
	dispatcher: BaseTaskDispatcher<Stage, E>,
	queues: Arc<HashMap<Stage, Arc<Queue<E>>>>,
}

impl<Stage, E> TaskSystem<Stage, E>
where
	Stage: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
	E: std::error::Error + Send + Sync + 'static,
{
	/// Builds the system and spawns one dispatch loop task per named stage.
	/// `stages` pairs each stage with its maximum concurrency.
	pub fn new(stages: impl IntoIterator<Item = (Stage, usize)>) -> Self {
		let mut queues = HashMap::new();
		for (stage, concurrency) in stages {
			queues.insert(stage, Queue::new(concurrency));
		}
		let queues = Arc::new(queues);

		for queue in queues.values() {
			tokio::spawn(Arc::clone(queue).run_dispatch_loop());
		}

		Self {
			dispatcher: BaseTaskDispatcher {
				queues: Arc::clone(&queues),
			},
			queues,
		}
	}

	/// A cheaply-cloneable dispatcher that can be handed out to callers that
	/// need to submit work but shouldn't own the system's lifecycle.
	#[must_use]
	pub fn dispatcher(&self) -> BaseTaskDispatcher<Stage, E> {
		self.dispatcher.clone()
	}

	/// Cancels every pending and in-flight task across all stages and stops
	/// accepting new dispatch loop iterations. Already-spawned `execute`
	/// futures for tasks that had started before shutdown run to completion
	/// on their own, since they may be holding onto state that must be
	/// unwound cleanly.
	pub async fn shutdown(&self) -> Result<(), TaskSystemError> {
		for queue in self.queues.values() {
			queue.shutdown().await;
		}
		Ok(())
	}
}

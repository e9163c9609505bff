use std::{collections::HashMap, fmt, hash::Hash, sync::Arc};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::instrument;

use crate::{
	controller::TaskRemoteController,
	error::TaskSystemError,
	priority::Priority,
	queue::Queue,
	task::{ExecStatus, Task, TaskId},
};

/// Future-ish handle to a single dispatched task.
///
/// `TaskHandle` is not itself a [`Future`](std::future::Future) — call
/// [`wait`](Self::wait) to consume it and get the result, or keep the
/// [`TaskRemoteController`] around (via [`remote_controller`](Self::remote_controller))
/// to reprioritize or cancel the task while it's still outstanding.
pub struct TaskHandle<E> {
	controller: TaskRemoteController,
	result_rx: oneshot::Receiver<Result<ExecStatus, E>>,
}

impl<E> TaskHandle<E>
where
	E: std::error::Error + Send + Sync + 'static + From<TaskSystemError>,
{
	pub(crate) fn new(
		controller: TaskRemoteController,
		result_rx: oneshot::Receiver<Result<ExecStatus, E>>,
	) -> Self {
		Self {
			controller,
			result_rx,
		}
	}

	#[must_use]
	pub fn id(&self) -> TaskId {
		self.controller.id()
	}

	#[must_use]
	pub fn remote_controller(&self) -> TaskRemoteController {
		self.controller.clone()
	}

	/// Cancels the task without waiting for the result. Prefer this over
	/// dropping the handle, which leaves the task running to completion.
	/// Returns [`TaskSystemError::TaskNotFound`] if the task was already
	/// running or already finished — an expected race, not a hard failure.
	pub async fn cancel(&self) -> Result<(), TaskSystemError> {
		self.controller.cancel().await
	}

	/// Consumes the handle, waiting for the task to finish, be canceled, or
	/// fail.
	pub async fn wait(self) -> Result<ExecStatus, E> {
		self.result_rx
			.await
			.unwrap_or_else(|_| Err(TaskSystemError::Shutdown.into()))
	}
}

/// A destination for dispatched work, parameterized over the set of named
/// stages a concrete pipeline defines (e.g. data loading, decoding,
/// processing, decompressing) and the error type its tasks return.
///
/// Kept as a trait — rather than calling [`TaskSystem`](crate::TaskSystem)
/// directly — so a caller can wrap a dispatcher with extra gating (e.g.
/// rejecting new work once a pipeline has been invalidated) without
/// reimplementing scheduling.
#[async_trait]
pub trait TaskDispatcher<Stage, E>: Send + Sync
where
	E: std::error::Error + Send + Sync + 'static + From<TaskSystemError>,
{
	async fn dispatch(
		&self,
		stage: Stage,
		priority: Priority,
		task: Box<dyn Task<E>>,
	) -> Result<TaskHandle<E>, TaskSystemError>;

	async fn dispatch_many(
		&self,
		stage: Stage,
		priority: Priority,
		tasks: Vec<Box<dyn Task<E>>>,
	) -> Result<Vec<TaskHandle<E>>, TaskSystemError>;
}

/// Default [`TaskDispatcher`] backed directly by a [`TaskSystem`](crate::TaskSystem)'s
/// named queues. Cheaply cloneable — every clone shares the same queues.
pub struct BaseTaskDispatcher<Stage, E> {
	pub(crate) queues: Arc<HashMap<Stage, Arc<Queue<E>>>>,
}

impl<Stage, E> Clone for BaseTaskDispatcher<Stage, E> {
	fn clone(&self) -> Self {
		Self {
			queues: Arc::clone(&self.queues),
		}
	}
}

#[async_trait]
impl<Stage, E> TaskDispatcher<Stage, E> for BaseTaskDispatcher<Stage, E>
where
	Stage: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
	E: std::error::Error + Send + Sync + 'static + From<TaskSystemError>,
{
	#[instrument(skip(self, task), fields(stage = ?stage, task_id = %task.id()))]
	async fn dispatch(
		&self,
		stage: Stage,
		priority: Priority,
		task: Box<dyn Task<E>>,
	) -> Result<TaskHandle<E>, TaskSystemError> {
		let queue = self
			.queues
			.get(&stage)
			.ok_or_else(|| TaskSystemError::UnknownStage(format!("{stage:?}")))?;

		let (controller, result_rx) = queue.push(priority, task).await;
		Ok(TaskHandle::new(controller, result_rx))
	}

	async fn dispatch_many(
		&self,
		stage: Stage,
		priority: Priority,
		tasks: Vec<Box<dyn Task<E>>>,
	) -> Result<Vec<TaskHandle<E>>, TaskSystemError> {
		let mut handles = Vec::with_capacity(tasks.len());
		for task in tasks {
			handles.push(self.dispatch(stage.clone(), priority, task).await?);
		}
		Ok(handles)
	}
}

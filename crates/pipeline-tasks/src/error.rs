use thiserror::Error;

use crate::TaskId;

/// Failures that originate in the scheduler itself, as opposed to a task's
/// own work. Callers generally fold this into their own error enum with
/// `#[from]`, the same way the donor's `heavy_lifting::Error` absorbs
/// `sd_task_system::TaskSystemError`.
#[derive(Debug, Error)]
pub enum TaskSystemError {
	#[error("task {0} is not tracked by this dispatcher")]
	TaskNotFound(TaskId),

	#[error("task dispatcher has been shut down")]
	Shutdown,

	#[error("task queue for stage {0:?} was not configured")]
	UnknownStage(String),
}

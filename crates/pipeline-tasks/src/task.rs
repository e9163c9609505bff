use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{interrupt::Interrupter, output::AnyTaskOutput};

/// Opaque handle identifying a dispatched task for the lifetime of the
/// process. Stable across re-prioritization, not across restarts.
pub type TaskId = Uuid;

/// What a task's `run` call produced.
pub enum ExecStatus {
	/// The task ran to completion and produced an erased output value.
	Done(Box<dyn AnyTaskOutput>),
	/// The task observed cancellation and stopped early.
	Canceled,
}

impl ExecStatus {
	#[must_use]
	pub fn is_canceled(&self) -> bool {
		matches!(self, Self::Canceled)
	}
}

impl fmt::Debug for ExecStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Done(_) => f.debug_tuple("Done").field(&"<erased output>").finish(),
			Self::Canceled => write!(f, "Canceled"),
		}
	}
}

/// A single, boxed unit of asynchronous work scheduled on one of a
/// [`TaskSystem`](crate::TaskSystem)'s named queues.
///
/// Implementors own their own state and should check `interrupter` at any
/// point where bailing out early is cheap and correct — nothing aborts a
/// task that ignores it.
#[async_trait]
pub trait Task<E>: fmt::Debug + Send + Sync + 'static
where
	E: std::error::Error + Send + Sync + 'static,
{
	fn id(&self) -> TaskId;

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E>;
}

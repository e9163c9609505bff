//! A small priority work-queue scheduler with cooperative cancellation.
//!
//! This crate knows nothing about images, caches, or network requests — it
//! schedules boxed async units of work ([`Task`]) onto named, bounded
//! concurrency queues, lets callers re-prioritize or cancel a dispatched
//! task through a [`TaskRemoteController`], and hands back results through a
//! [`TaskHandle`]. Domain orchestration (what a task does, what it means for
//! the caller) lives one layer up.

mod controller;
mod dispatcher;
mod error;
mod interrupt;
mod output;
mod priority;
mod queue;
mod system;
mod task;

pub use controller::TaskRemoteController;
pub use dispatcher::{BaseTaskDispatcher, TaskDispatcher, TaskHandle};
pub use error::TaskSystemError;
pub use interrupt::{InterruptionKind, Interrupter};
pub use output::{AnyTaskOutput, IntoAnyTaskOutput};
pub use priority::Priority;
pub use system::TaskSystem;
pub use task::{ExecStatus, Task, TaskId};

#[cfg(test)]
mod tests {
	use std::{
		sync::{
			atomic::{AtomicUsize, Ordering},
			Arc,
		},
		time::Duration,
	};

	use async_trait::async_trait;
	use thiserror::Error;

	use super::*;

	#[derive(Debug, Error)]
	enum TestError {
		#[error(transparent)]
		TaskSystem(#[from] TaskSystemError),
	}

	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	enum Stage {
		Work,
	}

	#[derive(Debug)]
	struct Counted(usize);
	impl AnyTaskOutput for Counted {}

	#[derive(Debug)]
	struct ReadyTask {
		id: TaskId,
	}

	impl ReadyTask {
		fn new() -> Self {
			Self { id: TaskId::new_v4() }
		}
	}

	#[async_trait]
	impl Task<TestError> for ReadyTask {
		fn id(&self) -> TaskId {
			self.id
		}

		async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, TestError> {
			Ok(ExecStatus::Done(Counted(1).into_output()))
		}
	}

	#[derive(Debug)]
	struct NeverTask {
		id: TaskId,
		ran: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl Task<TestError> for NeverTask {
		fn id(&self) -> TaskId {
			self.id
		}

		async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, TestError> {
			self.ran.fetch_add(1, Ordering::SeqCst);
			loop {
				crate::check_interruption!(interrupter);
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		}
	}

	#[tokio::test]
	async fn runs_a_ready_task_to_completion() {
		let system = TaskSystem::<Stage, TestError>::new([(Stage::Work, 2)]);
		let dispatcher = system.dispatcher();

		let handle = dispatcher
			.dispatch(Stage::Work, Priority::Normal, Box::new(ReadyTask::new()))
			.await
			.expect("dispatch");

		let status = handle.wait().await.expect("task result");
		match status {
			ExecStatus::Done(output) => {
				let counted = output.downcast::<Counted>().expect("downcast");
				assert_eq!(counted.0, 1);
			}
			ExecStatus::Canceled => panic!("expected completion"),
		}
	}

	#[tokio::test]
	async fn cancel_before_start_never_runs_the_task() {
		let system = TaskSystem::<Stage, TestError>::new([(Stage::Work, 1)]);
		let dispatcher = system.dispatcher();
		let ran = Arc::new(AtomicUsize::new(0));

		// occupy the single slot so the second dispatch stays pending
		let blocker = dispatcher
			.dispatch(Stage::Work, Priority::Normal, Box::new(NeverTask { id: TaskId::new_v4(), ran: Arc::clone(&ran) }))
			.await
			.expect("dispatch blocker");

		let pending = dispatcher
			.dispatch(
				Stage::Work,
				Priority::Normal,
				Box::new(NeverTask { id: TaskId::new_v4(), ran: Arc::clone(&ran) }),
			)
			.await
			.expect("dispatch pending");

		let _ = pending.cancel().await;
		let status = pending.wait().await.expect("task result");
		assert!(status.is_canceled());
		assert_eq!(ran.load(Ordering::SeqCst), 1, "only the blocker should have started");

		let _ = blocker.cancel().await;
	}

	#[tokio::test]
	async fn cancel_while_running_is_observed_by_check_interruption() {
		let system = TaskSystem::<Stage, TestError>::new([(Stage::Work, 1)]);
		let dispatcher = system.dispatcher();
		let ran = Arc::new(AtomicUsize::new(0));

		let handle = dispatcher
			.dispatch(Stage::Work, Priority::Normal, Box::new(NeverTask { id: TaskId::new_v4(), ran }))
			.await
			.expect("dispatch");

		tokio::time::sleep(Duration::from_millis(20)).await;
		let _ = handle.cancel().await;

		let status = handle.wait().await.expect("task result");
		assert!(status.is_canceled());
	}

	#[tokio::test]
	async fn higher_priority_pending_task_runs_first() {
		let system = TaskSystem::<Stage, TestError>::new([(Stage::Work, 1)]);
		let dispatcher = system.dispatcher();
		let ran = Arc::new(AtomicUsize::new(0));

		let blocker = dispatcher
			.dispatch(Stage::Work, Priority::Normal, Box::new(NeverTask { id: TaskId::new_v4(), ran: Arc::clone(&ran) }))
			.await
			.expect("dispatch blocker");

		let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

		#[derive(Debug)]
		struct OrderTask {
			id: TaskId,
			label: &'static str,
			order: Arc<tokio::sync::Mutex<Vec<&'static str>>>,
		}

		#[async_trait]
		impl Task<TestError> for OrderTask {
			fn id(&self) -> TaskId {
				self.id
			}

			async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, TestError> {
				self.order.lock().await.push(self.label);
				Ok(ExecStatus::Done(Counted(0).into_output()))
			}
		}

		let low = dispatcher
			.dispatch(
				Stage::Work,
				Priority::Low,
				Box::new(OrderTask { id: TaskId::new_v4(), label: "low", order: Arc::clone(&order) }),
			)
			.await
			.expect("dispatch low");
		let high = dispatcher
			.dispatch(
				Stage::Work,
				Priority::VeryHigh,
				Box::new(OrderTask { id: TaskId::new_v4(), label: "high", order: Arc::clone(&order) }),
			)
			.await
			.expect("dispatch high");

		let _ = blocker.cancel().await;
		low.wait().await.expect("low result");
		high.wait().await.expect("high result");

		assert_eq!(*order.lock().await, vec!["high", "low"]);
	}
}

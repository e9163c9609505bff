use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use tokio::sync::Notify;

/// Why a [`Task::run`](crate::Task::run) call returned early.
///
/// Only one kind exists today — a task cannot be paused, only canceled — but
/// the type stays distinct from a plain `bool` so a future interruption kind
/// doesn't become a breaking change for task authors matching on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionKind {
	Canceled,
}

/// Cooperative cancellation signal handed to a running [`Task`](crate::Task).
///
/// A task should check `is_canceled()` (or await `cancelled()`) at any point
/// where it can cheaply stop, and return `Ok(ExecStatus::Canceled)` when it
/// does. Nothing forces a task to look at this — cancellation here is
/// advisory, not preemptive.
#[derive(Debug, Clone)]
pub struct Interrupter {
	canceled: Arc<AtomicBool>,
	notify: Arc<Notify>,
}

impl Interrupter {
	pub(crate) fn new() -> (Self, InterruptHandle) {
		let canceled = Arc::new(AtomicBool::new(false));
		let notify = Arc::new(Notify::new());

		(
			Self {
				canceled: Arc::clone(&canceled),
				notify: Arc::clone(&notify),
			},
			InterruptHandle { canceled, notify },
		)
	}

	/// Non-blocking check, suitable for `check_interruption!` at the top of a
	/// work loop.
	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.canceled.load(Ordering::Acquire)
	}

	/// Resolves as soon as the task is canceled. A task awaiting its own work
	/// future alongside this (e.g. via `futures_concurrency`'s `.race()`) can
	/// bail out promptly instead of polling.
	pub async fn cancelled(&self) -> InterruptionKind {
		if self.is_canceled() {
			return InterruptionKind::Canceled;
		}
		self.notify.notified().await;
		InterruptionKind::Canceled
	}
}

/// The dispatcher-side twin of [`Interrupter`], used to actually signal
/// cancellation. Never exposed to task authors.
#[derive(Debug)]
pub(crate) struct InterruptHandle {
	canceled: Arc<AtomicBool>,
	notify: Arc<Notify>,
}

impl InterruptHandle {
	pub(crate) fn cancel(&self) {
		self.canceled.store(true, Ordering::Release);
		self.notify.notify_waiters();
	}

	pub(crate) fn is_canceled(&self) -> bool {
		self.canceled.load(Ordering::Acquire)
	}
}

/// Returns `Ok(ExecStatus::Canceled)` from the enclosing `run` if the
/// interrupter has fired. Mirrors the check-and-bail idiom used throughout
/// the donor's blocking task bodies.
#[macro_export]
macro_rules! check_interruption {
	($interrupter:expr) => {
		if $interrupter.is_canceled() {
			return Ok($crate::ExecStatus::Canceled);
		}
	};
}

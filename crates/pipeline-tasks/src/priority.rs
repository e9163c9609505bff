use std::sync::atomic::{AtomicU8, Ordering};

/// Scheduling priority for a queued operation.
///
/// Ordered `VeryLow < Low < Normal < High < VeryHigh`; queues always prefer
/// to run the highest-priority pending entry next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
	VeryLow = 0,
	Low = 1,
	Normal = 2,
	High = 3,
	VeryHigh = 4,
}

impl Default for Priority {
	fn default() -> Self {
		Self::Normal
	}
}

impl Priority {
	fn from_u8(raw: u8) -> Self {
		match raw {
			0 => Self::VeryLow,
			1 => Self::Low,
			2 => Self::Normal,
			3 => Self::High,
			_ => Self::VeryHigh,
		}
	}
}

/// A priority cell shared between a queue entry and the [`TaskRemoteController`](crate::TaskRemoteController)
/// handed back to the caller, so that re-prioritizing a pending operation is a
/// single atomic store rather than a queue traversal.
#[derive(Debug)]
pub(crate) struct SharedPriority(AtomicU8);

impl SharedPriority {
	pub(crate) fn new(priority: Priority) -> Self {
		Self(AtomicU8::new(priority as u8))
	}

	pub(crate) fn get(&self) -> Priority {
		Priority::from_u8(self.0.load(Ordering::Acquire))
	}

	pub(crate) fn set(&self, priority: Priority) {
		self.0.store(priority as u8, Ordering::Release);
	}
}

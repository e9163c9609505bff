use std::fmt;

use downcast_rs::{impl_downcast, DowncastSync};

/// Type-erased result of a completed [`Task`](crate::Task).
///
/// A queue only knows how to schedule and cancel work, not what that work
/// produces, so completed outputs travel as `Box<dyn AnyTaskOutput>` and get
/// downcast back to a concrete type by the caller that dispatched the task.
pub trait AnyTaskOutput: DowncastSync + fmt::Debug {}
impl_downcast!(sync AnyTaskOutput);

/// Lifts a concrete output value into its erased form.
pub trait IntoAnyTaskOutput {
	fn into_output(self) -> Box<dyn AnyTaskOutput>;
}

impl<T> IntoAnyTaskOutput for T
where
	T: AnyTaskOutput + Sized,
{
	fn into_output(self) -> Box<dyn AnyTaskOutput> {
		Box::new(self)
	}
}

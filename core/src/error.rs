use std::sync::Arc;

use thiserror::Error;

use crate::request::ProcessorId;

/// Every way a subtask (and therefore every subscriber attached to it) can
/// terminate without succeeding.
///
/// A failure in a dependency surfaces unchanged through every dependent —
/// nothing here wraps or re-contextualizes an upstream error, matching the
/// propagation rule that a dependent's failure IS its dependency's failure.
#[derive(Debug, Error, Clone)]
pub enum Error {
	#[error("data missing in cache")]
	DataMissingInCache,

	#[error("data loading failed: {0}")]
	DataLoadingFailed(Arc<str>),

	#[error("data is empty")]
	DataIsEmpty,

	#[error("no decoder registered for context {0}")]
	DecoderNotRegistered(String),

	#[error("decoding failed in decoder {decoder} for context {context}: {underlying}")]
	DecodingFailed {
		decoder: String,
		context: String,
		underlying: Arc<str>,
	},

	#[error("processing failed in processor {processor:?} for context {context}: {underlying}")]
	ProcessingFailed {
		processor: ProcessorId,
		context: String,
		underlying: Arc<str>,
	},

	#[error("pipeline has been invalidated")]
	PipelineInvalidated,

	#[error("cancelled")]
	Cancelled,

	#[error(transparent)]
	TaskSystem(#[from] pipeline_tasks::TaskSystemError),
}

impl Error {
	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

/// The four bounded work queues of §4.4, keyed by name for
/// [`pipeline_tasks::TaskSystem`].
///
/// `Decompressing` is "optional" per spec in the sense that a pipeline may
/// have `is_decompression_enabled = false` and never dispatch onto it — the
/// queue itself is always created, just possibly unused, which keeps the
/// stage set a fixed, closed enum rather than an `Option`-shaped one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
	DataLoading,
	Decoding,
	Processing,
	Decompressing,
}

impl Stage {
	#[must_use]
	pub(crate) fn all_with_concurrency(config: &crate::config::PipelineConfig) -> [(Self, usize); 4] {
		[
			(Self::DataLoading, config.data_loading_queue_concurrency),
			(Self::Decoding, config.image_decoding_queue_concurrency),
			(Self::Processing, config.image_processing_queue_concurrency),
			(Self::Decompressing, config.image_decompressing_queue_concurrency),
		]
	}
}

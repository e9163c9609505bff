use std::sync::Arc;

use crate::{
	cache::ByteCache, cache::MemoryImageCache, decode::DecoderRegistry, decode::Decompressor, encode::ImageEncoder,
	loader::DataLoader,
};

/// Governs what gets written to the disk (byte) cache after a successful
/// fetch. See the table in §4.3 for the exact without-processors /
/// with-processors semantics of each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataCachePolicy {
	#[default]
	Automatic,
	StoreAll,
	StoreOriginalData,
	StoreEncodedImages,
}

/// Everything a [`Pipeline`](crate::Pipeline) needs that isn't carried on a
/// per-request basis. Passed once into the constructor — there is no
/// process-wide singleton configuration here.
#[derive(Clone)]
pub struct PipelineConfig {
	pub data_cache: Option<Arc<dyn ByteCache>>,
	pub image_cache: Option<Arc<dyn MemoryImageCache>>,
	pub data_loader: Arc<dyn DataLoader>,
	pub decoders: DecoderRegistry,
	pub decompressor: Option<Arc<dyn Decompressor>>,
	pub image_encoder: Option<Arc<dyn ImageEncoder>>,

	pub data_cache_policy: DataCachePolicy,
	pub is_progressive_decoding_enabled: bool,
	pub is_storing_previews_in_memory_cache: bool,
	pub progressive_decoding_interval: std::time::Duration,
	pub is_resumable_data_enabled: bool,
	pub is_decompression_enabled: bool,
	pub is_rate_limiter_enabled: bool,
	pub is_task_coalescing_enabled: bool,

	pub data_loading_queue_concurrency: usize,
	pub image_decoding_queue_concurrency: usize,
	pub image_processing_queue_concurrency: usize,
	pub image_decompressing_queue_concurrency: usize,

	pub rate_limiter_capacity: u32,
	pub rate_limiter_refill_per_second: u32,
}

impl PipelineConfig {
	#[must_use]
	pub fn new(data_loader: Arc<dyn DataLoader>, decoders: DecoderRegistry) -> Self {
		Self {
			data_cache: None,
			image_cache: None,
			data_loader,
			decoders,
			decompressor: None,
			image_encoder: None,
			data_cache_policy: DataCachePolicy::default(),
			is_progressive_decoding_enabled: true,
			is_storing_previews_in_memory_cache: false,
			progressive_decoding_interval: std::time::Duration::ZERO,
			is_resumable_data_enabled: true,
			is_decompression_enabled: true,
			is_rate_limiter_enabled: true,
			is_task_coalescing_enabled: true,
			data_loading_queue_concurrency: 6,
			image_decoding_queue_concurrency: 1,
			image_processing_queue_concurrency: 2,
			image_decompressing_queue_concurrency: 2,
			rate_limiter_capacity: 80,
			rate_limiter_refill_per_second: 25,
		}
	}

	#[must_use]
	pub fn with_data_cache(mut self, cache: Arc<dyn ByteCache>) -> Self {
		self.data_cache = Some(cache);
		self
	}

	#[must_use]
	pub fn with_image_cache(mut self, cache: Arc<dyn MemoryImageCache>) -> Self {
		self.image_cache = Some(cache);
		self
	}

	#[must_use]
	pub fn with_data_cache_policy(mut self, policy: DataCachePolicy) -> Self {
		self.data_cache_policy = policy;
		self
	}

	#[must_use]
	pub fn with_decompressor(mut self, decompressor: Arc<dyn Decompressor>) -> Self {
		self.decompressor = Some(decompressor);
		self
	}

	#[must_use]
	pub fn with_image_encoder(mut self, encoder: Arc<dyn ImageEncoder>) -> Self {
		self.image_encoder = Some(encoder);
		self
	}
}

//! Request-deduplicating, priority-propagating, cancellable image loading
//! pipeline.
//!
//! [`Pipeline`] is the single entry point: construct one from a
//! [`PipelineConfig`], then call [`Pipeline::image_task`] or
//! [`Pipeline::data_task`] per request. Internally every request walks a
//! five-stage chain — memory-cache lookup, disk-cache lookup, network
//! fetch, decode, process — coalescing with any other in-flight request
//! that would do the same work, and propagating priority/cancellation
//! between coalesced callers (see [`registry`]).

mod cache;
mod config;
mod container;
mod decode;
mod encode;
mod error;
mod facade;
mod keys;
mod loader;
mod metrics;
mod process;
mod rate_limiter;
mod registry;
mod request;
mod resumable;
mod stage;
mod tasks;

use std::sync::Arc;

use pipeline_tasks::TaskSystem;

pub use cache::{ByteCache, CacheTiers, DataCacheWritePlan, MemoryImageCache};
pub use config::{DataCachePolicy, PipelineConfig};
pub use container::{CacheType, DecodedImage, ImageContainer, ImageResponse};
pub use decode::{Decoder, DecoderRegistry, DecodingContext, Decompressor};
pub use encode::ImageEncoder;
pub use error::Error;
pub use facade::{DataTask, ImageTask, ProgressUpdate};
pub use loader::{DataLoader, LoadChunk, LoadOutcome, LoadRequest, ResponseMetadata};
pub use metrics::{PipelineMetrics, PipelineMetricsSnapshot};
pub use pipeline_tasks::Priority;
pub use process::{ProcessingContext, Processor};
pub use request::{
	ContentMode, ProcessorId, ProcessorSpec, Request, RequestOptions, RequestSource, ThumbnailOptions, ThumbnailSize,
};

use crate::{registry::Coordinator, stage::Stage};

/// Owns the four bounded work queues and the subtask registry for one
/// configured pipeline. Cheap to clone via [`Arc`] if callers need to share
/// it across threads; every method takes `&self`.
pub struct Pipeline {
	task_system: TaskSystem<Stage, Error>,
	coordinator: Arc<Coordinator>,
}

impl Pipeline {
	#[must_use]
	pub fn new(config: PipelineConfig) -> Arc<Self> {
		let task_system = TaskSystem::new(Stage::all_with_concurrency(&config));
		let dispatcher = task_system.dispatcher();
		let coordinator = Coordinator::new(config, dispatcher);
		Arc::new(Self { task_system, coordinator })
	}

	/// Requests a fully decoded, processed image (§3). Checks the full-key
	/// memory cache first; on a miss, attaches to (or starts) the subtask
	/// chain for this request's processor pipeline.
	pub async fn image_task(&self, request: Request) -> ImageTask {
		ImageTask::new(Arc::clone(&self.coordinator), request).await
	}

	/// Requests just the original bytes, bypassing decode/process entirely.
	pub async fn data_task(&self, request: Request) -> DataTask {
		DataTask::new(Arc::clone(&self.coordinator), request).await
	}

	/// Tears down every live subtask with `pipelineInvalidated` and rejects
	/// all future attaches the same way (§5). Irreversible.
	pub async fn invalidate(&self) {
		self.coordinator.invalidate().await;
	}

	#[must_use]
	pub fn metrics(&self) -> PipelineMetricsSnapshot {
		self.coordinator.metrics().snapshot()
	}

	pub async fn contains_cached_image(&self, request: &Request) -> bool {
		self.coordinator.cache.contains_cached_image(request).await
	}

	pub async fn contains_cached_data(&self, request: &Request) -> bool {
		self.coordinator.cache.contains_cached_data(request).await
	}

	pub async fn remove_cached_image(&self, request: &Request) {
		self.coordinator.cache.remove_cached_image(request).await;
	}

	pub async fn remove_cached_data(&self, request: &Request) {
		self.coordinator.cache.remove_cached_data(request).await;
	}

	pub async fn remove_all_cached(&self) {
		self.coordinator.cache.remove_all().await;
	}

	/// Cancels every outstanding task across all four queues and invalidates
	/// the pipeline. Intended for process shutdown — there is no way to
	/// un-invalidate a pipeline afterwards.
	pub async fn shutdown(&self) -> Result<(), Error> {
		self.coordinator.invalidate().await;
		self.task_system.shutdown().await?;
		Ok(())
	}
}

//! [`pipeline_tasks::Task`] wrappers for the work actually dispatched onto
//! each of the four queues. These are deliberately thin: all coordination
//! (dependency awaiting, cache writes, subtask bookkeeping) lives in
//! [`crate::registry::driver`], which dispatches these and interprets their
//! erased output. A task itself only knows how to do its one unit of work
//! and report what happened — it never touches the subtask registry.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use pipeline_tasks::{check_interruption, AnyTaskOutput, ExecStatus, Interrupter, Task, TaskId};
use uuid::Uuid;

use crate::{
	container::ImageContainer,
	decode::{DecodingContext, Decompressor},
	decode::{Decoder, DecoderRegistry},
	error::Error,
	loader::{DataLoader, LoadChunk, LoadOutcome, LoadRequest, ResponseMetadata},
	process::{Processor, ProcessingContext},
	registry::subtask::Subtask,
	request::{ProcessorId, Request, RequestSource},
	resumable::ResumableDataStore,
};

impl AnyTaskOutput for ImageContainer {}

/// What a [`DataLoadTask`] produced. `Recoverable` means bytes were
/// retained by the resumable-data store (§4.7) and the driver should retry
/// with a fresh task rather than surface a user-visible error (§7).
#[derive(Debug)]
pub(crate) enum DataLoadOutcome {
	Success {
		bytes: Bytes,
		response: Option<ResponseMetadata>,
	},
	Recoverable,
	Failed(Arc<str>),
}
impl AnyTaskOutput for DataLoadOutcome {}

pub(crate) struct DataLoadTask {
	id: TaskId,
	subtask: Arc<Subtask>,
	request: Request,
	loader: Arc<dyn DataLoader>,
	rate_limiter: Option<Arc<dyn RateLimiterLike>>,
	resumable: Arc<ResumableDataStore>,
}

/// Narrow view of [`crate::rate_limiter::RateLimiter`] so this module
/// doesn't need to know its concrete type — kept as a trait purely to
/// avoid a dependency cycle in file layout, not a pluggability point.
#[async_trait]
pub(crate) trait RateLimiterLike: Send + Sync {
	async fn acquire(&self);
}

#[async_trait]
impl RateLimiterLike for crate::rate_limiter::RateLimiter {
	async fn acquire(&self) {
		crate::rate_limiter::RateLimiter::acquire(self).await;
	}
}

impl fmt::Debug for DataLoadTask {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DataLoadTask").field("id", &self.id).finish()
	}
}

impl DataLoadTask {
	pub(crate) fn new(
		subtask: Arc<Subtask>,
		request: Request,
		loader: Arc<dyn DataLoader>,
		rate_limiter: Option<Arc<dyn RateLimiterLike>>,
		resumable: Arc<ResumableDataStore>,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			subtask,
			request,
			loader,
			rate_limiter,
			resumable,
		}
	}
}

#[async_trait]
impl Task<Error> for DataLoadTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		check_interruption!(interrupter);

		if !self.request.options.skip_data_loading_queue {
			if let Some(limiter) = &self.rate_limiter {
				limiter.acquire().await;
			}
		}
		check_interruption!(interrupter);

		let load_key = self.request.source.load_key().to_string();
		let resume = self.resumable.resume_point(&load_key);
		let headers = match &self.request.source {
			RequestSource::UrlRequest { headers, .. } => Arc::clone(headers),
			_ => Arc::new(HashMap::new()),
		};
		let load_request = LoadRequest {
			load_key: Arc::from(load_key.as_str()),
			headers,
			resume: resume.clone(),
		};

		let (tx, rx) = async_channel::bounded::<LoadChunk>(64);
		let loader = Arc::clone(&self.loader);
		let load_request_for_spawn = load_request.clone();
		let load_handle = tokio::spawn(async move { loader.load(&load_request_for_spawn, tx).await });

		let mut buffer = BytesMut::new();
		let mut response_meta: Option<ResponseMetadata> = None;
		let mut received: u64 = resume.as_ref().map_or(0, |(offset, _)| *offset);
		let mut total_hint: Option<u64> = None;

		loop {
			if interrupter.is_canceled() {
				load_handle.abort();
				return Ok(ExecStatus::Canceled);
			}
			match rx.recv().await {
				Ok(chunk) => {
					if let Some(resp) = chunk.response {
						total_hint = resp.expected_content_length;
						response_meta = Some(resp);
					}
					buffer.extend_from_slice(&chunk.bytes);
					received += chunk.bytes.len() as u64;
					self.subtask.emit_progress(received, total_hint);
					self.subtask.publish_partial_bytes(buffer.clone().freeze());
				}
				Err(_closed) => break,
			}
		}

		let outcome = load_handle
			.await
			.unwrap_or(LoadOutcome::Failed(Arc::from("data loader task panicked")));

		match outcome {
			LoadOutcome::Completed => {
				let bytes = buffer.freeze();
				let full_bytes = match &resume {
					Some(_) => self.resumable.take_and_extend(&load_key, &bytes).unwrap_or(bytes),
					None => bytes,
				};
				self.resumable.clear(&load_key);
				Ok(ExecStatus::Done(Box::new(DataLoadOutcome::Success {
					bytes: full_bytes,
					response: response_meta,
				})))
			}
			LoadOutcome::Failed(underlying) => {
				let recoverable = response_meta.as_ref().is_some_and(|resp| resp.accepts_byte_ranges)
					&& response_meta.as_ref().and_then(ResponseMetadata::validator).is_some()
					&& !buffer.is_empty();
				if recoverable {
					let validator = response_meta.as_ref().and_then(ResponseMetadata::validator).expect("checked above");
					self.resumable.retain(&load_key, validator, buffer.freeze());
					Ok(ExecStatus::Done(Box::new(DataLoadOutcome::Recoverable)))
				} else {
					Ok(ExecStatus::Done(Box::new(DataLoadOutcome::Failed(underlying))))
				}
			}
		}
	}
}

/// What a [`DecodeTask`] produced.
#[derive(Debug)]
pub(crate) enum DecodeOutcome {
	Success {
		bytes: Bytes,
		response: Option<ResponseMetadata>,
		container: ImageContainer,
	},
	Failed(Error),
}
impl AnyTaskOutput for DecodeOutcome {}

pub(crate) struct DecodeTask {
	id: TaskId,
	subtask: Arc<Subtask>,
	dependency: Arc<Subtask>,
	request: Request,
	decoders: DecoderRegistry,
	is_progressive: bool,
	progressive_interval: std::time::Duration,
	is_storing_previews_in_memory_cache: bool,
	cache: crate::cache::Cache,
}

impl fmt::Debug for DecodeTask {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DecodeTask").field("id", &self.id).finish()
	}
}

impl DecodeTask {
	#[allow(clippy::too_many_arguments)]
	pub(crate) fn new(
		subtask: Arc<Subtask>,
		dependency: Arc<Subtask>,
		request: Request,
		decoders: DecoderRegistry,
		is_progressive: bool,
		progressive_interval: std::time::Duration,
		is_storing_previews_in_memory_cache: bool,
		cache: crate::cache::Cache,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			subtask,
			dependency,
			request,
			decoders,
			is_progressive,
			progressive_interval,
			is_storing_previews_in_memory_cache,
			cache,
		}
	}

	async fn apply_processors_to_preview(&self, container: ImageContainer) -> ImageContainer {
		let ctx = ProcessingContext {
			scale: self.request.scale,
		};
		let mut current = container;
		for spec in self.request.processors.iter() {
			match spec.processor.process(&current, &ctx).await {
				Ok(Some(next)) => current = next,
				Ok(None) => {
					tracing::warn!(processor = %spec.id, "processor returned no image for a preview, using last good preview");
					break;
				}
				Err(underlying) => {
					tracing::warn!(processor = %spec.id, %underlying, "processor failed on a preview, using last good preview");
					break;
				}
			}
		}
		current.is_preview = true;
		current
	}
}

#[async_trait]
impl Task<Error> for DecodeTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		use crate::registry::subtask::{SubtaskEvent, SubtaskOutput};
		use tokio::sync::broadcast::error::RecvError;

		check_interruption!(interrupter);

		let mut rx = self.dependency.subscribe_events();
		let mut terminal = self.dependency.terminal_replay();
		let mut decoder: Option<Box<dyn Decoder>> = None;
		let mut last_preview_at: Option<tokio::time::Instant> = None;

		while terminal.is_none() {
			if interrupter.is_canceled() {
				return Ok(ExecStatus::Canceled);
			}
			match rx.recv().await {
				Ok(SubtaskEvent::Progress { completed, total }) => {
					self.subtask.emit_progress(completed, total);
					if self.is_progressive {
						let now = tokio::time::Instant::now();
						let due = last_preview_at
							.map_or(true, |at| now.duration_since(at) >= self.progressive_interval);
						if due {
							let snapshot = self.dependency.subscribe_partial_bytes().borrow().clone();
							if !snapshot.is_empty() {
								let ctx = DecodingContext {
									response: None,
									is_completed: false,
									thumbnail: self.request.thumbnail,
								};
								if decoder.is_none() {
									decoder = self.decoders.make_decoder(&snapshot, &ctx);
								}
								if let Some(dec) = decoder.as_mut() {
									match dec.decode(&snapshot, false) {
										Ok(Some(container)) => {
											last_preview_at = Some(now);
											let processed = self.apply_processors_to_preview(container).await;
											self.subtask.emit_preview(processed.clone());
											if self.is_storing_previews_in_memory_cache {
												self.cache
													.store_cached_image(
														&processed,
														&self.request,
														crate::cache::CacheTiers::MEMORY_ONLY,
													)
													.await;
											}
										}
										Ok(None) => {}
										Err(underlying) => {
											tracing::warn!(decoder = dec.name(), %underlying, "partial decode failed, skipping partial");
										}
									}
								}
							}
						}
					}
				}
				Ok(SubtaskEvent::Preview(_)) => {}
				Ok(SubtaskEvent::Terminal(result)) => terminal = Some(result),
				Err(RecvError::Lagged(_)) => continue,
				Err(RecvError::Closed) => terminal = Some(Err(Error::Cancelled)),
			}
		}

		let (bytes, response) = match terminal.expect("loop only exits once terminal is Some") {
			Ok(SubtaskOutput::Data { bytes, response }) => (bytes, response),
			Ok(SubtaskOutput::Image(_)) => unreachable!("FetchOriginalData always yields Data"),
			Err(err) => return Ok(ExecStatus::Done(Box::new(DecodeOutcome::Failed(err)))),
		};

		if bytes.is_empty() {
			return Ok(ExecStatus::Done(Box::new(DecodeOutcome::Failed(Error::DataIsEmpty))));
		}

		check_interruption!(interrupter);

		let ctx = DecodingContext {
			response: response.clone(),
			is_completed: true,
			thumbnail: self.request.thumbnail,
		};
		let mut final_decoder = match decoder {
			Some(decoder) => decoder,
			None => match self.decoders.make_decoder(&bytes, &ctx) {
				Some(decoder) => decoder,
				None => {
					return Ok(ExecStatus::Done(Box::new(DecodeOutcome::Failed(Error::DecoderNotRegistered(
						format!("{ctx:?}"),
					)))));
				}
			},
		};

		match final_decoder.decode(&bytes, true) {
			Ok(Some(container)) => Ok(ExecStatus::Done(Box::new(DecodeOutcome::Success {
				bytes,
				response,
				container,
			}))),
			Ok(None) => Ok(ExecStatus::Done(Box::new(DecodeOutcome::Failed(Error::DecodingFailed {
				decoder: final_decoder.name().to_string(),
				context: format!("{ctx:?}"),
				underlying: Arc::from("decoder produced no final image"),
			})))),
			Err(underlying) => Ok(ExecStatus::Done(Box::new(DecodeOutcome::Failed(Error::DecodingFailed {
				decoder: final_decoder.name().to_string(),
				context: format!("{ctx:?}"),
				underlying,
			})))),
		}
	}
}

/// What a [`ProcessTask`] produced.
#[derive(Debug)]
pub(crate) enum ProcessOutcome {
	Success(ImageContainer),
	Failed(Error),
}
impl AnyTaskOutput for ProcessOutcome {}

pub(crate) struct ProcessTask {
	id: TaskId,
	processor_id: ProcessorId,
	processor: Arc<dyn Processor>,
	container: ImageContainer,
	scale: Option<f64>,
	is_final: bool,
	encoder: Option<Arc<dyn crate::encode::ImageEncoder>>,
}

impl fmt::Debug for ProcessTask {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProcessTask")
			.field("id", &self.id)
			.field("processor_id", &self.processor_id)
			.finish()
	}
}

impl ProcessTask {
	pub(crate) fn new(
		processor_id: ProcessorId,
		processor: Arc<dyn Processor>,
		container: ImageContainer,
		scale: Option<f64>,
		is_final: bool,
		encoder: Option<Arc<dyn crate::encode::ImageEncoder>>,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			processor_id,
			processor,
			container,
			scale,
			is_final,
			encoder,
		}
	}
}

#[async_trait]
impl Task<Error> for ProcessTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		check_interruption!(interrupter);
		let ctx = ProcessingContext { scale: self.scale };
		match self.processor.process(&self.container, &ctx).await {
			Ok(Some(mut output)) => {
				output.is_preview = false;
				if self.is_final && output.data.is_none() {
					if let Some(encoder) = &self.encoder {
						output.data = encoder.encode(&output);
					}
				}
				Ok(ExecStatus::Done(Box::new(ProcessOutcome::Success(output))))
			}
			Ok(None) => Ok(ExecStatus::Done(Box::new(ProcessOutcome::Failed(Error::ProcessingFailed {
				processor: self.processor_id.clone(),
				context: format!("{:?}", self.processor_id),
				underlying: Arc::from("processor returned no image"),
			})))),
			Err(underlying) => Ok(ExecStatus::Done(Box::new(ProcessOutcome::Failed(Error::ProcessingFailed {
				processor: self.processor_id.clone(),
				context: format!("{:?}", self.processor_id),
				underlying,
			})))),
		}
	}
}

pub(crate) struct DecompressTask {
	id: TaskId,
	container: Option<ImageContainer>,
	decompressor: Arc<dyn Decompressor>,
}

impl fmt::Debug for DecompressTask {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DecompressTask").field("id", &self.id).finish()
	}
}

impl DecompressTask {
	pub(crate) fn new(container: ImageContainer, decompressor: Arc<dyn Decompressor>) -> Self {
		Self {
			id: Uuid::new_v4(),
			container: Some(container),
			decompressor,
		}
	}
}

#[async_trait]
impl Task<Error> for DecompressTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		check_interruption!(interrupter);
		let container = self.container.take().expect("DecompressTask::run called once");
		let decompressed = self.decompressor.decompress(container);
		Ok(ExecStatus::Done(Box::new(decompressed)))
	}
}

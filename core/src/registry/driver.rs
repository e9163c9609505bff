//! The actual work a subtask does once [`super::Coordinator::ensure_subtask`]
//! has spawned it: fetch bytes, decode them, run a processor, maybe
//! decompress. Each `run_fetch_*` function owns exactly one [`Subtask`] for
//! its whole lifetime and is the only writer of its terminal result.

use std::sync::Arc;

use pipeline_tasks::{ExecStatus, Priority, TaskDispatcher};
use tokio::sync::broadcast::error::RecvError;

use super::{Coordinator, Subtask};
use crate::{
	cache::CacheTiers,
	error::Error,
	registry::subtask::{SubtaskEvent, SubtaskOutput},
	request::Request,
	stage::Stage,
	tasks::{
		DataLoadOutcome, DataLoadTask, DecodeOutcome, DecodeTask, DecompressTask, ProcessOutcome, ProcessTask,
		RateLimiterLike,
	},
};

/// A resumable load is retried this many times before being surfaced as a
/// hard failure — guards against a server that keeps dropping the
/// connection every time regardless of `Range`/`If-Range`.
const MAX_RESUMABLE_ATTEMPTS: u32 = 5;

pub(crate) async fn run_fetch_original(coordinator: Arc<Coordinator>, subtask: Arc<Subtask>, request: Request) {
	subtask.mark_running();

	let disk_probe_allowed = !request.options.reload_ignoring_cached_data && !request.options.disable_disk_cache_reads;
	if disk_probe_allowed {
		if let Some(bytes) = coordinator.cache.cached_data(&request).await {
			coordinator.metrics().record_disk_hit();
			subtask.emit_terminal(Ok(SubtaskOutput::Data { bytes, response: None }));
			return;
		}
		coordinator.metrics().record_disk_miss();
	}

	if request.options.return_cache_data_dont_load {
		subtask.emit_terminal(Err(Error::DataMissingInCache));
		return;
	}

	let loader = request
		.source
		.custom_loader()
		.cloned()
		.unwrap_or_else(|| Arc::clone(&coordinator.config.data_loader));
	let rate_limiter = coordinator
		.rate_limiter
		.clone()
		.map(|limiter| limiter as Arc<dyn RateLimiterLike>);

	for attempt in 0..MAX_RESUMABLE_ATTEMPTS {
		let task = DataLoadTask::new(
			Arc::clone(&subtask),
			request.clone(),
			Arc::clone(&loader),
			rate_limiter.clone(),
			Arc::clone(&coordinator.resumable),
		);

		let handle = match coordinator
			.dispatcher
			.dispatch(Stage::DataLoading, subtask.current_priority(), Box::new(task))
			.await
		{
			Ok(handle) => handle,
			Err(err) => {
				subtask.emit_terminal(Err(Error::from(err)));
				return;
			}
		};
		subtask.attach_controller(handle.remote_controller());
		subtask.apply_priority_to_controller(subtask.current_priority());

		match handle.wait().await {
			Err(err) => {
				subtask.emit_terminal(Err(err));
				return;
			}
			Ok(ExecStatus::Canceled) => {
				subtask.emit_terminal(Err(Error::Cancelled));
				return;
			}
			Ok(ExecStatus::Done(output)) => {
				let outcome = *output.downcast::<DataLoadOutcome>().expect("DataLoadTask yields DataLoadOutcome");
				match outcome {
					DataLoadOutcome::Success { bytes, response } => {
						coordinator.metrics().record_network_fetch();
						coordinator.cache.write_back_original(&request, &bytes).await;
						subtask.emit_terminal(Ok(SubtaskOutput::Data { bytes, response }));
						return;
					}
					DataLoadOutcome::Recoverable => {
						tracing::debug!(key = %subtask.key, attempt, "resumable load dropped, retrying");
						continue;
					}
					DataLoadOutcome::Failed(underlying) => {
						subtask.emit_terminal(Err(Error::DataLoadingFailed(underlying)));
						return;
					}
				}
			}
		}
	}

	subtask.emit_terminal(Err(Error::DataLoadingFailed(Arc::from(
		"exceeded maximum resumable load attempts",
	))));
}

pub(crate) async fn run_fetch_decoded(
	coordinator: Arc<Coordinator>,
	subtask: Arc<Subtask>,
	dependency: Arc<Subtask>,
	request: Request,
) {
	subtask.mark_running();

	let task = DecodeTask::new(
		Arc::clone(&subtask),
		dependency,
		request.clone(),
		coordinator.config.decoders.clone(),
		coordinator.config.is_progressive_decoding_enabled,
		coordinator.config.progressive_decoding_interval,
		coordinator.config.is_storing_previews_in_memory_cache,
		coordinator.cache.clone(),
	);

	let handle = match coordinator
		.dispatcher
		.dispatch(Stage::Decoding, subtask.current_priority(), Box::new(task))
		.await
	{
		Ok(handle) => handle,
		Err(err) => {
			subtask.emit_terminal(Err(Error::from(err)));
			return;
		}
	};
	subtask.attach_controller(handle.remote_controller());
	subtask.apply_priority_to_controller(subtask.current_priority());

	match handle.wait().await {
		Err(err) => subtask.emit_terminal(Err(err)),
		Ok(ExecStatus::Canceled) => subtask.emit_terminal(Err(Error::Cancelled)),
		Ok(ExecStatus::Done(output)) => {
			let outcome = *output.downcast::<DecodeOutcome>().expect("DecodeTask yields DecodeOutcome");
			match outcome {
				DecodeOutcome::Success { container, .. } => {
					coordinator
						.cache
						.store_cached_image(&container, &request, CacheTiers::MEMORY_ONLY)
						.await;
					// `storeEncodedImages` without processors wants the decoded original
					// re-encoded, not the raw bytes `run_fetch_original` wrote (or, under
					// this policy, deliberately didn't). This is the only point in the
					// chain with both a decoded container and the knowledge that no
					// processor chain follows.
					if request.processors.is_empty() {
						if let Some(encoder) = &coordinator.config.image_encoder {
							coordinator
								.cache
								.write_back_original_encoded(&request, &container, encoder.as_ref())
								.await;
						}
					}
					subtask.emit_terminal(Ok(SubtaskOutput::Image(container)));
				}
				DecodeOutcome::Failed(err) => subtask.emit_terminal(Err(err)),
			}
		}
	}
}

pub(crate) async fn run_fetch_processed(
	coordinator: Arc<Coordinator>,
	subtask: Arc<Subtask>,
	dependency: Arc<Subtask>,
	n: usize,
	request: Request,
) {
	subtask.mark_running();

	let dependency_result = await_dependency(&subtask, &dependency).await;
	let container = match dependency_result {
		Ok(SubtaskOutput::Image(container)) => container,
		Ok(SubtaskOutput::Data { .. }) => unreachable!("FetchProcessedImage's dependency always yields an image"),
		Err(err) => {
			subtask.emit_terminal(Err(err));
			return;
		}
	};

	let Some(spec) = request.processors.get(n - 1) else {
		subtask.emit_terminal(Err(Error::ProcessingFailed {
			processor: crate::request::ProcessorId::from(""),
			context: format!("n={n}"),
			underlying: Arc::from("processor chain shorter than requested prefix"),
		}));
		return;
	};
	let is_final = n == request.processors.len();

	// Only worth re-encoding the final image if something will actually
	// persist the bytes: no disk cache configured, or the policy's write
	// plan (§4.3 table) doesn't call for storing a processed image at all.
	let write_plan = coordinator.config.data_cache_policy.write_plan(!request.processors.is_empty());
	let encoder = if is_final && coordinator.config.data_cache.is_some() && write_plan.store_processed {
		coordinator.config.image_encoder.clone()
	} else {
		None
	};

	let task = ProcessTask::new(spec.id.clone(), Arc::clone(&spec.processor), container, request.scale, is_final, encoder);

	let handle = match coordinator
		.dispatcher
		.dispatch(Stage::Processing, subtask.current_priority(), Box::new(task))
		.await
	{
		Ok(handle) => handle,
		Err(err) => {
			subtask.emit_terminal(Err(Error::from(err)));
			return;
		}
	};
	subtask.attach_controller(handle.remote_controller());
	subtask.apply_priority_to_controller(subtask.current_priority());

	let mut output = match handle.wait().await {
		Err(err) => {
			subtask.emit_terminal(Err(err));
			return;
		}
		Ok(ExecStatus::Canceled) => {
			subtask.emit_terminal(Err(Error::Cancelled));
			return;
		}
		Ok(ExecStatus::Done(output)) => {
			let outcome = *output.downcast::<ProcessOutcome>().expect("ProcessTask yields ProcessOutcome");
			match outcome {
				ProcessOutcome::Success(output) => output,
				ProcessOutcome::Failed(err) => {
					subtask.emit_terminal(Err(err));
					return;
				}
			}
		}
	};

	if is_final
		&& coordinator.config.is_decompression_enabled
		&& !request.options.skip_decompression
		&& request.thumbnail.is_none()
	{
		if let Some(decompressor) = coordinator.config.decompressor.clone() {
			match maybe_decompress(&coordinator, &subtask, output, decompressor).await {
				Ok(decompressed) => output = decompressed,
				Err(err) => {
					subtask.emit_terminal(Err(err));
					return;
				}
			}
		}
	}

	if is_final {
		if let Some(data) = &output.data {
			coordinator.cache.write_back_processed(&request, data).await;
		}
	}
	coordinator
		.cache
		.store_cached_image(&output, &request, CacheTiers::MEMORY_ONLY)
		.await;
	subtask.emit_terminal(Ok(SubtaskOutput::Image(output)));
}

async fn maybe_decompress(
	coordinator: &Arc<Coordinator>,
	subtask: &Arc<Subtask>,
	container: crate::container::ImageContainer,
	decompressor: Arc<dyn crate::decode::Decompressor>,
) -> Result<crate::container::ImageContainer, Error> {
	let task = DecompressTask::new(container, decompressor);
	let handle = coordinator
		.dispatcher
		.dispatch(Stage::Decompressing, subtask.current_priority(), Box::new(task))
		.await
		.map_err(Error::from)?;

	match handle.wait().await? {
		ExecStatus::Canceled => Err(Error::Cancelled),
		ExecStatus::Done(output) => Ok(*output
			.downcast::<crate::container::ImageContainer>()
			.expect("DecompressTask yields an ImageContainer")),
	}
}

/// Relays a dependency's `Progress`/`Preview` events onto `subtask` while
/// waiting for its terminal result — needed because, unlike [`DecodeTask`],
/// [`ProcessTask`] knows nothing about the subtask graph and can't do this
/// relaying itself.
async fn await_dependency(subtask: &Arc<Subtask>, dependency: &Arc<Subtask>) -> Result<SubtaskOutput, Error> {
	if let Some(result) = dependency.terminal_replay() {
		return result;
	}

	let mut rx = dependency.subscribe_events();
	loop {
		match rx.recv().await {
			Ok(SubtaskEvent::Progress { completed, total }) => subtask.emit_progress(completed, total),
			Ok(SubtaskEvent::Preview(container)) => subtask.emit_preview(container),
			Ok(SubtaskEvent::Terminal(result)) => return result,
			Err(RecvError::Lagged(_)) => continue,
			Err(RecvError::Closed) => return Err(Error::Cancelled),
		}
	}
}

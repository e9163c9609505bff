//! The public, per-call surface handed back by [`crate::Pipeline`]: a single
//! `image`/`data` request in flight, with independent priority, cancellation,
//! and event observation (§3 "coordinator interface").

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use pipeline_tasks::Priority;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::{
	cache::CacheTiers,
	container::{CacheType, ImageContainer, ImageResponse},
	error::Error,
	loader::ResponseMetadata,
	registry::{
		subtask::{SubtaskEvent, SubtaskOutput, SubtaskStage},
		Coordinator, Subscription,
	},
	request::Request,
};

/// A progress update, re-exported at the crate root as the shape every
/// `.progress()` stream yields.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
	pub completed: u64,
	pub total: Option<u64>,
}

enum HandleState {
	/// Settled before ever touching the registry (§4.3 step 1's full-key
	/// memory-cache probe lives entirely in the facade).
	Ready(Result<ImageResponse, Error>),
	Live { subscription: Subscription },
}

/// A single in-flight (or already-settled) request for a fully processed
/// image.
pub struct ImageTask {
	request: Request,
	state: HandleState,
}

impl ImageTask {
	pub(crate) async fn new(coordinator: Arc<Coordinator>, request: Request) -> Self {
		if coordinator.is_invalidated() {
			return Self {
				request,
				state: HandleState::Ready(Err(Error::PipelineInvalidated)),
			};
		}

		if let Some((container, cache_type)) = coordinator.cache.cached_image(&request, CacheTiers::BOTH).await {
			coordinator.metrics().record_memory_hit();
			return Self {
				request: request.clone(),
				state: HandleState::Ready(Ok(ImageResponse {
					container,
					request,
					url_response: None,
					cache_type: Some(cache_type),
				})),
			};
		}
		coordinator.metrics().record_memory_miss();

		let stage = if request.processors.is_empty() {
			SubtaskStage::FetchDecodedOriginal
		} else {
			SubtaskStage::FetchProcessedImage(request.processors.len())
		};

		match coordinator.attach(request.clone(), stage, request.priority).await {
			Ok(subscription) => Self {
				request,
				state: HandleState::Live { subscription },
			},
			Err(err) => Self {
				request,
				state: HandleState::Ready(Err(err)),
			},
		}
	}

	/// Awaits the final result. Cheap to call more than once — repeated
	/// calls replay the same (memoized) terminal value (I5).
	pub async fn wait(&self) -> Result<ImageResponse, Error> {
		match &self.state {
			HandleState::Ready(result) => result.clone(),
			HandleState::Live { subscription, .. } => {
				let subtask = subscription.subtask();
				let result = match subtask.terminal_replay() {
					Some(result) => result,
					None => await_terminal(subtask).await,
				};
				result.map(|output| {
					let container = output.as_image().cloned().expect("FetchDecoded/Processed yields an image");
					ImageResponse {
						container,
						request: self.request.clone(),
						url_response: None,
						cache_type: None,
					}
				})
			}
		}
	}

	/// Progress events as they arrive; empty for an already-settled task.
	pub fn progress(&self) -> BoxStream<'static, ProgressUpdate> {
		match &self.state {
			HandleState::Ready(_) => Box::pin(tokio_stream::empty()),
			HandleState::Live { subscription, .. } => {
				let rx = subscription.subtask().subscribe_events();
				Box::pin(BroadcastStream::new(rx).filter_map(|event| match event {
					Ok(SubtaskEvent::Progress { completed, total }) => Some(ProgressUpdate { completed, total }),
					_ => None,
				}))
			}
		}
	}

	/// Preview images as they become available during progressive decoding.
	pub fn previews(&self) -> BoxStream<'static, ImageContainer> {
		match &self.state {
			HandleState::Ready(_) => Box::pin(tokio_stream::empty()),
			HandleState::Live { subscription, .. } => {
				let rx = subscription.subtask().subscribe_events();
				Box::pin(BroadcastStream::new(rx).filter_map(|event| match event {
					Ok(SubtaskEvent::Preview(container)) => Some(container),
					_ => None,
				}))
			}
		}
	}

	/// Raises or lowers this subscriber's contribution to the underlying
	/// subtask's priority (§5). A no-op once the task has settled.
	pub async fn set_priority(&self, priority: Priority) {
		if let HandleState::Live { subscription, .. } = &self.state {
			subscription.set_priority(priority).await;
		}
	}

	/// Detaches this subscriber. If it was the last one (and the subtask has
	/// no dependents), the underlying operation is cancelled (I2/I3).
	pub async fn cancel(&self) {
		if let HandleState::Live { subscription, .. } = &self.state {
			subscription.cancel().await;
		}
	}
}

enum DataHandleState {
	Ready(Result<(Bytes, Option<ResponseMetadata>), Error>),
	Live { subscription: Subscription },
}

/// A single in-flight (or already-settled) request for raw original bytes,
/// bypassing decode/process entirely.
pub struct DataTask {
	state: DataHandleState,
}

impl DataTask {
	pub(crate) async fn new(coordinator: Arc<Coordinator>, request: Request) -> Self {
		if coordinator.is_invalidated() {
			return Self {
				state: DataHandleState::Ready(Err(Error::PipelineInvalidated)),
			};
		}

		match coordinator
			.attach(request.clone(), SubtaskStage::FetchOriginalData, request.priority)
			.await
		{
			Ok(subscription) => Self {
				state: DataHandleState::Live { subscription },
			},
			Err(err) => Self {
				state: DataHandleState::Ready(Err(err)),
			},
		}
	}

	pub async fn wait(&self) -> Result<(Bytes, Option<ResponseMetadata>), Error> {
		match &self.state {
			DataHandleState::Ready(result) => result.clone(),
			DataHandleState::Live { subscription, .. } => {
				let subtask = subscription.subtask();
				let result = match subtask.terminal_replay() {
					Some(result) => result,
					None => await_terminal(subtask).await,
				};
				result.map(|output| output.as_data().map(|(bytes, response)| (bytes.clone(), response.cloned())).expect(
					"FetchOriginalData yields Data",
				))
			}
		}
	}

	pub fn progress(&self) -> BoxStream<'static, ProgressUpdate> {
		match &self.state {
			DataHandleState::Ready(_) => Box::pin(tokio_stream::empty()),
			DataHandleState::Live { subscription, .. } => {
				let rx = subscription.subtask().subscribe_events();
				Box::pin(BroadcastStream::new(rx).filter_map(|event| match event {
					Ok(SubtaskEvent::Progress { completed, total }) => Some(ProgressUpdate { completed, total }),
					_ => None,
				}))
			}
		}
	}

	pub async fn set_priority(&self, priority: Priority) {
		if let DataHandleState::Live { subscription, .. } = &self.state {
			subscription.set_priority(priority).await;
		}
	}

	pub async fn cancel(&self) {
		if let DataHandleState::Live { subscription, .. } = &self.state {
			subscription.cancel().await;
		}
	}
}

async fn await_terminal(subtask: &Arc<crate::registry::subtask::Subtask>) -> Result<SubtaskOutput, Error> {
	let mut rx = subtask.subscribe_events();
	if let Some(result) = subtask.terminal_replay() {
		return result;
	}
	loop {
		match rx.recv().await {
			Ok(SubtaskEvent::Terminal(result)) => return result,
			Ok(_) => continue,
			Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
			Err(tokio::sync::broadcast::error::RecvError::Closed) => return Err(Error::Cancelled),
		}
	}
}

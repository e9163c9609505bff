//! The subtask registry and coordinator (§4.1).
//!
//! [`Coordinator`] owns the mapping `SubtaskKey -> Subtask`, serialises every
//! mutation to it behind a single lock (mirroring the spec's "pipeline
//! queue"), and is the only thing that ever constructs, coalesces, or tears
//! down a [`Subtask`]. Everything that actually *does* work for a subtask
//! (fetching, decoding, processing) lives in [`driver`], spawned once per
//! subtask and run independently of the coordinator lock.

pub(crate) mod driver;
pub mod subtask;

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use futures::future::{BoxFuture, FutureExt};
use pipeline_tasks::{BaseTaskDispatcher, Priority};
use uuid::Uuid;

pub use subtask::{SubscriberId, Subtask, SubtaskEvent, SubtaskLifecycle, SubtaskOutput, SubtaskStage};

use crate::{
	cache::Cache, config::PipelineConfig, error::Error, keys, metrics::PipelineMetrics, rate_limiter::RateLimiter,
	request::Request, resumable::ResumableDataStore, stage::Stage,
};

/// Owns the registry plus every cross-cutting collaborator a driver needs
/// (cache facade, dispatcher, rate limiter, resumable-data store, metrics).
pub struct Coordinator {
	subtasks: tokio::sync::Mutex<HashMap<String, Arc<Subtask>>>,
	pub(crate) config: PipelineConfig,
	pub(crate) cache: Cache,
	pub(crate) dispatcher: BaseTaskDispatcher<Stage, Error>,
	pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
	pub(crate) resumable: Arc<ResumableDataStore>,
	pub(crate) metrics: Arc<PipelineMetrics>,
	invalidated: AtomicBool,
}

/// A single caller's attachment to a (possibly shared) subtask. Dropping a
/// subscription detaches it (§4.1 `detach`); `Subscription` itself never
/// implements `Clone` so there is exactly one detach per attach.
pub(crate) struct Subscription {
	coordinator: Arc<Coordinator>,
	key: String,
	id: SubscriberId,
	subtask: Arc<Subtask>,
}

impl Subscription {
	#[must_use]
	pub(crate) fn subtask(&self) -> &Arc<Subtask> {
		&self.subtask
	}

	pub(crate) async fn set_priority(&self, priority: Priority) {
		self.coordinator.set_priority(&self.key, self.id, priority).await;
	}

	pub(crate) async fn cancel(&self) {
		self.coordinator.detach(&self.key, self.id).await;
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		let coordinator = Arc::clone(&self.coordinator);
		let key = self.key.clone();
		let id = self.id;
		tokio::spawn(async move {
			coordinator.detach(&key, id).await;
		});
	}
}

impl Coordinator {
	#[must_use]
	pub(crate) fn new(config: PipelineConfig, dispatcher: BaseTaskDispatcher<Stage, Error>) -> Arc<Self> {
		let cache = Cache::new(
			config.image_cache.clone(),
			config.data_cache.clone(),
			config.data_cache_policy,
			config.is_storing_previews_in_memory_cache,
			config.decoders.clone(),
		);
		let rate_limiter = config
			.is_rate_limiter_enabled
			.then(|| Arc::new(RateLimiter::new(config.rate_limiter_capacity, config.rate_limiter_refill_per_second)));

		Arc::new(Self {
			subtasks: tokio::sync::Mutex::new(HashMap::new()),
			config,
			cache,
			dispatcher,
			rate_limiter,
			resumable: Arc::new(ResumableDataStore::new()),
			metrics: Arc::new(PipelineMetrics::default()),
			invalidated: AtomicBool::new(false),
		})
	}

	#[must_use]
	pub(crate) fn metrics(&self) -> &PipelineMetrics {
		&self.metrics
	}

	#[must_use]
	pub(crate) fn is_invalidated(&self) -> bool {
		self.invalidated.load(Ordering::Acquire)
	}

	/// Pipeline-wide `invalidate()` (§5): every live subtask transitions to
	/// `cancelled` with `pipelineInvalidated`, and every subsequent attach
	/// fails the same way. There is no recovery from this state.
	pub(crate) async fn invalidate(self: &Arc<Self>) {
		self.invalidated.store(true, Ordering::Release);
		let subtasks = self.subtasks.lock().await;
		for subtask in subtasks.values() {
			subtask.cancel_operation().await;
			subtask.emit_terminal(Err(Error::PipelineInvalidated));
		}
	}

	/// Attaches a new subscriber to the subtask for `(request, stage)`,
	/// constructing it (and its dependency chain, bottom-up) on a
	/// lookup-miss. The whole operation runs under the coordinator lock,
	/// matching §3's "created on first lookup-miss inside the registry
	/// under the coordinator lock".
	pub(crate) async fn attach(
		self: &Arc<Self>,
		request: Request,
		stage: SubtaskStage,
		priority: Priority,
	) -> Result<Subscription, Error> {
		if self.is_invalidated() {
			return Err(Error::PipelineInvalidated);
		}

		let mut subtasks = self.subtasks.lock().await;
		let subtask = self.ensure_subtask(&mut subtasks, stage, request).await;

		let id = Uuid::new_v4();
		subtask.add_subscriber(id, priority);
		self.recompute_priority(&subtasks, &subtask.key);

		Ok(Subscription {
			coordinator: Arc::clone(self),
			key: subtask.key.clone(),
			id,
			subtask,
		})
	}

	pub(crate) async fn detach(self: &Arc<Self>, key: &str, id: SubscriberId) {
		let mut subtasks = self.subtasks.lock().await;
		if let Some(subtask) = subtasks.get(key).cloned() {
			subtask.remove_subscriber(&id);
		}
		self.reap_if_unreachable(&mut subtasks, key).await;
	}

	pub(crate) async fn set_priority(self: &Arc<Self>, key: &str, id: SubscriberId, priority: Priority) {
		let subtasks = self.subtasks.lock().await;
		let Some(subtask) = subtasks.get(key) else {
			return;
		};
		subtask.set_subscriber_priority(&id, priority);
		self.recompute_priority(&subtasks, key);
	}

	/// `currentPriority(subtask) = max(subscribers, dependents' current
	/// priority)` (§5), recomputed for `key` and then propagated down its
	/// dependency chain so a priority bump on a top-level subscriber
	/// reaches the `FetchOriginalData` subtask feeding it.
	fn recompute_priority(self: &Arc<Self>, subtasks: &HashMap<String, Arc<Subtask>>, key: &str) {
		let Some(subtask) = subtasks.get(key) else {
			return;
		};
		let from_subscribers = subtask.max_subscriber_priority();
		let from_dependents = subtask
			.dependent_keys()
			.iter()
			.filter_map(|dependent_key| subtasks.get(dependent_key))
			.map(|dependent| dependent.current_priority())
			.max();

		let new_priority = [from_subscribers, from_dependents]
			.into_iter()
			.flatten()
			.max()
			.unwrap_or_default();

		subtask.set_current_priority(new_priority);
		subtask.apply_priority_to_controller(new_priority);

		for dependency_key in subtask.dependency_keys() {
			self.recompute_priority(subtasks, &dependency_key);
		}
	}

	/// Removes `key` from the registry (cancelling its operation) iff it
	/// has neither subscribers nor dependents left (I2/I3), then recurses
	/// into its own dependencies since removing it may have made them
	/// unreachable in turn.
	fn reap_if_unreachable<'a>(
		self: &'a Arc<Self>,
		subtasks: &'a mut HashMap<String, Arc<Subtask>>,
		key: &'a str,
	) -> BoxFuture<'a, ()> {
		async move {
			let Some(subtask) = subtasks.get(key).cloned() else {
				return;
			};
			if subtask.has_subscribers() || subtask.has_dependents() {
				return;
			}

			tracing::trace!(key, "subtask unreachable, cancelling and removing");
			subtask.cancel_operation().await;
			subtasks.remove(key);

			for dependency_key in subtask.dependency_keys() {
				if let Some(dependency) = subtasks.get(&dependency_key) {
					dependency.remove_dependent(key);
				}
				self.reap_if_unreachable(subtasks, &dependency_key).await;
			}
		}
		.boxed()
	}

	/// Looks up (or builds) the subtask for `(stage, request)`, recursing
	/// into its dependency first. Also implements the prefix-reuse memory
	/// probe of §4.3 step 3 / §4.6 for `FetchProcessedImage`.
	fn ensure_subtask<'a>(
		self: &'a Arc<Self>,
		subtasks: &'a mut HashMap<String, Arc<Subtask>>,
		stage: SubtaskStage,
		request: Request,
	) -> BoxFuture<'a, Arc<Subtask>> {
		async move {
			let fingerprint = Self::stage_key(&stage, &request);
			let key = if self.config.is_task_coalescing_enabled {
				fingerprint
			} else {
				format!("{fingerprint}#{}", Uuid::new_v4())
			};

			if self.config.is_task_coalescing_enabled {
				if let Some(existing) = subtasks.get(&key) {
					if existing.lifecycle() != SubtaskLifecycle::Cancelled {
						self.metrics.record_coalesced_attach();
						return Arc::clone(existing);
					}
				}
			}

			let subtask = match stage {
				SubtaskStage::FetchOriginalData => {
					let subtask = Arc::new(Subtask::new(key.clone(), stage, request.clone(), request.priority));
					tokio::spawn(driver::run_fetch_original(Arc::clone(self), Arc::clone(&subtask), request));
					subtask
				}
				SubtaskStage::FetchDecodedOriginal => {
					let dependency = self
						.ensure_subtask(subtasks, SubtaskStage::FetchOriginalData, request.clone())
						.await;
					let subtask = Arc::new(Subtask::new(key.clone(), stage, request.clone(), request.priority));
					dependency.add_dependent(&subtask.key);
					subtask.add_dependency_edge(&dependency.key);
					tokio::spawn(driver::run_fetch_decoded(
						Arc::clone(self),
						Arc::clone(&subtask),
						dependency,
						request,
					));
					subtask
				}
				SubtaskStage::FetchProcessedImage(n) => {
					debug_assert!(n >= 1, "FetchProcessedImage(0) is never scheduled directly");

					if let Some(container) = self.cache.cached_image_at_prefix(&request, n).await {
						self.metrics.record_memory_hit();
						tracing::debug!(key, n, "processed-image prefix memory cache hit, skipping dependency chain");
						let priority = request.priority;
						let subtask = Arc::new(Subtask::new(key.clone(), stage, request, priority));
						subtask.mark_running();
						subtask.emit_terminal(Ok(SubtaskOutput::Image(container)));
						subtask
					} else {
						self.metrics.record_memory_miss();
						let next_stage = if n == 1 {
							SubtaskStage::FetchDecodedOriginal
						} else {
							SubtaskStage::FetchProcessedImage(n - 1)
						};
						let dependency = self.ensure_subtask(subtasks, next_stage, request.clone()).await;
						let subtask = Arc::new(Subtask::new(key.clone(), stage, request.clone(), request.priority));
						dependency.add_dependent(&subtask.key);
						subtask.add_dependency_edge(&dependency.key);
						tokio::spawn(driver::run_fetch_processed(
							Arc::clone(self),
							Arc::clone(&subtask),
							dependency,
							n,
							request,
						));
						subtask
					}
				}
			};

			subtasks.insert(key, Arc::clone(&subtask));
			subtask
		}
		.boxed()
	}

	fn stage_key(stage: &SubtaskStage, request: &Request) -> String {
		match stage {
			SubtaskStage::FetchOriginalData => keys::fetch_original_key(request),
			SubtaskStage::FetchDecodedOriginal => keys::fetch_decoded_key(request),
			SubtaskStage::FetchProcessedImage(n) => keys::fetch_processed_key(request, *n),
		}
	}
}

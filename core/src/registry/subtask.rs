use std::{
	collections::{HashMap, HashSet},
	sync::{Mutex, OnceLock},
};

use bytes::Bytes;
use pipeline_tasks::{Priority, TaskRemoteController};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::{container::ImageContainer, error::Error, loader::ResponseMetadata, request::Request};

pub type SubscriberId = Uuid;

/// Which stage of the five-stage chain (§2) a subtask performs. `n == 0`
/// in `FetchProcessedImage` would mean "no processors applied yet", which
/// is never itself scheduled — that case is represented by
/// `FetchDecodedOriginal` directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubtaskStage {
	FetchOriginalData,
	FetchDecodedOriginal,
	FetchProcessedImage(usize),
}

/// What a completed subtask produced.
#[derive(Debug, Clone)]
pub enum SubtaskOutput {
	Data {
		bytes: Bytes,
		response: Option<ResponseMetadata>,
	},
	Image(ImageContainer),
}

impl SubtaskOutput {
	#[must_use]
	pub fn as_image(&self) -> Option<&ImageContainer> {
		match self {
			Self::Image(container) => Some(container),
			Self::Data { .. } => None,
		}
	}

	#[must_use]
	pub fn as_data(&self) -> Option<(&Bytes, Option<&ResponseMetadata>)> {
		match self {
			Self::Data { bytes, response } => Some((bytes, response.as_ref())),
			Self::Image(_) => None,
		}
	}
}

/// An event as emitted by a subtask, before the public facade projects it
/// into a subscriber-facing `{progress, preview, finished}` stream.
#[derive(Debug, Clone)]
pub enum SubtaskEvent {
	Progress { completed: u64, total: Option<u64> },
	Preview(ImageContainer),
	Terminal(Result<SubtaskOutput, Error>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtaskLifecycle {
	Pending,
	Running,
	FinishedSuccess,
	FinishedFailure,
	Cancelled,
}

/// A reference-counted (by subscriber + dependent bookkeeping, not by
/// `Arc` strong count alone — a dependent subtask keeps its dependency
/// alive even with zero direct subscribers, per I2) coalesced unit of work.
pub struct Subtask {
	pub key: String,
	pub stage: SubtaskStage,
	/// The request that first caused this subtask to be created. Since all
	/// requests that coalesce onto the same key share the same processor
	/// prefix and relevant options by construction, this is safe to treat
	/// as canonical for every purpose a driver needs (cache keys, policy
	/// decisions, processor identities).
	pub request: Request,

	lifecycle: Mutex<SubtaskLifecycle>,
	events: broadcast::Sender<SubtaskEvent>,
	terminal: OnceLock<Result<SubtaskOutput, Error>>,

	subscribers: Mutex<HashMap<SubscriberId, Priority>>,
	/// Keys of subtasks this one depends on (awaits).
	dependencies: Mutex<HashSet<String>>,
	/// Keys of subtasks that depend on this one — the back-edges used for
	/// both retention (I2) and priority propagation (§5).
	dependents: Mutex<HashSet<String>>,

	current_priority: Mutex<Priority>,
	controller: Mutex<Option<TaskRemoteController>>,

	/// Growing byte snapshot published by a `FetchOriginalData` subtask as
	/// chunks arrive, so a dependent `FetchDecodedOriginal` can drive
	/// progressive decoding against partial data instead of waiting for
	/// the fetch to fully complete (§4.5). Unused by any other stage.
	partial_bytes: watch::Sender<Bytes>,
}

impl Subtask {
	#[must_use]
	pub fn new(key: String, stage: SubtaskStage, request: Request, initial_priority: Priority) -> Self {
		let (events, _) = broadcast::channel(32);
		let (partial_bytes, _) = watch::channel(Bytes::new());
		Self {
			key,
			stage,
			request,
			lifecycle: Mutex::new(SubtaskLifecycle::Pending),
			events,
			terminal: OnceLock::new(),
			subscribers: Mutex::new(HashMap::new()),
			dependencies: Mutex::new(HashSet::new()),
			dependents: Mutex::new(HashSet::new()),
			current_priority: Mutex::new(initial_priority),
			controller: Mutex::new(None),
			partial_bytes,
		}
	}

	/// Publishes a new growing-byte snapshot (called only by the
	/// `FetchOriginalData` driver as chunks arrive).
	pub fn publish_partial_bytes(&self, bytes: Bytes) {
		let _ = self.partial_bytes.send(bytes);
	}

	#[must_use]
	pub fn subscribe_partial_bytes(&self) -> watch::Receiver<Bytes> {
		self.partial_bytes.subscribe()
	}

	#[must_use]
	pub fn lifecycle(&self) -> SubtaskLifecycle {
		*self.lifecycle.lock().expect("lifecycle mutex poisoned")
	}

	pub fn subscribe_events(&self) -> broadcast::Receiver<SubtaskEvent> {
		self.events.subscribe()
	}

	/// A late attach (subtask already terminal but still retained) gets a
	/// synthetic replay of just the terminal event (I5), rather than the
	/// full history.
	#[must_use]
	pub fn terminal_replay(&self) -> Option<Result<SubtaskOutput, Error>> {
		self.terminal.get().cloned()
	}

	pub fn add_subscriber(&self, id: SubscriberId, priority: Priority) {
		self.subscribers.lock().expect("subscribers mutex poisoned").insert(id, priority);
	}

	/// Returns `true` if this subtask has no subscribers left (callers
	/// still need to separately check dependents before deciding
	/// retention, per I2).
	pub fn remove_subscriber(&self, id: &SubscriberId) -> bool {
		let mut subscribers = self.subscribers.lock().expect("subscribers mutex poisoned");
		subscribers.remove(id);
		subscribers.is_empty()
	}

	pub fn set_subscriber_priority(&self, id: &SubscriberId, priority: Priority) {
		if let Some(p) = self.subscribers.lock().expect("subscribers mutex poisoned").get_mut(id) {
			*p = priority;
		}
	}

	#[must_use]
	pub fn has_subscribers(&self) -> bool {
		!self.subscribers.lock().expect("subscribers mutex poisoned").is_empty()
	}

	#[must_use]
	pub fn max_subscriber_priority(&self) -> Option<Priority> {
		self.subscribers.lock().expect("subscribers mutex poisoned").values().copied().max()
	}

	pub fn add_dependency_edge(&self, dependency_key: &str) {
		self.dependencies.lock().expect("dependencies mutex poisoned").insert(dependency_key.to_string());
	}

	pub fn add_dependent(&self, dependent_key: &str) {
		self.dependents.lock().expect("dependents mutex poisoned").insert(dependent_key.to_string());
	}

	pub fn remove_dependent(&self, dependent_key: &str) {
		self.dependents.lock().expect("dependents mutex poisoned").remove(dependent_key);
	}

	#[must_use]
	pub fn has_dependents(&self) -> bool {
		!self.dependents.lock().expect("dependents mutex poisoned").is_empty()
	}

	#[must_use]
	pub fn dependency_keys(&self) -> Vec<String> {
		self.dependencies.lock().expect("dependencies mutex poisoned").iter().cloned().collect()
	}

	#[must_use]
	pub fn dependent_keys(&self) -> Vec<String> {
		self.dependents.lock().expect("dependents mutex poisoned").iter().cloned().collect()
	}

	#[must_use]
	pub fn current_priority(&self) -> Priority {
		*self.current_priority.lock().expect("priority mutex poisoned")
	}

	pub fn set_current_priority(&self, priority: Priority) {
		*self.current_priority.lock().expect("priority mutex poisoned") = priority;
	}

	pub fn attach_controller(&self, controller: TaskRemoteController) {
		*self.controller.lock().expect("controller mutex poisoned") = Some(controller);
	}

	pub fn apply_priority_to_controller(&self, priority: Priority) {
		if let Some(controller) = self.controller.lock().expect("controller mutex poisoned").as_ref() {
			controller.set_priority(priority);
		}
	}

	pub async fn cancel_operation(&self) {
		let controller = self.controller.lock().expect("controller mutex poisoned").clone();
		if let Some(controller) = controller {
			if let Err(err) = controller.cancel().await {
				// The task had already started running or already finished by
				// the time this reached the queue — an expected race, not a
				// reason to treat the cancel itself as having failed.
				debug_assert!(matches!(err, pipeline_tasks::TaskSystemError::TaskNotFound(_)));
				tracing::trace!(key = %self.key, %err, "cancel raced the task's own completion");
			}
		}
		*self.lifecycle.lock().expect("lifecycle mutex poisoned") = SubtaskLifecycle::Cancelled;
	}

	pub fn emit_progress(&self, completed: u64, total: Option<u64>) {
		let _ = self.events.send(SubtaskEvent::Progress { completed, total });
	}

	pub fn emit_preview(&self, container: ImageContainer) {
		let _ = self.events.send(SubtaskEvent::Preview(container));
	}

	/// Records the terminal result exactly once (I4/I5) and broadcasts it.
	/// `OnceLock::set` is the gate: a second caller's `set` fails and that
	/// caller returns without broadcasting, which is what makes this safe
	/// against two concurrent finalizers (e.g. `Coordinator::invalidate`
	/// racing a driver's own cancellation-triggered terminal emission).
	pub fn emit_terminal(&self, result: Result<SubtaskOutput, Error>) {
		if self.terminal.set(result.clone()).is_err() {
			return;
		}
		*self.lifecycle.lock().expect("lifecycle mutex poisoned") = match &result {
			Ok(_) => SubtaskLifecycle::FinishedSuccess,
			Err(err) if err.is_cancelled() => SubtaskLifecycle::Cancelled,
			Err(_) => SubtaskLifecycle::FinishedFailure,
		};
		let _ = self.events.send(SubtaskEvent::Terminal(result));
	}

	pub fn mark_running(&self) {
		let mut lifecycle = self.lifecycle.lock().expect("lifecycle mutex poisoned");
		if *lifecycle == SubtaskLifecycle::Pending {
			*lifecycle = SubtaskLifecycle::Running;
		}
	}
}

use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashMap, sync::Arc};

/// Metadata about a load, independent of transport — an HTTP response in
/// practice, but kept generic since a `Custom`/`Published` source has no
/// HTTP response of its own.
#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
	pub status: Option<u16>,
	pub headers: Arc<HashMap<String, String>>,
	pub expected_content_length: Option<u64>,
	pub accepts_byte_ranges: bool,
}

impl ResponseMetadata {
	#[must_use]
	pub fn etag(&self) -> Option<&str> {
		self.headers.get("etag").map(String::as_str)
	}

	#[must_use]
	pub fn last_modified(&self) -> Option<&str> {
		self.headers.get("last-modified").map(String::as_str)
	}

	#[must_use]
	pub fn validator(&self) -> Option<String> {
		self.etag()
			.or_else(|| self.last_modified())
			.map(ToString::to_string)
	}
}

/// A single chunk of data delivered by a [`DataLoader`], paired with
/// whatever response metadata accompanied it (a loader may send metadata
/// once, on the first chunk, and `None` afterward).
#[derive(Debug, Clone)]
pub struct LoadChunk {
	pub bytes: Bytes,
	pub response: Option<ResponseMetadata>,
}

/// What ended a load.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
	Completed,
	Failed(Arc<str>),
}

/// A source of raw bytes for a `FetchOriginalData` subtask: a network
/// fetch, a disk read wrapper, or a caller-supplied producer for `Custom`/
/// `Published` request sources.
///
/// Chunks need not align with decoder scan boundaries — the pipeline's
/// progressive decode path reassembles a growing buffer on its own.
#[async_trait]
pub trait DataLoader: Send + Sync {
	/// Begins (or resumes, via `resume_from`) a load, pushing chunks onto
	/// `sink` until the source is exhausted or `sink` refuses further sends
	/// (the receiving end was dropped, e.g. on cancellation).
	async fn load(
		&self,
		request: &LoadRequest,
		sink: async_channel::Sender<LoadChunk>,
	) -> LoadOutcome;
}

/// What a loader needs to perform (or resume) a fetch. A thin, loader-facing
/// projection of [`Request`](crate::request::Request) plus resumable-data
/// hints the pipeline fills in itself (§4.7).
#[derive(Debug, Clone)]
pub struct LoadRequest {
	pub load_key: Arc<str>,
	pub headers: Arc<HashMap<String, String>>,
	/// Byte offset to resume from, and the validator to send as
	/// `If-Range`, if the pipeline has partial bytes retained for this key.
	pub resume: Option<(u64, String)>,
}

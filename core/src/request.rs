use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use pipeline_tasks::Priority;

use crate::loader::DataLoader;

/// A processor's keying identity. Carried separately from the `Arc<dyn
/// Processor>` itself so subtask keys can be computed without touching the
/// processor implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessorId(pub Arc<str>);

impl fmt::Display for ProcessorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for ProcessorId {
	fn from(value: &str) -> Self {
		Self(Arc::from(value))
	}
}

/// An ordered processor step plus the identity used to key it.
#[derive(Clone)]
pub struct ProcessorSpec {
	pub id: ProcessorId,
	pub processor: Arc<dyn crate::process::Processor>,
}

impl fmt::Debug for ProcessorSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProcessorSpec").field("id", &self.id).finish()
	}
}

/// How a `contentMode` flexible thumbnail resize should fit the source into
/// the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
	AspectFill,
	AspectFit,
}

impl fmt::Display for ContentMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::AspectFill => write!(f, "aspectFill"),
			Self::AspectFit => write!(f, "aspectFit"),
		}
	}
}

/// Either a single bounding dimension (`maxPixelSize`) or an explicit
/// width/height box with a fit mode. The two forms are mutually exclusive,
/// matching the key-string grammar in the external interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThumbnailSize {
	MaxPixelSize(u32),
	Flexible {
		width: u32,
		height: u32,
		content_mode: ContentMode,
	},
}

/// Hints controlling how (and whether) a decode-time thumbnail is produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailOptions {
	pub size: ThumbnailSize,
	pub create_thumbnail_from_image_always: bool,
	pub create_thumbnail_from_image_if_absent: bool,
	pub create_thumbnail_with_transform: bool,
	pub should_cache_immediately: bool,
}

impl ThumbnailOptions {
	#[must_use]
	pub fn max_pixel_size(size: u32) -> Self {
		Self {
			size: ThumbnailSize::MaxPixelSize(size),
			create_thumbnail_from_image_always: false,
			create_thumbnail_from_image_if_absent: true,
			create_thumbnail_with_transform: false,
			should_cache_immediately: false,
		}
	}
}

/// Where the bytes for a request come from.
#[derive(Clone)]
pub enum RequestSource {
	Url(Arc<str>),
	UrlRequest {
		url: Arc<str>,
		headers: Arc<HashMap<String, String>>,
		reload_ignoring_cached_data: bool,
		timeout: Duration,
	},
	/// An opaque identifier paired with an async data producer supplied by
	/// the caller (a one-shot async fetch, not a URL the pipeline itself
	/// understands).
	Custom {
		id: Arc<str>,
		loader: Arc<dyn DataLoader>,
	},
	/// Same shape as `Custom` but conceptually a reactive/republishing
	/// source (e.g. a live camera feed); the pipeline treats both
	/// identically since it only ever consumes one stream per fetch.
	Published {
		id: Arc<str>,
		loader: Arc<dyn DataLoader>,
	},
}

impl RequestSource {
	/// The string used as the base of every cache key derived from this
	/// source: the URL for URL-based sources, the caller-supplied id
	/// otherwise.
	#[must_use]
	pub fn load_key(&self) -> &str {
		match self {
			Self::Url(url) | Self::UrlRequest { url, .. } => url,
			Self::Custom { id, .. } | Self::Published { id, .. } => id,
		}
	}

	#[must_use]
	pub fn is_local_or_data_url(&self) -> bool {
		let key = self.load_key();
		key.starts_with("file://") || key.starts_with("data:")
	}

	pub(crate) fn custom_loader(&self) -> Option<&Arc<dyn DataLoader>> {
		match self {
			Self::Custom { loader, .. } | Self::Published { loader, .. } => Some(loader),
			Self::Url(_) | Self::UrlRequest { .. } => None,
		}
	}
}

/// Per-request cache and loading behavior toggles. Every field defaults to
/// `false`/disabled, i.e. "use every cache tier, always load on miss".
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
	pub disable_memory_cache_reads: bool,
	pub disable_memory_cache_writes: bool,
	pub disable_disk_cache_reads: bool,
	pub disable_disk_cache_writes: bool,
	pub reload_ignoring_cached_data: bool,
	pub return_cache_data_dont_load: bool,
	pub skip_decompression: bool,
	pub skip_data_loading_queue: bool,
}

/// An immutable description of an image (or raw data) to fetch.
#[derive(Clone)]
pub struct Request {
	pub source: RequestSource,
	pub processors: Arc<[ProcessorSpec]>,
	pub priority: Priority,
	pub options: RequestOptions,
	pub thumbnail: Option<ThumbnailOptions>,
	pub scale: Option<f64>,
}

impl fmt::Debug for Request {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Request")
			.field("load_key", &self.source.load_key())
			.field("processors", &self.processors.len())
			.field("priority", &self.priority)
			.field("options", &self.options)
			.field("thumbnail", &self.thumbnail)
			.finish()
	}
}

impl Request {
	#[must_use]
	pub fn new(source: RequestSource) -> Self {
		Self {
			source,
			processors: Arc::from(Vec::new()),
			priority: Priority::default(),
			options: RequestOptions::default(),
			thumbnail: None,
			scale: None,
		}
	}

	#[must_use]
	pub fn url(url: impl Into<Arc<str>>) -> Self {
		Self::new(RequestSource::Url(url.into()))
	}

	#[must_use]
	pub fn with_processors(mut self, processors: impl IntoIterator<Item = ProcessorSpec>) -> Self {
		self.processors = processors.into_iter().collect::<Vec<_>>().into();
		self
	}

	#[must_use]
	pub fn with_priority(mut self, priority: Priority) -> Self {
		self.priority = priority;
		self
	}

	#[must_use]
	pub fn with_options(mut self, options: RequestOptions) -> Self {
		self.options = options;
		self
	}

	#[must_use]
	pub fn with_thumbnail(mut self, thumbnail: ThumbnailOptions) -> Self {
		self.thumbnail = Some(thumbnail);
		self
	}

	#[must_use]
	pub fn with_scale(mut self, scale: f64) -> Self {
		self.scale = Some(scale);
		self
	}

	#[must_use]
	pub fn processor_ids(&self) -> Vec<ProcessorId> {
		self.processors.iter().map(|p| p.id.clone()).collect()
	}
}

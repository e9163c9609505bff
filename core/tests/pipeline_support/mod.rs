//! Hand-written test doubles for the pipeline's external collaborators
//! (§6): a fake data loader, fake byte/image caches, a fake decoder and
//! processor. No mocking framework, matching the donor's `tests/common/*`
//! style of purpose-built fakes (`NeverTask`, `TimeTask`, ...).

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use bytes::Bytes;
use downcast_rs::DowncastSync;
use pipeline_core::{
	ByteCache, DecodedImage, DecoderRegistry, Decoder, DecodingContext, ImageContainer, ImageEncoder, LoadChunk,
	LoadOutcome, LoadRequest, MemoryImageCache, Processor, ProcessingContext, Request, ThumbnailOptions, ThumbnailSize,
};
use tokio::sync::{Mutex, Notify};

/// A fully decoded pixel buffer, standing in for a real platform image type.
/// `width`/`height` default to `0` and are only meaningful for tests that
/// exercise thumbnail sizing — every other fake leaves them unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeImage {
	pub bytes: Vec<u8>,
	pub width: u32,
	pub height: u32,
}
impl DecodedImage for FakeImage {}

pub fn fake_container(bytes: &[u8]) -> ImageContainer {
	fake_container_sized(bytes, 0, 0)
}

pub fn fake_container_sized(bytes: &[u8], width: u32, height: u32) -> ImageContainer {
	ImageContainer::final_with_image(Arc::new(FakeImage {
		bytes: bytes.to_vec(),
		width,
		height,
	}) as Arc<dyn DecodedImage>)
}

pub fn image_bytes(container: &ImageContainer) -> Vec<u8> {
	fake_image(container).bytes.clone()
}

pub fn image_dims(container: &ImageContainer) -> (u32, u32) {
	let image = fake_image(container);
	(image.width, image.height)
}

fn fake_image(container: &ImageContainer) -> Arc<FakeImage> {
	container.image.clone().downcast_arc::<FakeImage>().expect("FakeImage")
}

/// A data loader that serves one canned response per call and counts how
/// many times it was invoked — the backbone of every coalescing assertion
/// in §8.
pub struct FakeLoader {
	pub payload: Bytes,
	pub calls: AtomicUsize,
	/// When set, every `load` call waits on this before returning, letting a
	/// test hold multiple concurrent requests at the "in flight" point
	/// before releasing them together.
	pub gate: Option<Arc<Notify>>,
}

impl FakeLoader {
	#[must_use]
	pub fn new(payload: impl Into<Bytes>) -> Self {
		Self {
			payload: payload.into(),
			calls: AtomicUsize::new(0),
			gate: None,
		}
	}

	#[must_use]
	pub fn gated(payload: impl Into<Bytes>, gate: Arc<Notify>) -> Self {
		Self {
			payload: payload.into(),
			calls: AtomicUsize::new(0),
			gate: Some(gate),
		}
	}

	pub fn call_count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl pipeline_core::DataLoader for FakeLoader {
	async fn load(&self, _request: &LoadRequest, sink: async_channel::Sender<LoadChunk>) -> LoadOutcome {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if let Some(gate) = &self.gate {
			gate.notified().await;
		}
		let _ = sink
			.send(LoadChunk {
				bytes: self.payload.clone(),
				response: None,
			})
			.await;
		LoadOutcome::Completed
	}
}

/// Sends a fixed sequence of chunks, one [`DataLoader::load`] call's worth,
/// each as its own channel send — used to drive progressive-decoding tests
/// where each chunk must land as its own `Progress` event.
pub struct ChunkedLoader {
	chunks: Vec<Bytes>,
}

impl ChunkedLoader {
	#[must_use]
	pub fn new(chunks: Vec<Vec<u8>>) -> Self {
		Self {
			chunks: chunks.into_iter().map(Bytes::from).collect(),
		}
	}
}

#[async_trait]
impl pipeline_core::DataLoader for ChunkedLoader {
	async fn load(&self, _request: &LoadRequest, sink: async_channel::Sender<LoadChunk>) -> LoadOutcome {
		for chunk in &self.chunks {
			// Give the decode task's queue hop time to subscribe to this
			// subtask's events before the next chunk lands, so no progress
			// event is missed.
			tokio::time::sleep(std::time::Duration::from_millis(10)).await;
			if sink
				.send(LoadChunk {
					bytes: chunk.clone(),
					response: None,
				})
				.await
				.is_err()
			{
				return LoadOutcome::Failed(Arc::from("receiver dropped"));
			}
		}
		LoadOutcome::Completed
	}
}

/// Fails every load with `dataMissingInCache`-adjacent behaviour never
/// reached in practice — used for `returnCacheDataDontLoad` scenarios where
/// the loader must never be invoked at all.
pub struct PanicLoader;

#[async_trait]
impl pipeline_core::DataLoader for PanicLoader {
	async fn load(&self, _request: &LoadRequest, _sink: async_channel::Sender<LoadChunk>) -> LoadOutcome {
		panic!("loader must not be invoked")
	}
}

#[derive(Default)]
pub struct FakeByteCache {
	entries: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl ByteCache for FakeByteCache {
	async fn get(&self, key: &str) -> Option<Bytes> {
		self.entries.lock().await.get(key).cloned()
	}

	async fn put(&self, key: &str, data: Bytes) {
		self.entries.lock().await.insert(key.to_string(), data);
	}

	async fn remove(&self, key: &str) {
		self.entries.lock().await.remove(key);
	}

	async fn remove_all(&self) {
		self.entries.lock().await.clear();
	}

	async fn contains(&self, key: &str) -> bool {
		self.entries.lock().await.contains_key(key)
	}
}

impl FakeByteCache {
	pub async fn keys(&self) -> Vec<String> {
		self.entries.lock().await.keys().cloned().collect()
	}

	pub async fn len(&self) -> usize {
		self.entries.lock().await.len()
	}
}

#[derive(Default)]
pub struct FakeImageCache {
	entries: Mutex<HashMap<String, ImageContainer>>,
}

#[async_trait]
impl MemoryImageCache for FakeImageCache {
	async fn get(&self, key: &str) -> Option<ImageContainer> {
		self.entries.lock().await.get(key).cloned()
	}

	async fn put(&self, key: &str, container: ImageContainer) {
		self.entries.lock().await.insert(key.to_string(), container);
	}

	async fn remove(&self, key: &str) {
		self.entries.lock().await.remove(key);
	}

	async fn remove_all(&self) {
		self.entries.lock().await.clear();
	}

	async fn contains(&self, key: &str) -> bool {
		self.entries.lock().await.contains_key(key)
	}
}

impl FakeImageCache {
	pub async fn len(&self) -> usize {
		self.entries.lock().await.len()
	}
}

/// The source's fixed "natural" dimensions against which [`FakeDecoder`]
/// computes thumbnail sizing — stands in for whatever a real decoder would
/// read from the image header.
const NATURAL_WIDTH: u32 = 640;
const NATURAL_HEIGHT: u32 = 480;

/// Decodes any non-empty byte buffer into a [`FakeImage`] carrying those
/// same bytes, so tests can assert on round-tripped payloads without a real
/// codec. Understands partial decodes for progressive-streaming tests: a
/// partial decode only succeeds once the buffer reaches `min_preview_len`.
/// When the request asked for a `maxPixelSize` thumbnail, reports scaled
/// dimensions off [`NATURAL_WIDTH`]/[`NATURAL_HEIGHT`] instead of the full
/// source size, the same way a real decoder would downsize at decode time
/// rather than via a separate processor step.
struct FakeDecoder {
	min_preview_len: usize,
	thumbnail: Option<ThumbnailOptions>,
}

impl FakeDecoder {
	fn dimensions(&self) -> (u32, u32) {
		match self.thumbnail.as_ref().map(|opts| opts.size) {
			Some(ThumbnailSize::MaxPixelSize(max)) => {
				let scale = f64::from(max) / f64::from(NATURAL_WIDTH.max(NATURAL_HEIGHT));
				(
					(f64::from(NATURAL_WIDTH) * scale).round() as u32,
					(f64::from(NATURAL_HEIGHT) * scale).round() as u32,
				)
			}
			_ => (NATURAL_WIDTH, NATURAL_HEIGHT),
		}
	}
}

impl Decoder for FakeDecoder {
	fn decode(&mut self, bytes: &Bytes, is_final: bool) -> Result<Option<ImageContainer>, Arc<str>> {
		if !is_final && bytes.len() < self.min_preview_len {
			return Ok(None);
		}
		let (width, height) = self.dimensions();
		let mut container = fake_container_sized(bytes, width, height);
		container.is_preview = !is_final;
		Ok(Some(container))
	}

	fn name(&self) -> &'static str {
		"fake"
	}
}

#[must_use]
pub fn fake_decoder_registry(min_preview_len: usize) -> DecoderRegistry {
	DecoderRegistry::new().with_decoder(move |_bytes: &Bytes, ctx: &DecodingContext| {
		Some(Box::new(FakeDecoder {
			min_preview_len,
			thumbnail: ctx.thumbnail,
		}) as Box<dyn Decoder>)
	})
}

/// Appends `tag` to the decoded bytes and counts invocations — used to
/// assert a processor chain applies each step exactly once (§8 scenario 2).
pub struct TaggingProcessor {
	pub tag: &'static str,
	pub calls: AtomicUsize,
}

impl TaggingProcessor {
	#[must_use]
	pub fn new(tag: &'static str) -> Self {
		Self {
			tag,
			calls: AtomicUsize::new(0),
		}
	}

	pub fn call_count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Processor for TaggingProcessor {
	async fn process(
		&self,
		container: &ImageContainer,
		_context: &ProcessingContext,
	) -> Result<Option<ImageContainer>, Arc<str>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let mut bytes = image_bytes(container);
		bytes.extend_from_slice(self.tag.as_bytes());
		Ok(Some(fake_container(&bytes)))
	}

	fn identifier(&self) -> &str {
		self.tag
	}
}

/// Appends `:encoded` to a container's pixel bytes and counts invocations —
/// stands in for a real re-encoder, with a visible marker so disk-cache
/// write-back tests can tell an encoded write apart from a raw-bytes one.
pub struct FakeEncoder {
	pub calls: AtomicUsize,
}

impl FakeEncoder {
	#[must_use]
	pub fn new() -> Self {
		Self { calls: AtomicUsize::new(0) }
	}

	pub fn call_count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl ImageEncoder for FakeEncoder {
	fn encode(&self, container: &ImageContainer) -> Option<Bytes> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let mut bytes = image_bytes(container);
		bytes.extend_from_slice(b":encoded");
		Some(Bytes::from(bytes))
	}
}

#[must_use]
pub fn processor_spec(processor: Arc<dyn Processor>) -> pipeline_core::ProcessorSpec {
	pipeline_core::ProcessorSpec {
		id: pipeline_core::ProcessorId::from(processor.identifier()),
		processor,
	}
}

#[must_use]
pub fn request_for(url: &str) -> Request {
	Request::url(url)
}

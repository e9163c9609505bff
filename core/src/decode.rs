use std::sync::Arc;

use bytes::Bytes;

use crate::{container::ImageContainer, loader::ResponseMetadata, request::ThumbnailOptions};

/// Context a decoder registry uses to pick (or refuse to pick) a decoder,
/// and that a chosen decoder keeps using across repeated partial-decode
/// calls during progressive streaming.
#[derive(Debug, Clone)]
pub struct DecodingContext {
	pub response: Option<ResponseMetadata>,
	pub is_completed: bool,
	/// Present when the request asked for a thumbnail. Thumbnails are
	/// produced directly by the decoder on the decoding queue (§4.5)
	/// rather than as a separate processor step.
	pub thumbnail: Option<ThumbnailOptions>,
}

/// Post-decode pixel transform applied on the dedicated decompression queue
/// (§4.4), skipped for thumbnails and whenever `skipDecompression` is set.
/// The spec treats decoders/encoders/processors as external collaborators
/// with a named interface (§6) but is silent on decompression's exact
/// shape beyond "it has a queue and can be skipped" — modeled the same way
/// as [`crate::process::Processor`] so it plugs into the same capability-set
/// pattern (§9) rather than inventing a one-off mechanism.
pub trait Decompressor: Send + Sync {
	fn decompress(&self, container: ImageContainer) -> ImageContainer;
}

/// A stateful decoder bound to one load. Called once per available byte
/// prefix during progressive streaming, and exactly once more with the full
/// bytes and `is_final = true` at completion.
pub trait Decoder: Send + Sync {
	/// Returns `Ok(None)` for "not enough data yet, not an error" (the
	/// partial is silently skipped per §4.5), `Ok(Some(container))` for a
	/// successful (possibly preview) decode, and `Err` for a hard failure —
	/// only fatal when `is_final` is true, since the registry recovers from
	/// a partial failure by continuing to await more bytes.
	fn decode(&mut self, bytes: &Bytes, is_final: bool) -> Result<Option<ImageContainer>, Arc<str>>;

	/// A debug-facing name used in `decodingFailed` error context.
	fn name(&self) -> &'static str;
}

/// Picks a [`Decoder`] for a load based on the bytes seen so far and the
/// response metadata, mirroring the donor's closure-based capability
/// registries rather than an open trait-inheritance hierarchy (§9).
#[derive(Clone)]
pub struct DecoderRegistry {
	factories: Arc<[Arc<dyn Fn(&Bytes, &DecodingContext) -> Option<Box<dyn Decoder>> + Send + Sync>]>,
}

impl DecoderRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self {
			factories: Arc::from(Vec::new()),
		}
	}

	#[must_use]
	pub fn with_decoder(
		mut self,
		factory: impl Fn(&Bytes, &DecodingContext) -> Option<Box<dyn Decoder>> + Send + Sync + 'static,
	) -> Self {
		let mut factories = self.factories.to_vec();
		factories.push(Arc::new(factory));
		self.factories = Arc::from(factories);
		self
	}

	/// Dispatches on the partial bytes seen so far and the response
	/// metadata, returning the first matching decoder. Decoders are tried
	/// in registration order.
	#[must_use]
	pub fn make_decoder(&self, bytes: &Bytes, context: &DecodingContext) -> Option<Box<dyn Decoder>> {
		self.factories.iter().find_map(|factory| factory(bytes, context))
	}
}

impl Default for DecoderRegistry {
	fn default() -> Self {
		Self::new()
	}
}

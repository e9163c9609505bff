use std::sync::Arc;

use async_trait::async_trait;

use crate::container::ImageContainer;

/// Context handed to a processor: currently just the request's thumbnail
/// scale hint, kept as its own type so more fields can be added without
/// changing every `Processor` implementation's signature.
#[derive(Debug, Clone, Default)]
pub struct ProcessingContext {
	pub scale: Option<f64>,
}

/// A single step in a request's processor chain (crop, resize, color
/// transform, ...). Returning `Ok(None)` on the final image in the chain is
/// a processing failure (`processingFailed`); returning `None` partway
/// through a *prefix* probe is never attempted, since prefix reuse only
/// probes caches, not processors.
#[async_trait]
pub trait Processor: Send + Sync {
	async fn process(
		&self,
		container: &ImageContainer,
		context: &ProcessingContext,
	) -> Result<Option<ImageContainer>, Arc<str>>;

	/// The identifier used to key this processor in cache/subtask keys.
	/// Must be stable and unique within a pipeline's configuration.
	fn identifier(&self) -> &str;
}

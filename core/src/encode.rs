use bytes::Bytes;

use crate::container::ImageContainer;

/// Re-encodes a processed (or decoded) image into bytes worth writing to
/// the disk cache, for the case where a [`crate::process::Processor`] (or
/// decoder) didn't already retain `data` on its output container. Only
/// consulted for the final link in a processor chain — intermediate
/// results are never persisted to disk (§4.3).
pub trait ImageEncoder: Send + Sync {
	fn encode(&self, container: &ImageContainer) -> Option<Bytes>;
}

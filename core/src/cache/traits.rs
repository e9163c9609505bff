use async_trait::async_trait;
use bytes::Bytes;

use crate::container::ImageContainer;

/// The on-disk byte cache, treated as an external collaborator (§1). Keys
/// are opaque strings produced by [`crate::keys`]; values are opaque bytes.
#[async_trait]
pub trait ByteCache: Send + Sync {
	async fn get(&self, key: &str) -> Option<Bytes>;
	async fn put(&self, key: &str, data: Bytes);
	async fn remove(&self, key: &str);
	async fn remove_all(&self);
	async fn contains(&self, key: &str) -> bool;
}

/// The in-memory image cache, treated as an external collaborator. Expected
/// to be cheap enough to call synchronously from the coordinator's fast
/// path, but modeled as async here so a caller backing it with, say, an
/// actor-based LRU isn't forced into blocking calls.
#[async_trait]
pub trait MemoryImageCache: Send + Sync {
	async fn get(&self, key: &str) -> Option<ImageContainer>;

	/// Must be a no-op for `container.is_preview == true` entries when the
	/// pipeline's `is_storing_previews_in_memory_cache` is disabled — the
	/// pipeline checks this itself before calling `put`, so implementors
	/// can assume every call here is meant to be stored.
	async fn put(&self, key: &str, container: ImageContainer);
	async fn remove(&self, key: &str);
	async fn remove_all(&self);
	async fn contains(&self, key: &str) -> bool;
}

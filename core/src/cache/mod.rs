mod traits;

pub use traits::{ByteCache, MemoryImageCache};

use std::sync::Arc;

use bytes::Bytes;

use crate::{
	config::DataCachePolicy,
	container::{CacheType, ImageContainer},
	decode::{DecodingContext, DecoderRegistry},
	keys,
	request::Request,
};

/// Which cache tier(s) an operation should consider. Drawn from
/// `{memory, disk}` per §4.3 — a plain struct rather than a bitflags crate
/// dependency, since there are exactly two tiers and they're rarely
/// combined with anything beyond "both" or "one".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTiers {
	pub memory: bool,
	pub disk: bool,
}

impl CacheTiers {
	pub const BOTH: Self = Self {
		memory: true,
		disk: true,
	};
	pub const MEMORY_ONLY: Self = Self {
		memory: true,
		disk: false,
	};
	pub const DISK_ONLY: Self = Self {
		memory: false,
		disk: true,
	};
	pub const NONE: Self = Self {
		memory: false,
		disk: false,
	};
}

/// What a [`DataCachePolicy`] says to persist after a successful fetch,
/// derived from the without-processors/with-processors table in §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataCacheWritePlan {
	pub store_original: bool,
	/// When `store_original` is set, whether what gets written is the raw
	/// fetched bytes (`false`) or the decoded image re-encoded through the
	/// configured [`crate::encode::ImageEncoder`] (`true`) — only
	/// `storeEncodedImages` without processors asks for the latter.
	pub store_original_encoded: bool,
	pub store_processed: bool,
}

impl DataCachePolicy {
	#[must_use]
	pub fn write_plan(self, has_processors: bool) -> DataCacheWritePlan {
		use DataCachePolicy::{Automatic, StoreAll, StoreEncodedImages, StoreOriginalData};
		match (self, has_processors) {
			(Automatic, false) => DataCacheWritePlan {
				store_original: true,
				store_original_encoded: false,
				store_processed: false,
			},
			(Automatic, true) => DataCacheWritePlan {
				store_original: false,
				store_original_encoded: false,
				store_processed: true,
			},
			(StoreOriginalData, _) => DataCacheWritePlan {
				store_original: true,
				store_original_encoded: false,
				store_processed: false,
			},
			(StoreEncodedImages, false) => DataCacheWritePlan {
				store_original: true,
				store_original_encoded: true,
				store_processed: false,
			},
			(StoreEncodedImages, true) => DataCacheWritePlan {
				store_original: false,
				store_original_encoded: false,
				store_processed: true,
			},
			(StoreAll, false) => DataCacheWritePlan {
				store_original: true,
				store_original_encoded: false,
				store_processed: false,
			},
			(StoreAll, true) => DataCacheWritePlan {
				store_original: true,
				store_original_encoded: false,
				store_processed: true,
			},
		}
	}
}

/// Facade over the two cache collaborators plus the policy layer that
/// decides what gets written where. Cache-layer write failures are
/// swallowed here (§7) — a cache is advisory, never a reason to fail a
/// user's request.
#[derive(Clone)]
pub struct Cache {
	image_cache: Option<Arc<dyn MemoryImageCache>>,
	data_cache: Option<Arc<dyn ByteCache>>,
	policy: DataCachePolicy,
	is_storing_previews_in_memory_cache: bool,
	decoders: DecoderRegistry,
}

impl Cache {
	#[must_use]
	pub fn new(
		image_cache: Option<Arc<dyn MemoryImageCache>>,
		data_cache: Option<Arc<dyn ByteCache>>,
		policy: DataCachePolicy,
		is_storing_previews_in_memory_cache: bool,
		decoders: DecoderRegistry,
	) -> Self {
		Self {
			image_cache,
			data_cache,
			policy,
			is_storing_previews_in_memory_cache,
			decoders,
		}
	}

	#[must_use]
	pub fn make_image_cache_key(request: &Request) -> String {
		keys::image_key(request)
	}

	#[must_use]
	pub fn make_data_cache_key(request: &Request) -> String {
		keys::data_key_processed(request)
	}

	/// Steps 1-2 of the lookup order (§4.3): a full-key memory cache probe,
	/// then — if that misses and `tiers.disk` allows it — a disk cache probe
	/// at the full-processed key, decoding a hit and promoting it into the
	/// memory tier before returning it.
	pub async fn cached_image(&self, request: &Request, tiers: CacheTiers) -> Option<(ImageContainer, CacheType)> {
		if request.options.reload_ignoring_cached_data {
			return None;
		}
		if tiers.memory && !request.options.disable_memory_cache_reads {
			if let Some(cache) = &self.image_cache {
				if let Some(container) = cache.get(&Self::make_image_cache_key(request)).await {
					return Some((container, CacheType::Memory));
				}
			}
		}
		if tiers.disk && !request.options.disable_disk_cache_reads {
			if let Some(bytes) = self.data_cache_lookup(request).await {
				if let Some(container) = self.decode_cached_bytes(request, &bytes) {
					self.store_cached_image(&container, request, CacheTiers::MEMORY_ONLY).await;
					return Some((container, CacheType::Disk));
				}
			}
		}
		None
	}

	async fn data_cache_lookup(&self, request: &Request) -> Option<Bytes> {
		let cache = self.data_cache.as_ref()?;
		cache.get(&Self::make_data_cache_key(request)).await
	}

	/// Synchronously decodes a complete set of disk-cached processed-image
	/// bytes — no partial/progressive state, since a disk hit is always the
	/// final encoded result.
	fn decode_cached_bytes(&self, request: &Request, bytes: &Bytes) -> Option<ImageContainer> {
		let ctx = DecodingContext {
			response: None,
			is_completed: true,
			thumbnail: request.thumbnail,
		};
		let mut decoder = self.decoders.make_decoder(bytes, &ctx)?;
		decoder.decode(bytes, true).ok().flatten()
	}

	/// Memory-cache probe at a processor-prefix key (§4.3 step 3, §4.6).
	pub async fn cached_image_at_prefix(&self, request: &Request, n: usize) -> Option<ImageContainer> {
		if request.options.reload_ignoring_cached_data || request.options.disable_memory_cache_reads {
			return None;
		}
		let cache = self.image_cache.as_ref()?;
		cache.get(&keys::image_key_prefix(request, n)).await
	}

	pub async fn store_cached_image(&self, container: &ImageContainer, request: &Request, tiers: CacheTiers) {
		if container.is_preview && !self.is_storing_previews_in_memory_cache {
			return;
		}
		if tiers.memory && !request.options.disable_memory_cache_writes {
			if let Some(cache) = &self.image_cache {
				cache.put(&Self::make_image_cache_key(request), container.clone()).await;
			}
		}
	}

	pub async fn cached_data(&self, request: &Request) -> Option<Bytes> {
		if request.options.reload_ignoring_cached_data || request.options.disable_disk_cache_reads {
			return None;
		}
		let cache = self.data_cache.as_ref()?;
		cache.get(&keys::data_key_original(request)).await
	}

	pub async fn store_cached_data(&self, data: Bytes, request: &Request) {
		if request.options.disable_disk_cache_writes {
			return;
		}
		if let Some(cache) = &self.data_cache {
			cache.put(&keys::data_key_original(request), data).await;
		}
	}

	/// Applies the data cache policy plus the local/data-URL special case
	/// to the original bytes of a completed fetch (§4.3 table). Called by
	/// the `FetchOriginalData` driver as soon as it has bytes, independent
	/// of whether a processor chain follows — the "with processors" column
	/// of the table is which decides whether anything actually gets
	/// written here.
	///
	/// Only covers the raw-bytes case (`storeOriginalData`/`storeAll`,
	/// and `storeEncodedImages` with a processor chain, where the encoded
	/// processed image is written separately via [`Self::write_back_processed`]).
	/// `storeEncodedImages` without processors wants the decoded-and-re-encoded
	/// original instead — see [`Self::write_back_original_encoded`].
	pub async fn write_back_original(&self, request: &Request, original: &Bytes) {
		if request.options.disable_disk_cache_writes {
			return;
		}
		let Some(cache) = &self.data_cache else {
			return;
		};

		let has_processors = !request.processors.is_empty();
		let plan = self.policy.write_plan(has_processors);

		// Local/data-URL bytes are already on disk; re-writing them is only
		// worth it once a processor has re-encoded the image into something
		// new (§4.3 special case).
		if plan.store_original
			&& !plan.store_original_encoded
			&& (has_processors || !request.source.is_local_or_data_url())
		{
			cache.put(&keys::data_key_original(request), original.clone()).await;
		}
	}

	/// The `storeEncodedImages`-without-processors half of the original-bytes
	/// row: re-encodes the decoded original through `encoder` and writes
	/// that in place of the raw fetched bytes, at the same original data
	/// key. Called once `FetchDecodedOriginal` has a container, since
	/// unlike [`Self::write_back_original`] this needs a decoded image to
	/// re-encode, not just the network response.
	pub async fn write_back_original_encoded(
		&self,
		request: &Request,
		container: &ImageContainer,
		encoder: &dyn crate::encode::ImageEncoder,
	) {
		if request.options.disable_disk_cache_writes {
			return;
		}
		let Some(cache) = &self.data_cache else {
			return;
		};

		let has_processors = !request.processors.is_empty();
		let plan = self.policy.write_plan(has_processors);
		if !plan.store_original_encoded {
			return;
		}

		if let Some(encoded) = encoder.encode(container) {
			cache.put(&keys::data_key_original(request), encoded).await;
		}
	}

	/// Applies the data cache policy to the final encoded processed image,
	/// called by the terminal `FetchProcessedImage` driver once the last
	/// processor in the chain has produced (or an encoder has produced)
	/// encoded bytes.
	pub async fn write_back_processed(&self, request: &Request, processed: &Bytes) {
		if request.options.disable_disk_cache_writes {
			return;
		}
		let Some(cache) = &self.data_cache else {
			return;
		};

		let has_processors = !request.processors.is_empty();
		let plan = self.policy.write_plan(has_processors);

		if plan.store_processed {
			cache.put(&keys::data_key_processed(request), processed.clone()).await;
		}
	}

	pub async fn remove_cached_image(&self, request: &Request) {
		if let Some(cache) = &self.image_cache {
			cache.remove(&Self::make_image_cache_key(request)).await;
		}
	}

	pub async fn remove_cached_data(&self, request: &Request) {
		if let Some(cache) = &self.data_cache {
			cache.remove(&keys::data_key_original(request)).await;
		}
	}

	pub async fn contains_cached_image(&self, request: &Request) -> bool {
		match &self.image_cache {
			Some(cache) => cache.contains(&Self::make_image_cache_key(request)).await,
			None => false,
		}
	}

	pub async fn contains_cached_data(&self, request: &Request) -> bool {
		match &self.data_cache {
			Some(cache) => cache.contains(&keys::data_key_original(request)).await,
			None => false,
		}
	}

	pub async fn remove_all(&self) {
		if let Some(cache) = &self.image_cache {
			cache.remove_all().await;
		}
		if let Some(cache) = &self.data_cache {
			cache.remove_all().await;
		}
	}
}

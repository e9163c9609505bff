//! Cache key derivation.
//!
//! These strings are part of the external contract (§6): two requests that
//! should coalesce or share a cache entry must derive byte-identical keys,
//! so nothing here is "pretty" — it's grammar, not formatting.

use crate::request::{Request, RequestOptions, ThumbnailOptions, ThumbnailSize};

const THUMBNAIL_NAMESPACE: &str = "com.github/kean/nuke/thumbnail?";

fn thumbnail_suffix(opts: &ThumbnailOptions) -> String {
	let mut suffix = String::from(THUMBNAIL_NAMESPACE);
	match opts.size {
		ThumbnailSize::MaxPixelSize(size) => {
			suffix.push_str(&format!("maxPixelSize={size},"));
		}
		ThumbnailSize::Flexible {
			width,
			height,
			content_mode,
		} => {
			suffix.push_str(&format!(
				"width={width},height={height},contentMode=.{content_mode},"
			));
		}
	}
	suffix.push_str(&format!(
		"options={}{}{}{}",
		opts.create_thumbnail_from_image_always,
		opts.create_thumbnail_from_image_if_absent,
		opts.create_thumbnail_with_transform,
		opts.should_cache_immediately,
	));
	suffix
}

/// Data cache key for the original, un-processed bytes: the load key alone.
#[must_use]
pub fn data_key_original(request: &Request) -> String {
	request.source.load_key().to_string()
}

/// Data cache key for a processed image: the load key followed by every
/// processor identifier in order, or (for a thumbnail request) the load key
/// followed by the canonical thumbnail suffix instead of processor ids.
#[must_use]
pub fn data_key_processed(request: &Request) -> String {
	if let Some(thumbnail) = &request.thumbnail {
		return format!("{}{}", request.source.load_key(), thumbnail_suffix(thumbnail));
	}
	data_key_processed_prefix(request, request.processors.len())
}

/// Data/image key for the processor chain truncated to its first `n`
/// processors (used to probe intermediate-result reuse, §4.6).
#[must_use]
pub fn data_key_processed_prefix(request: &Request, n: usize) -> String {
	let mut key = request.source.load_key().to_string();
	for processor in request.processors.iter().take(n) {
		key.push_str(&processor.id.0);
	}
	key
}

/// Image cache key: load key + processor identifiers + optional scale +
/// optional thumbnail suffix. Unlike the data key, the image key always
/// reflects the full request shape since it identifies a final decoded
/// result, not raw bytes.
#[must_use]
pub fn image_key(request: &Request) -> String {
	let mut key = request.source.load_key().to_string();
	for processor in request.processors.iter() {
		key.push_str(&processor.id.0);
	}
	if let Some(scale) = request.scale {
		key.push_str(&format!("scale={scale},"));
	}
	if let Some(thumbnail) = &request.thumbnail {
		key.push_str(&thumbnail_suffix(thumbnail));
	}
	key
}

/// Image cache key for the processor chain truncated to its first `n`
/// processors, ignoring scale/thumbnail (used for the prefix-reuse probe in
/// §4.3 step 3 and §4.6).
#[must_use]
pub fn image_key_prefix(request: &Request, n: usize) -> String {
	data_key_processed_prefix(request, n)
}

/// Folds every stage-relevant `RequestOptions` bit into a subtask
/// fingerprint suffix. Two requests only coalesce onto the same subtask
/// when their load key *and* this fingerprint match — a
/// `reloadIgnoringCachedData` request and a plain default request for the
/// same URL must never share a subtask, since they don't agree on whether
/// the cache may be consulted at all.
fn options_fingerprint(options: &RequestOptions) -> String {
	format!(
		"#opts={}{}{}{}{}{}{}{}",
		options.disable_memory_cache_reads,
		options.disable_memory_cache_writes,
		options.disable_disk_cache_reads,
		options.disable_disk_cache_writes,
		options.reload_ignoring_cached_data,
		options.return_cache_data_dont_load,
		options.skip_decompression,
		options.skip_data_loading_queue,
	)
}

/// Fingerprint used to key the registry's `FetchOriginalData` subtask for a
/// request: identical load keys and data-cache-relevant options coalesce.
#[must_use]
pub fn fetch_original_key(request: &Request) -> String {
	format!(
		"fetch-original:{}{}",
		data_key_original(request),
		options_fingerprint(&request.options)
	)
}

/// Fingerprint for the `FetchDecodedOriginal` subtask.
#[must_use]
pub fn fetch_decoded_key(request: &Request) -> String {
	format!(
		"fetch-decoded:{}{}",
		data_key_original(request),
		options_fingerprint(&request.options)
	)
}

/// Fingerprint for the `FetchProcessedImage(n)` subtask at prefix `n`
/// (`n == 0` means "decoded original, no processors applied yet" and is
/// never itself scheduled as a processing subtask).
#[must_use]
pub fn fetch_processed_key(request: &Request, n: usize) -> String {
	format!(
		"fetch-processed:{}{}",
		image_key_prefix(request, n),
		options_fingerprint(&request.options)
	)
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::request::{ContentMode, ProcessorId, ProcessorSpec, RequestSource, ThumbnailOptions, ThumbnailSize};

	#[async_trait::async_trait]
	impl crate::process::Processor for () {
		async fn process(
			&self,
			_container: &crate::container::ImageContainer,
			_context: &crate::process::ProcessingContext,
		) -> Result<Option<crate::container::ImageContainer>, Arc<str>> {
			unreachable!("never invoked by key-derivation tests")
		}

		fn identifier(&self) -> &str {
			unreachable!("never invoked by key-derivation tests")
		}
	}

	fn processor(id: &str) -> ProcessorSpec {
		ProcessorSpec {
			id: ProcessorId::from(id),
			processor: Arc::new(()),
		}
	}

	#[test]
	fn data_key_original_is_bare_url() {
		let request = Request::url("https://example.com/a.png");
		assert_eq!(data_key_original(&request), "https://example.com/a.png");
	}

	#[test]
	fn data_key_processed_concatenates_processor_ids_in_order() {
		let request = Request::url("https://example.com/a.png").with_processors([processor("resize"), processor("blur")]);
		assert_eq!(data_key_processed(&request), "https://example.com/a.pngresizeblur");
	}

	#[test]
	fn data_key_processed_prefix_stops_early() {
		let request = Request::url("https://example.com/a.png").with_processors([processor("resize"), processor("blur")]);
		assert_eq!(data_key_processed_prefix(&request, 1), "https://example.com/a.pngresize");
		assert_eq!(data_key_processed_prefix(&request, 0), "https://example.com/a.png");
	}

	#[test]
	fn thumbnail_key_matches_fixed_size_grammar() {
		let request = Request::url("https://example.com/a.png").with_thumbnail(ThumbnailOptions::max_pixel_size(400));
		assert_eq!(
			data_key_processed(&request),
			"https://example.com/a.pngcom.github/kean/nuke/thumbnail?maxPixelSize=400,options=falsetruefalsefalse"
		);
	}

	#[test]
	fn thumbnail_key_matches_flexible_grammar() {
		let request = Request::url("https://example.com/a.png").with_thumbnail(ThumbnailOptions {
			size: ThumbnailSize::Flexible {
				width: 100,
				height: 200,
				content_mode: ContentMode::AspectFill,
			},
			create_thumbnail_from_image_always: true,
			create_thumbnail_from_image_if_absent: false,
			create_thumbnail_with_transform: true,
			should_cache_immediately: true,
		});
		assert_eq!(
			data_key_processed(&request),
			"https://example.com/a.pngcom.github/kean/nuke/thumbnail?width=100,height=200,contentMode=.aspectFill,options=truefalsetruetrue"
		);
	}

	struct NeverLoader;

	#[async_trait::async_trait]
	impl crate::loader::DataLoader for NeverLoader {
		async fn load(
			&self,
			_request: &crate::loader::LoadRequest,
			_sink: async_channel::Sender<crate::loader::LoadChunk>,
		) -> crate::loader::LoadOutcome {
			unreachable!("never invoked by key-derivation tests")
		}
	}

	#[test]
	fn custom_source_keys_off_the_caller_supplied_id() {
		let request = Request::new(RequestSource::Custom {
			id: Arc::from("asset-42"),
			loader: Arc::new(NeverLoader),
		});
		assert_eq!(data_key_original(&request), "asset-42");
	}

	#[test]
	fn image_key_includes_scale_when_present() {
		let request = Request::url("https://example.com/a.png").with_scale(2.0);
		assert_eq!(image_key(&request), "https://example.com/a.pngscale=2,");
	}

	#[test]
	fn fetch_keys_differ_when_options_differ() {
		let plain = Request::url("https://example.com/a.png");
		let mut reload = plain.clone();
		reload.options.reload_ignoring_cached_data = true;

		assert_ne!(fetch_original_key(&plain), fetch_original_key(&reload));
		assert_ne!(fetch_decoded_key(&plain), fetch_decoded_key(&reload));
		assert_ne!(fetch_processed_key(&plain, 0), fetch_processed_key(&reload, 0));
	}
}

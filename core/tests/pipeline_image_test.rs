//! End-to-end scenarios from spec §8, exercised against [`pipeline_core::Pipeline`]
//! with the hand-written fakes in `pipeline_support`.

mod pipeline_support;

use std::sync::Arc;

use pipeline_core::{ByteCache, DataCachePolicy, Error, Pipeline, PipelineConfig, Request, RequestOptions, ThumbnailOptions};
use pipeline_support::{
	fake_decoder_registry, processor_spec, request_for, FakeByteCache, FakeEncoder, FakeLoader, FakeImageCache,
	PanicLoader, TaggingProcessor,
};
use tokio::sync::Notify;

fn container_bytes(container: &pipeline_core::ImageContainer) -> Vec<u8> {
	pipeline_support::image_bytes(container)
}

#[tokio::test]
async fn coalesces_identical_concurrent_requests() {
	let gate = Arc::new(Notify::new());
	let loader = Arc::new(FakeLoader::gated(b"hello".as_slice(), Arc::clone(&gate)));
	let config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0));
	let pipeline = Pipeline::new(config);

	let request = request_for("https://example.com/a.png");
	let task1 = pipeline.image_task(request.clone()).await;
	let task2 = pipeline.image_task(request.clone()).await;

	gate.notify_waiters();
	let (r1, r2) = tokio::join!(task1.wait(), task2.wait());
	let r1 = r1.expect("task1 succeeds");
	let r2 = r2.expect("task2 succeeds");

	assert_eq!(loader.call_count(), 1, "loader must be invoked exactly once");
	assert_eq!(container_bytes(&r1.container), b"hello");
	assert_eq!(container_bytes(&r2.container), b"hello");
}

#[tokio::test]
async fn deduplicates_shared_processor_prefix() {
	let gate = Arc::new(Notify::new());
	let loader = Arc::new(FakeLoader::gated(b"hello".as_slice(), Arc::clone(&gate)));
	let config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0));
	let pipeline = Pipeline::new(config);

	let p1 = Arc::new(TaggingProcessor::new("p1"));
	let p2 = Arc::new(TaggingProcessor::new("p2"));

	let request_short = request_for("https://example.com/a.png").with_processors([processor_spec(p1.clone())]);
	let request_long =
		request_for("https://example.com/a.png").with_processors([processor_spec(p1.clone()), processor_spec(p2.clone())]);

	let task_short = pipeline.image_task(request_short).await;
	let task_long = pipeline.image_task(request_long).await;

	gate.notify_waiters();
	let (short, long) = tokio::join!(task_short.wait(), task_long.wait());
	let short = short.expect("short chain succeeds");
	let long = long.expect("long chain succeeds");

	assert_eq!(loader.call_count(), 1);
	assert_eq!(p1.call_count(), 1, "p1 is shared by both chains, must run once");
	assert_eq!(p2.call_count(), 1);
	assert_eq!(container_bytes(&short.container), b"hellop1");
	assert_eq!(container_bytes(&long.container), b"hellop1p2");
}

#[tokio::test]
async fn progressive_decoding_emits_previews_then_one_final() {
	let payload = b"AAAABBBBCCCC".to_vec();
	let loader = Arc::new(pipeline_support::ChunkedLoader::new(vec![
		payload[0..4].to_vec(),
		payload[4..8].to_vec(),
		payload[8..12].to_vec(),
	]));
	// Chunk 1 alone (4 bytes) is below the preview threshold and is skipped;
	// chunks 2 and 3 each cross it, yielding exactly two previews.
	let mut config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(5));
	config.is_storing_previews_in_memory_cache = true;
	let image_cache = Arc::new(FakeImageCache::default());
	config.image_cache = Some(image_cache.clone());
	let pipeline = Pipeline::new(config);

	let request = request_for("https://example.com/a.png");
	let task = pipeline.image_task(request).await;
	let mut previews = task.previews();

	use futures::StreamExt;
	let preview1 = previews.next().await.expect("first preview");
	let preview2 = previews.next().await.expect("second preview");
	assert!(preview1.is_preview);
	assert!(preview2.is_preview);
	assert_eq!(container_bytes(&preview1), b"AAAABBBB");
	assert_eq!(container_bytes(&preview2), b"AAAABBBBCCCC");

	let result = task.wait().await.expect("final decode succeeds");
	assert!(!result.container.is_preview);
	assert_eq!(container_bytes(&result.container), b"AAAABBBBCCCC");
	assert_eq!(image_cache.len().await, 1, "final overwrites the previews in the memory cache");
}

#[tokio::test]
async fn automatic_policy_with_processor_stores_only_processed_bytes() {
	let loader = Arc::new(FakeLoader::new(b"hello".as_slice()));
	let data_cache = Arc::new(FakeByteCache::default());
	let encoder = Arc::new(FakeEncoder::new());
	let config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0))
		.with_data_cache(data_cache.clone())
		.with_image_encoder(encoder.clone());
	let pipeline = Pipeline::new(config);

	let p1 = Arc::new(TaggingProcessor::new("p1"));
	let request = request_for("https://example.com/a.png").with_processors([processor_spec(p1)]);
	pipeline.image_task(request).await.wait().await.expect("request succeeds");

	assert_eq!(data_cache.keys().await, vec!["https://example.com/a.pngp1".to_string()]);
	assert_eq!(encoder.call_count(), 1);
}

#[tokio::test]
async fn store_original_data_policy_ignores_processors_for_disk_writes() {
	let gate = Arc::new(Notify::new());
	let loader = Arc::new(FakeLoader::gated(b"hello".as_slice(), Arc::clone(&gate)));
	let data_cache = Arc::new(FakeByteCache::default());
	let encoder = Arc::new(FakeEncoder::new());
	let config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0))
		.with_data_cache(data_cache.clone())
		.with_data_cache_policy(DataCachePolicy::StoreOriginalData)
		.with_image_encoder(encoder.clone());
	let pipeline = Pipeline::new(config);

	let p1 = Arc::new(TaggingProcessor::new("p1"));
	let url = "https://example.com/a.png";
	let plain = request_for(url);
	let processed = request_for(url).with_processors([processor_spec(p1)]);

	let plain_task = pipeline.image_task(plain).await;
	let processed_task = pipeline.image_task(processed).await;
	gate.notify_waiters();

	let (a, b) = tokio::join!(plain_task.wait(), processed_task.wait());
	a.expect("plain request succeeds");
	b.expect("processed request succeeds");

	assert_eq!(loader.call_count(), 1);
	assert_eq!(data_cache.keys().await, vec![url.to_string()]);
	assert_eq!(encoder.call_count(), 0, "storeOriginalData never persists a processed image");
}

#[tokio::test]
async fn thumbnail_request_resizes_the_image_but_caches_the_original_bytes() {
	let loader = Arc::new(FakeLoader::new(b"original-640x480-source".as_slice()));
	let data_cache = Arc::new(FakeByteCache::default());
	let config =
		PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0)).with_data_cache(data_cache.clone());
	let pipeline = Pipeline::new(config);

	let request = request_for("https://example.com/a.png").with_thumbnail(ThumbnailOptions::max_pixel_size(400));
	let result = pipeline.image_task(request).await.wait().await.expect("thumbnail request succeeds");

	assert_eq!(
		pipeline_support::image_dims(&result.container),
		(400, 300),
		"maxPixelSize=400 on a 640x480 source scales to 400x300"
	);

	// `automatic` without processors retains the original bytes at the bare
	// url key, not a thumbnail-suffixed one — nothing ever writes the
	// thumbnail itself to disk since it isn't produced by a processor chain.
	assert_eq!(data_cache.keys().await, vec!["https://example.com/a.png".to_string()]);
	let stored = data_cache.get("https://example.com/a.png").await.expect("original retained on disk");
	assert_eq!(stored.as_ref(), b"original-640x480-source");
}

#[tokio::test]
async fn store_encoded_images_policy_without_processors_reencodes_the_original() {
	let loader = Arc::new(FakeLoader::new(b"raw-bytes".as_slice()));
	let data_cache = Arc::new(FakeByteCache::default());
	let encoder = Arc::new(FakeEncoder::new());
	let config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0))
		.with_data_cache(data_cache.clone())
		.with_data_cache_policy(DataCachePolicy::StoreEncodedImages)
		.with_image_encoder(encoder.clone());
	let pipeline = Pipeline::new(config);

	let url = "https://example.com/a.png";
	pipeline.image_task(request_for(url)).await.wait().await.expect("request succeeds");

	assert_eq!(
		encoder.call_count(),
		1,
		"storeEncodedImages without processors must re-encode the decoded original, not just persist raw bytes"
	);
	assert_eq!(data_cache.keys().await, vec![url.to_string()]);
	let stored = data_cache.get(url).await.expect("encoded original stored");
	assert_eq!(
		stored.as_ref(),
		b"raw-bytes:encoded",
		"the disk entry must be the re-encoded image, not the verbatim network bytes"
	);
}

#[tokio::test]
async fn cancelling_one_coalesced_subscriber_does_not_affect_the_other() {
	let gate = Arc::new(Notify::new());
	let loader = Arc::new(FakeLoader::gated(b"hello".as_slice(), Arc::clone(&gate)));
	let config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0));
	let pipeline = Pipeline::new(config);

	let request = request_for("https://example.com/a.png");
	let task1 = pipeline.image_task(request.clone()).await;
	let task2 = pipeline.image_task(request.clone()).await;

	task1.cancel().await;
	gate.notify_waiters();

	let result2 = task2.wait().await;
	assert!(result2.is_ok(), "the surviving subscriber must still complete");
	assert_eq!(loader.call_count(), 1, "cancelling one subscriber must not cancel the shared fetch");
}

#[tokio::test]
async fn return_cache_data_dont_load_fails_fast_on_empty_caches() {
	let loader = Arc::new(PanicLoader);
	let config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0));
	let pipeline = Pipeline::new(config);

	let request = request_for("https://example.com/a.png").with_options(RequestOptions {
		return_cache_data_dont_load: true,
		..Default::default()
	});
	let result = pipeline.data_task(request).await.wait().await;

	assert!(matches!(result, Err(Error::DataMissingInCache)));
}

#[tokio::test]
async fn invalidate_fails_every_live_and_future_attach() {
	let gate = Arc::new(Notify::new());
	let loader = Arc::new(FakeLoader::gated(b"hello".as_slice(), Arc::clone(&gate)));
	let config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0));
	let pipeline = Pipeline::new(config);

	let request = request_for("https://example.com/a.png");
	let task = pipeline.image_task(request.clone()).await;
	pipeline.invalidate().await;

	let result = task.wait().await;
	assert!(matches!(result, Err(Error::PipelineInvalidated)));

	let late = pipeline.image_task(request).await.wait().await;
	assert!(matches!(late, Err(Error::PipelineInvalidated)));
}

#[tokio::test]
async fn disk_cache_round_trip_and_remove_all() {
	let loader = Arc::new(FakeLoader::new(b"hello".as_slice()));
	let data_cache = Arc::new(FakeByteCache::default());
	let config = PipelineConfig::new(Arc::clone(&loader) as _, fake_decoder_registry(0)).with_data_cache(data_cache.clone());
	let pipeline = Pipeline::new(config);

	let request = request_for("https://example.com/a.png");
	pipeline.data_task(request.clone()).await.wait().await.expect("first fetch");
	assert!(pipeline.contains_cached_data(&request).await);

	pipeline.remove_all_cached().await;
	assert!(!pipeline.contains_cached_data(&request).await);
	assert_eq!(data_cache.len().await, 0);
}

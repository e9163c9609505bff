use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use downcast_rs::{impl_downcast, DowncastSync};

use crate::{loader::ResponseMetadata, request::Request};

/// A decoded image payload, erased so this crate never needs to know the
/// concrete pixel-buffer type a platform's decoder produces.
pub trait DecodedImage: DowncastSync + fmt::Debug {}
impl_downcast!(sync DecodedImage);

/// The result of a decode (or processing) step: a decoded image plus
/// whatever encoded bytes are worth retaining, and whether this is a
/// preview or the final result.
#[derive(Clone)]
pub struct ImageContainer {
	pub image: Arc<dyn DecodedImage>,
	/// Encoded bytes for this container, if the decoder/processor produced
	/// or retained them (needed to write back into the disk cache without
	/// re-encoding).
	pub data: Option<Bytes>,
	/// MIME-ish type tag for `data`, e.g. `"image/webp"`.
	pub r#type: Option<Arc<str>>,
	/// `true` for a partially decoded scan emitted during progressive
	/// streaming; at most the most recent preview and exactly one
	/// non-preview final container are ever delivered per subtask (I4).
	pub is_preview: bool,
	pub user_info: Arc<HashMap<String, String>>,
}

impl fmt::Debug for ImageContainer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ImageContainer")
			.field("is_preview", &self.is_preview)
			.field("type", &self.r#type)
			.field("data_len", &self.data.as_ref().map(Bytes::len))
			.finish()
	}
}

impl ImageContainer {
	#[must_use]
	pub fn final_with_image(image: Arc<dyn DecodedImage>) -> Self {
		Self {
			image,
			data: None,
			r#type: None,
			is_preview: false,
			user_info: Arc::new(HashMap::new()),
		}
	}

	#[must_use]
	pub fn preview_of(&self, image: Arc<dyn DecodedImage>) -> Self {
		Self {
			image,
			data: None,
			r#type: self.r#type.clone(),
			is_preview: true,
			user_info: Arc::clone(&self.user_info),
		}
	}
}

/// Which cache tier, if any, served a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
	Memory,
	Disk,
}

/// What a subscriber's `.response`/`.image` settles to, or what a `finished`
/// event carries.
#[derive(Clone, Debug)]
pub struct ImageResponse {
	pub container: ImageContainer,
	pub request: Request,
	/// Response metadata for the network fetch that produced this result, if
	/// any (absent for a cache hit or a `Custom`/`Published` source).
	pub url_response: Option<ResponseMetadata>,
	pub cache_type: Option<CacheType>,
}

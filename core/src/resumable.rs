use std::{collections::HashMap, sync::Mutex};

use bytes::{Bytes, BytesMut};

/// Partial bytes and the validator needed to resume a load, retained after
/// a recoverable drop (§4.7). One entry per load key; a fresh successful
/// fetch clears its entry.
pub struct ResumableDataStore {
	entries: Mutex<HashMap<String, ResumableEntry>>,
}

struct ResumableEntry {
	validator: String,
	bytes_so_far: BytesMut,
}

impl ResumableDataStore {
	#[must_use]
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// Records (or extends) the partial bytes retained for `load_key`. Only
	/// called when the response advertised `Accept-Ranges: bytes`.
	pub fn retain(&self, load_key: &str, validator: String, bytes_so_far: Bytes) {
		let mut entries = self.entries.lock().expect("resumable data store poisoned");
		entries.insert(
			load_key.to_string(),
			ResumableEntry {
				validator,
				bytes_so_far: BytesMut::from(&bytes_so_far[..]),
			},
		);
	}

	/// Returns `(resume_offset, validator)` for a `Range`/`If-Range` retry,
	/// if bytes are retained for this key.
	#[must_use]
	pub fn resume_point(&self, load_key: &str) -> Option<(u64, String)> {
		let entries = self.entries.lock().expect("resumable data store poisoned");
		entries
			.get(load_key)
			.map(|entry| (entry.bytes_so_far.len() as u64, entry.validator.clone()))
	}

	/// Concatenates freshly received bytes onto the retained prefix and
	/// returns the joined buffer, consuming the retained entry.
	#[must_use]
	pub fn take_and_extend(&self, load_key: &str, rest: &Bytes) -> Option<Bytes> {
		let mut entries = self.entries.lock().expect("resumable data store poisoned");
		let mut entry = entries.remove(load_key)?;
		entry.bytes_so_far.extend_from_slice(rest);
		Some(entry.bytes_so_far.freeze())
	}

	pub fn clear(&self, load_key: &str) {
		self.entries.lock().expect("resumable data store poisoned").remove(load_key);
	}
}

impl Default for ResumableDataStore {
	fn default() -> Self {
		Self::new()
	}
}

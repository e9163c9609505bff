use std::sync::atomic::{AtomicU64, Ordering};

/// Cheap always-on counters. Not persisted anywhere — a snapshot method, not
/// a reporting pipeline; persistence/telemetry export is out of scope here.
#[derive(Default)]
pub struct PipelineMetrics {
	memory_cache_hits: AtomicU64,
	memory_cache_misses: AtomicU64,
	disk_cache_hits: AtomicU64,
	disk_cache_misses: AtomicU64,
	coalesced_attaches: AtomicU64,
	network_fetches: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineMetricsSnapshot {
	pub memory_cache_hits: u64,
	pub memory_cache_misses: u64,
	pub disk_cache_hits: u64,
	pub disk_cache_misses: u64,
	pub coalesced_attaches: u64,
	pub network_fetches: u64,
}

impl PipelineMetrics {
	pub(crate) fn record_memory_hit(&self) {
		self.memory_cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_memory_miss(&self) {
		self.memory_cache_misses.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_disk_hit(&self) {
		self.disk_cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_disk_miss(&self) {
		self.disk_cache_misses.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_coalesced_attach(&self) {
		self.coalesced_attaches.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_network_fetch(&self) {
		self.network_fetches.fetch_add(1, Ordering::Relaxed);
	}

	#[must_use]
	pub fn snapshot(&self) -> PipelineMetricsSnapshot {
		PipelineMetricsSnapshot {
			memory_cache_hits: self.memory_cache_hits.load(Ordering::Relaxed),
			memory_cache_misses: self.memory_cache_misses.load(Ordering::Relaxed),
			disk_cache_hits: self.disk_cache_hits.load(Ordering::Relaxed),
			disk_cache_misses: self.disk_cache_misses.load(Ordering::Relaxed),
			coalesced_attaches: self.coalesced_attaches.load(Ordering::Relaxed),
			network_fetches: self.network_fetches.load(Ordering::Relaxed),
		}
	}
}

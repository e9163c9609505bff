use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token-bucket limiter gating new data-loading operations. Bypassed
/// entirely for requests carrying `skipDataLoadingQueue` (callers check
/// that before calling [`RateLimiter::acquire`] at all).
pub struct RateLimiter {
	capacity: f64,
	refill_per_second: f64,
	state: Mutex<BucketState>,
}

struct BucketState {
	tokens: f64,
	last_refill: Instant,
}

impl RateLimiter {
	#[must_use]
	pub fn new(capacity: u32, refill_per_second: u32) -> Self {
		Self {
			capacity: f64::from(capacity),
			refill_per_second: f64::from(refill_per_second),
			state: Mutex::new(BucketState {
				tokens: f64::from(capacity),
				last_refill: Instant::now(),
			}),
		}
	}

	/// Waits until a single token is available, then consumes it.
	pub async fn acquire(&self) {
		loop {
			let wait = {
				let mut state = self.state.lock().await;
				self.refill(&mut state);

				if state.tokens >= 1.0 {
					state.tokens -= 1.0;
					None
				} else {
					let deficit = 1.0 - state.tokens;
					Some(std::time::Duration::from_secs_f64(deficit / self.refill_per_second))
				}
			};

			match wait {
				None => return,
				Some(duration) => tokio::time::sleep(duration).await,
			}
		}
	}

	fn refill(&self, state: &mut BucketState) {
		let now = Instant::now();
		let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
		state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
		state.last_refill = now;
	}
}

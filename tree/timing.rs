use num_traits::ToPrimitive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Time spent in each phase of `LinearObliviousTreeLearner::fit`, accumulated across calls.
#[derive(Debug)]
pub struct Timing {
	pub cache_dataset: TimingDuration,
	pub compute_root_stats: TimingDuration,
	pub compute_histograms: TimingDuration,
	pub choose_split: TimingDuration,
	pub partition: TimingDuration,
	pub fit_leaves: TimingDuration,
	pub total: TimingDuration,
}

pub struct TimingDuration(AtomicU64);

impl Timing {
	pub fn new() -> Timing {
		Timing {
			cache_dataset: TimingDuration::new(),
			compute_root_stats: TimingDuration::new(),
			compute_histograms: TimingDuration::new(),
			choose_split: TimingDuration::new(),
			partition: TimingDuration::new(),
			fit_leaves: TimingDuration::new(),
			total: TimingDuration::new(),
		}
	}
}

impl Default for Timing {
	fn default() -> Timing {
		Timing::new()
	}
}

impl TimingDuration {
	pub fn new() -> Self {
		Self(AtomicU64::new(0))
	}
	pub fn get(&self) -> Duration {
		Duration::from_nanos(self.0.load(Ordering::Relaxed))
	}
	pub fn inc(&self, value: Duration) -> u64 {
		let nanos = value.as_nanos().to_u64().unwrap_or(u64::MAX);
		self.0.fetch_add(nanos, Ordering::Relaxed)
	}
}

impl Default for TimingDuration {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for TimingDuration {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:?}", self.get())
	}
}

#[test]
fn test_timing_duration_accumulates() {
	let duration = TimingDuration::new();
	duration.inc(Duration::from_millis(3));
	duration.inc(Duration::from_millis(4));
	assert_eq!(duration.get(), Duration::from_millis(7));
	assert_eq!(format!("{:?}", duration), "7ms");
}

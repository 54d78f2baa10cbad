use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for cancellable read acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
	/// Number of yield-and-retry attempts before a cancellable reader parks.
	#[serde(default = "default_read_spin_attempts")]
	pub read_spin_attempts: u32,
	/// How often a parked cancellable reader re-checks its cancellation token, in milliseconds.
	#[serde(default = "default_cancellation_poll_ms")]
	pub cancellation_poll_ms: u64,
}

fn default_read_spin_attempts() -> u32 {
	100
}

fn default_cancellation_poll_ms() -> u64 {
	1
}

impl CoordinatorConfig {
	/// Sets the spin attempts before parking.
	#[must_use]
	pub fn read_spin_attempts(mut self, attempts: u32) -> Self {
		self.read_spin_attempts = attempts;
		self
	}

	/// Sets the cancellation poll interval.
	///
	/// # Panics
	///
	/// Panics if `interval` is zero.
	#[must_use]
	pub fn cancellation_poll(mut self, interval: Duration) -> Self {
		assert!(!interval.is_zero(), "cancellation poll interval must be > 0");
		self.cancellation_poll_ms = interval.as_millis().max(1) as u64;
		self
	}

	pub(crate) fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.cancellation_poll_ms.max(1))
	}
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			read_spin_attempts: default_read_spin_attempts(),
			cancellation_poll_ms: default_cancellation_poll_ms(),
		}
	}
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the read scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
	/// Delay before an attempt blocked by an unsatisfied constraint is retried, in milliseconds.
	#[serde(default = "default_constraint_retry_ms")]
	pub constraint_retry_ms: u64,
	/// Ceiling on tasks in flight on unbounded executors.
	#[serde(default = "default_max_unbounded_in_flight")]
	pub max_unbounded_in_flight: usize,
	/// Re-raise asynchronous failures on the dispatch thread.
	#[serde(default)]
	pub strict: bool,
}

fn default_constraint_retry_ms() -> u64 {
	10
}

fn default_max_unbounded_in_flight() -> usize {
	1024
}

impl SchedulerConfig {
	/// Sets the constraint retry delay.
	#[must_use]
	pub fn constraint_retry_interval(mut self, interval: Duration) -> Self {
		self.constraint_retry_ms = interval.as_millis() as u64;
		self
	}

	/// Sets the unbounded in-flight ceiling.
	#[must_use]
	pub fn max_unbounded_in_flight(mut self, limit: usize) -> Self {
		self.max_unbounded_in_flight = limit;
		self
	}

	/// Enables or disables strict mode.
	#[must_use]
	pub fn strict(mut self, strict: bool) -> Self {
		self.strict = strict;
		self
	}

	pub(crate) fn retry_interval(&self) -> Duration {
		Duration::from_millis(self.constraint_retry_ms)
	}
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			constraint_retry_ms: default_constraint_retry_ms(),
			max_unbounded_in_flight: default_max_unbounded_in_flight(),
			strict: false,
		}
	}
}

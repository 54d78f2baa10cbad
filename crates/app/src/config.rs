use std::path::Path;

use quire_lock::CoordinatorConfig;
use quire_nonblocking::SchedulerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading an [`ApplicationConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("invalid configuration: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("invalid value for `{field}`: {reason}")]
	Invalid { field: &'static str, reason: &'static str },
}

/// Combined configuration for the coordinator and the read scheduler.
///
/// ```toml
/// [coordinator]
/// read_spin_attempts = 50
///
/// [scheduler]
/// strict = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
	#[serde(default)]
	pub coordinator: CoordinatorConfig,
	#[serde(default)]
	pub scheduler: SchedulerConfig,
}

impl ApplicationConfig {
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(source)?;
		config.validate()?;
		Ok(config)
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.display().to_string(),
			source,
		})?;
		Self::from_toml_str(&source)
	}

	#[must_use]
	pub fn coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
		self.coordinator = coordinator;
		self
	}

	#[must_use]
	pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
		self.scheduler = scheduler;
		self
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.coordinator.cancellation_poll_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "coordinator.cancellation_poll_ms",
				reason: "must be at least 1",
			});
		}
		if self.scheduler.max_unbounded_in_flight == 0 {
			return Err(ConfigError::Invalid {
				field: "scheduler.max_unbounded_in_flight",
				reason: "no task could ever be submitted to an unbounded executor",
			});
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_document_yields_defaults() {
		let config = ApplicationConfig::from_toml_str("").unwrap();
		assert_eq!(config, ApplicationConfig::default());
		assert_eq!(config.scheduler.max_unbounded_in_flight, 1024);
		assert!(!config.scheduler.strict);
	}

	#[test]
	fn partial_tables_keep_remaining_defaults() {
		let config = ApplicationConfig::from_toml_str(
			r#"
			[coordinator]
			read_spin_attempts = 8

			[scheduler]
			strict = true
			constraint_retry_ms = 3
			"#,
		)
		.unwrap();

		assert_eq!(config.coordinator.read_spin_attempts, 8);
		assert_eq!(config.coordinator.cancellation_poll_ms, CoordinatorConfig::default().cancellation_poll_ms);
		assert!(config.scheduler.strict);
		assert_eq!(config.scheduler.constraint_retry_ms, 3);
		assert_eq!(config.scheduler.max_unbounded_in_flight, 1024);
	}

	#[test]
	fn unknown_sections_are_rejected() {
		let err = ApplicationConfig::from_toml_str("[lsp]\nenabled = true\n").unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)));
	}

	#[test]
	fn wrong_types_are_rejected() {
		let err = ApplicationConfig::from_toml_str("[scheduler]\nstrict = \"yes\"\n").unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)));
	}

	#[test]
	fn zero_limits_fail_validation() {
		let err = ApplicationConfig::from_toml_str("[scheduler]\nmax_unbounded_in_flight = 0\n").unwrap_err();
		assert!(matches!(
			err,
			ConfigError::Invalid {
				field: "scheduler.max_unbounded_in_flight",
				..
			}
		));

		let err = ApplicationConfig::from_toml_str("[coordinator]\ncancellation_poll_ms = 0\n").unwrap_err();
		assert!(err.to_string().contains("coordinator.cancellation_poll_ms"));
	}

	#[test]
	fn missing_file_reports_path() {
		let err = ApplicationConfig::load("/nonexistent/quire.toml").unwrap_err();
		assert!(matches!(err, ConfigError::Io { .. }));
		assert!(err.to_string().contains("/nonexistent/quire.toml"));
	}

	#[test]
	fn setters_replace_sections() {
		let config = ApplicationConfig::default().scheduler(SchedulerConfig::default().strict(true));
		assert!(config.scheduler.strict);
		assert_eq!(config.coordinator, CoordinatorConfig::default());
	}
}

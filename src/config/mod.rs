use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-worker configuration: everything about a slot except its unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Display name, also used as the log prefix
    #[serde(default = "default_worker_name")]
    pub name: String,

    /// Number of successful iterations before the worker exits (unset = unbounded)
    #[serde(default)]
    pub max_iterations: Option<u64>,

    /// Resident memory (MB) at which the manager asks the worker to stop
    #[serde(default = "default_soft_memory_limit")]
    pub soft_memory_limit_mb: f64,

    /// Resident memory (MB) at which the manager kills the worker outright
    #[serde(default = "default_hard_memory_limit")]
    pub hard_memory_limit_mb: f64,

    /// Per-iteration deadline in seconds
    #[serde(default)]
    pub timeout_secs: Option<f64>,

    /// Pause between iterations in seconds
    #[serde(default)]
    pub check_point_secs: Option<f64>,
}

// Default value functions for serde
fn default_worker_name() -> String {
    "Process".to_string()
}

fn default_soft_memory_limit() -> f64 {
    200.0
}

fn default_hard_memory_limit() -> f64 {
    300.0
}

fn default_manager_check_point() -> f64 {
    10.0
}

fn default_wait_time() -> f64 {
    3.0
}

fn default_title() -> String {
    "Workers Daemon".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            max_iterations: None,
            soft_memory_limit_mb: default_soft_memory_limit(),
            hard_memory_limit_mb: default_hard_memory_limit(),
            timeout_secs: None,
            check_point_secs: None,
        }
    }
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_memory_limits(mut self, soft_mb: f64, hard_mb: f64) -> Self {
        self.soft_memory_limit_mb = soft_mb;
        self.hard_memory_limit_mb = hard_mb;
        self
    }

    pub fn with_timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_check_point_secs(mut self, secs: f64) -> Self {
        self.check_point_secs = Some(secs);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WardenError::MissingConfigField("name".to_string()));
        }

        for (field, value) in [
            ("soft_memory_limit_mb", self.soft_memory_limit_mb),
            ("hard_memory_limit_mb", self.hard_memory_limit_mb),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(WardenError::ConfigValidationError(format!(
                    "{}: {} must be a positive number, got {}",
                    self.name, field, value
                )));
            }
        }

        if self.soft_memory_limit_mb > self.hard_memory_limit_mb {
            return Err(WardenError::ConfigValidationError(format!(
                "{}: soft memory limit {}M exceeds hard memory limit {}M",
                self.name, self.soft_memory_limit_mb, self.hard_memory_limit_mb
            )));
        }

        validate_secs(&self.name, "timeout_secs", self.timeout_secs)?;
        validate_secs(&self.name, "check_point_secs", self.check_point_secs)?;

        Ok(())
    }

    /// Iteration bound; `None` when unset or zero
    pub fn iteration_limit(&self) -> Option<u64> {
        self.max_iterations.filter(|max| *max > 0)
    }

    /// Per-iteration deadline; `None` when unset or zero
    pub fn timeout(&self) -> Option<Duration> {
        positive_duration(self.timeout_secs)
    }

    /// Pause between iterations; `None` when unset or zero
    pub fn check_point(&self) -> Option<Duration> {
        positive_duration(self.check_point_secs)
    }

    pub fn reached_soft_memory_limit(&self, memory_mb: f64) -> bool {
        memory_mb >= self.soft_memory_limit_mb
    }

    pub fn reached_hard_memory_limit(&self, memory_mb: f64) -> bool {
        memory_mb >= self.hard_memory_limit_mb
    }
}

/// Supervisor-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Interval between supervisory passes in seconds
    #[serde(default = "default_manager_check_point")]
    pub check_point_secs: f64,

    /// Grace period granted to children at shutdown, in seconds
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: f64,

    /// Banner text logged at startup
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            check_point_secs: default_manager_check_point(),
            wait_time_secs: default_wait_time(),
            title: default_title(),
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.check_point_secs.is_nan() || self.check_point_secs <= 0.0 {
            return Err(WardenError::ConfigValidationError(format!(
                "check_point_secs must be a positive number, got {}",
                self.check_point_secs
            )));
        }

        validate_secs(&self.title, "check_point_secs", Some(self.check_point_secs))?;
        validate_secs(&self.title, "wait_time_secs", Some(self.wait_time_secs))?;

        Ok(())
    }

    pub fn check_point(&self) -> Duration {
        Duration::try_from_secs_f64(self.check_point_secs).unwrap_or(Duration::MAX)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.wait_time_secs).unwrap_or(Duration::MAX)
    }
}

fn validate_secs(owner: &str, field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(secs) if Duration::try_from_secs_f64(secs).is_err() => {
            Err(WardenError::ConfigValidationError(format!(
                "{}: {} must be a non-negative, representable number of seconds, got {}",
                owner, field, secs
            )))
        }
        _ => Ok(()),
    }
}

fn positive_duration(secs: Option<f64>) -> Option<Duration> {
    secs.and_then(|s| Duration::try_from_secs_f64(s).ok())
        .filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.name, "Process");
        assert_eq!(config.max_iterations, None);
        assert_eq!(config.soft_memory_limit_mb, 200.0);
        assert_eq!(config.hard_memory_limit_mb, 300.0);
        assert!(config.timeout().is_none());
        assert!(config.check_point().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_config_deserialize_with_defaults() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"name": "mailer", "max_iterations": 5, "timeout_secs": 2.5}"#)
                .unwrap();
        assert_eq!(config.name, "mailer");
        assert_eq!(config.max_iterations, Some(5));
        assert_eq!(config.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.hard_memory_limit_mb, 300.0);
    }

    #[test]
    fn test_zero_timeout_means_unset() {
        let config = WorkerConfig::new("w")
            .with_timeout_secs(0.0)
            .with_check_point_secs(0.0);
        assert!(config.validate().is_ok());
        assert!(config.timeout().is_none());
        assert!(config.check_point().is_none());
    }

    #[test]
    fn test_validate_empty_name() {
        let config = WorkerConfig::new("  ");
        assert!(matches!(
            config.validate(),
            Err(WardenError::MissingConfigField(_))
        ));
    }

    #[test]
    fn test_validate_soft_above_hard() {
        let config = WorkerConfig::new("w").with_memory_limits(50.0, 10.0);
        match config.validate() {
            Err(WardenError::ConfigValidationError(msg)) => {
                assert!(msg.contains("exceeds hard memory limit"));
            }
            other => panic!("Expected ConfigValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_negative_timeout() {
        let config = WorkerConfig::new("w").with_timeout_secs(-1.0);
        assert!(config.validate().is_err());

        let config = WorkerConfig::new("w").with_check_point_secs(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_iterations_means_unbounded() {
        let config = WorkerConfig::new("w").with_max_iterations(0);
        assert!(config.validate().is_ok());
        assert_eq!(config.iteration_limit(), None);
        assert_eq!(config.with_max_iterations(4).iteration_limit(), Some(4));
    }

    #[test]
    fn test_validate_rejects_unrepresentable_seconds() {
        let config = WorkerConfig::new("w").with_timeout_secs(1e20);
        assert!(config.validate().is_err());
        assert!(config.timeout().is_none());

        let config = WorkerConfig::new("w").with_check_point_secs(f64::INFINITY);
        assert!(config.validate().is_err());

        let config = ManagerConfig {
            check_point_secs: 1e20,
            ..ManagerConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.check_point(), Duration::MAX);

        let config = ManagerConfig {
            wait_time_secs: 1e20,
            ..ManagerConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.wait_time(), Duration::MAX);
    }

    #[test]
    fn test_memory_limit_thresholds_are_inclusive() {
        let config = WorkerConfig::new("w").with_memory_limits(5.0, 10.0);
        assert!(!config.reached_soft_memory_limit(4.99));
        assert!(config.reached_soft_memory_limit(5.0));
        assert!(!config.reached_hard_memory_limit(9.99));
        assert!(config.reached_hard_memory_limit(10.0));
    }

    #[test]
    fn test_manager_config_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.check_point(), Duration::from_secs(10));
        assert_eq!(config.wait_time(), Duration::from_secs(3));
        assert_eq!(config.title, "Workers Daemon");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_manager_config_rejects_zero_check_point() {
        let config = ManagerConfig {
            check_point_secs: 0.0,
            ..ManagerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_manager_config_from_json() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"check_point_secs": 1, "title": "Mailers"}"#).unwrap();
        assert_eq!(config.check_point(), Duration::from_secs(1));
        assert_eq!(config.wait_time(), Duration::from_secs(3));
        assert_eq!(config.title, "Mailers");
    }
}

//! Engine configuration
//!
//! Limits and timings shared by the submission service, the dispatcher and
//! the aggregator. Binaries fill this from their own environment-driven
//! configuration.

use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Largest accepted serialized job input
    pub max_input_bytes: usize,

    /// Largest accepted batch
    pub max_batch_items: usize,

    /// Ceiling on non-terminal top-level jobs per owner
    pub max_active_jobs_per_owner: u32,

    /// Admission limit applied when a batch does not ask for one
    pub default_max_concurrent: u32,

    /// Dispatch attempts before a transient failure becomes terminal
    pub max_attempts: u32,

    /// First retry delay; doubled on every further attempt
    pub retry_base_delay: Duration,

    /// Upper bound on the retry delay
    pub retry_max_delay: Duration,

    /// Caller-imposed limit on one executor invocation
    pub execution_timeout: Duration,

    /// How long a leased message stays hidden; renewed at half this interval
    pub visibility_timeout: Duration,

    /// How often a running dispatch checks for cancellation
    pub cancel_poll_interval: Duration,

    /// Results larger than this are written to the object store
    pub inline_output_limit: usize,

    /// Local retries of a batch recomputation that lost a race
    pub aggregation_max_retries: u32,

    /// Page size used when reading all children of a batch
    pub aggregation_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: 1024 * 1024,
            max_batch_items: 1000,
            max_active_jobs_per_owner: 100,
            default_max_concurrent: 16,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(15 * 60),
            visibility_timeout: Duration::from_secs(60),
            cancel_poll_interval: Duration::from_secs(5),
            inline_output_limit: 64 * 1024,
            aggregation_max_retries: 8,
            aggregation_page_size: 200,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.default_max_concurrent == 0 {
            return Err("default_max_concurrent must be greater than 0".to_string());
        }

        if self.max_batch_items == 0 {
            return Err("max_batch_items must be greater than 0".to_string());
        }

        if self.visibility_timeout.is_zero() {
            return Err("visibility_timeout must be greater than 0".to_string());
        }

        if self.aggregation_max_retries == 0 || self.aggregation_page_size == 0 {
            return Err("aggregation retries and page size must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.max_attempts = 0;
        assert!(config.validate().is_err());

        config.max_attempts = 1;
        config.default_max_concurrent = 0;
        assert!(config.validate().is_err());

        config.default_max_concurrent = 4;
        assert!(config.validate().is_ok());
    }
}

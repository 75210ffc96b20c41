use crate::error::FreezeError;
use std::time::Duration;

/// Runtime configuration for a log stream freezer.
///
/// The freezer keeps an immutable `Arc` snapshot of this value for its whole
/// lifetime; reconfiguring means constructing a new freezer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezerConfig {
    /// Upper bound for the drain-wait of a single freeze generation.
    pub max_wait_ready_for_flush_ms: u64,
    pub ready_for_flush_poll_interval_us: u64,
    /// How often a stalled drain refreshes its memtable diagnostics.
    pub stall_report_interval_ms: u64,
    /// Upper bound for acquiring the freeze flag or a freeze priority slot.
    pub max_wait_set_freeze_flag_ms: u64,
    pub set_freeze_flag_retry_interval_us: u64,
    pub max_wait_submit_log_ms: u64,
    pub submit_log_retry_interval_us: u64,
    pub frozen_memtable_info_limit: usize,
    pub max_diagnose_info_bytes: usize,
}

impl Default for FreezerConfig {
    fn default() -> Self {
        Self {
            max_wait_ready_for_flush_ms: 10_000,
            ready_for_flush_poll_interval_us: 1_000,
            stall_report_interval_ms: 1_000,
            max_wait_set_freeze_flag_ms: 20_000,
            set_freeze_flag_retry_interval_us: 100,
            max_wait_submit_log_ms: 1_000,
            submit_log_retry_interval_us: 1_000,
            frozen_memtable_info_limit: 16,
            max_diagnose_info_bytes: 4096,
        }
    }
}

impl FreezerConfig {
    /// Short waits for local runs and test harnesses.
    pub fn development() -> Self {
        Self {
            max_wait_ready_for_flush_ms: 500,
            ready_for_flush_poll_interval_us: 200,
            stall_report_interval_ms: 20,
            max_wait_set_freeze_flag_ms: 2_000,
            set_freeze_flag_retry_interval_us: 50,
            max_wait_submit_log_ms: 100,
            submit_log_retry_interval_us: 200,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), FreezeError> {
        let checks: [(&str, u64); 7] = [
            ("max_wait_ready_for_flush_ms", self.max_wait_ready_for_flush_ms),
            (
                "ready_for_flush_poll_interval_us",
                self.ready_for_flush_poll_interval_us,
            ),
            ("stall_report_interval_ms", self.stall_report_interval_ms),
            ("max_wait_set_freeze_flag_ms", self.max_wait_set_freeze_flag_ms),
            (
                "set_freeze_flag_retry_interval_us",
                self.set_freeze_flag_retry_interval_us,
            ),
            ("max_wait_submit_log_ms", self.max_wait_submit_log_ms),
            ("submit_log_retry_interval_us", self.submit_log_retry_interval_us),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(FreezeError::InvalidConfig {
                    message: format!("{name} must be greater than zero"),
                });
            }
        }
        if self.max_diagnose_info_bytes == 0 {
            return Err(FreezeError::InvalidConfig {
                message: "max_diagnose_info_bytes must be greater than zero".into(),
            });
        }
        if self.ready_for_flush_poll_interval_us / 1_000 > self.max_wait_ready_for_flush_ms {
            return Err(FreezeError::InvalidConfig {
                message: "ready_for_flush_poll_interval_us exceeds max_wait_ready_for_flush_ms"
                    .into(),
            });
        }
        Ok(())
    }

    pub fn max_wait_ready_for_flush(&self) -> Duration {
        Duration::from_millis(self.max_wait_ready_for_flush_ms)
    }

    pub fn ready_for_flush_poll_interval(&self) -> Duration {
        Duration::from_micros(self.ready_for_flush_poll_interval_us)
    }

    pub fn stall_report_interval(&self) -> Duration {
        Duration::from_millis(self.stall_report_interval_ms)
    }

    pub fn max_wait_set_freeze_flag(&self) -> Duration {
        Duration::from_millis(self.max_wait_set_freeze_flag_ms)
    }

    pub fn set_freeze_flag_retry_interval(&self) -> Duration {
        Duration::from_micros(self.set_freeze_flag_retry_interval_us)
    }

    pub fn max_wait_submit_log(&self) -> Duration {
        Duration::from_millis(self.max_wait_submit_log_ms)
    }

    pub fn submit_log_retry_interval(&self) -> Duration {
        Duration::from_micros(self.submit_log_retry_interval_us)
    }
}

#[cfg(test)]
mod tests {
    use super::FreezerConfig;
    use crate::error::FreezeErrorCode;
    use std::time::Duration;

    #[test]
    fn default_drain_bound_is_ten_seconds() {
        let config = FreezerConfig::default();
        assert_eq!(config.max_wait_ready_for_flush(), Duration::from_secs(10));
        config.validate().expect("default config is valid");
        FreezerConfig::development()
            .validate()
            .expect("development config is valid");
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let config = FreezerConfig {
            ready_for_flush_poll_interval_us: 0,
            ..FreezerConfig::default()
        };
        let err = config.validate().expect_err("zero poll interval");
        assert_eq!(err.code(), FreezeErrorCode::InvalidConfig);
        assert!(err.to_string().contains("ready_for_flush_poll_interval_us"));
    }

    #[test]
    fn poll_interval_longer_than_bound_is_rejected() {
        let config = FreezerConfig {
            max_wait_ready_for_flush_ms: 1,
            ready_for_flush_poll_interval_us: 5_000,
            ..FreezerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Configuration management for the credits engine.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file is honored when the binary calls `dotenvy::dotenv()` first.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Business rules applied by the booking state machine
    pub policy: BookingPolicy,
    /// Background sweep intervals
    pub jobs: JobSchedule,
    /// Outbound notification retry policy
    pub delivery: DeliveryPolicy,
    /// Process-level settings
    pub server: ServerConfig,
}

/// Business rules applied by the booking state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicy {
    /// How many cents one credit is worth (default: 50)
    pub credit_value_cents: u64,
    /// Ceiling on a user's active bookings (default: 10)
    pub max_active_bookings: usize,
    /// Refund percentage for cancellations inside the window (default: 50)
    pub late_cancel_refund_percent: u8,
    /// Hours after class start before a pending booking becomes a no-show (default: 3)
    pub no_show_grace_hours: u32,
    /// Hours after class end before the instance is marked completed (default: 2)
    pub completion_grace_hours: u32,
    /// Lead time of the class reminder in hours (default: 1)
    pub reminder_lead_hours: u32,
    /// Look-ahead of the discounted-classes summary in hours (default: 48)
    pub discount_summary_horizon_hours: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            credit_value_cents: 50,
            max_active_bookings: 10,
            late_cancel_refund_percent: 50,
            no_show_grace_hours: 3,
            completion_grace_hours: 2,
            reminder_lead_hours: 1,
            discount_summary_horizon_hours: 48,
        }
    }
}

/// Background sweep intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    /// No-show sweep (default: hourly)
    pub no_show_interval: Duration,
    /// Class completion sweep (default: 5 minutes)
    pub completion_interval: Duration,
    /// Discount summary rebuild (default: 5 minutes)
    pub discount_summary_interval: Duration,
    /// Due reminder dispatch (default: 1 minute)
    pub reminder_dispatch_interval: Duration,
}

impl Default for JobSchedule {
    fn default() -> Self {
        Self {
            no_show_interval: Duration::from_secs(3600),
            completion_interval: Duration::from_secs(300),
            discount_summary_interval: Duration::from_secs(300),
            reminder_dispatch_interval: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff for notification delivery
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    /// Retries after the first attempt (default: 3)
    pub max_retries: u32,
    /// Delay before the first retry (default: 200ms)
    pub initial_delay: Duration,
    /// Upper bound on any single delay (default: 5s)
    pub max_delay: Duration,
    /// Growth factor between retries (default: 2.0)
    pub multiplier: f64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl DeliveryPolicy {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Prometheus exporter listen address (unset disables the exporter)
    pub metrics_addr: Option<String>,
    /// JSON state file loaded at startup and written at shutdown
    pub state_file: Option<String>,
    /// Graceful shutdown timeout in seconds (default: 30)
    pub shutdown_timeout: u64,
}

/// Configuration rejected by [`Config::validate`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is outside its allowed range
    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// What is wrong
        reason: String,
    },
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Falls back to defaults if environment variables are not set.
    #[must_use]
    pub fn from_env() -> Self {
        let policy = BookingPolicy::default();
        let jobs = JobSchedule::default();
        let delivery = DeliveryPolicy::default();

        Self {
            policy: BookingPolicy {
                credit_value_cents: var_or("CREDIT_VALUE_CENTS", policy.credit_value_cents),
                max_active_bookings: var_or("MAX_ACTIVE_BOOKINGS", policy.max_active_bookings),
                late_cancel_refund_percent: var_or(
                    "LATE_CANCEL_REFUND_PERCENT",
                    policy.late_cancel_refund_percent,
                ),
                no_show_grace_hours: var_or("NO_SHOW_GRACE_HOURS", policy.no_show_grace_hours),
                completion_grace_hours: var_or(
                    "COMPLETION_GRACE_HOURS",
                    policy.completion_grace_hours,
                ),
                reminder_lead_hours: var_or("REMINDER_LEAD_HOURS", policy.reminder_lead_hours),
                discount_summary_horizon_hours: var_or(
                    "DISCOUNT_SUMMARY_HORIZON_HOURS",
                    policy.discount_summary_horizon_hours,
                ),
            },
            jobs: JobSchedule {
                no_show_interval: Duration::from_secs(var_or(
                    "NO_SHOW_INTERVAL_SECS",
                    jobs.no_show_interval.as_secs(),
                )),
                completion_interval: Duration::from_secs(var_or(
                    "COMPLETION_INTERVAL_SECS",
                    jobs.completion_interval.as_secs(),
                )),
                discount_summary_interval: Duration::from_secs(var_or(
                    "DISCOUNT_SUMMARY_INTERVAL_SECS",
                    jobs.discount_summary_interval.as_secs(),
                )),
                reminder_dispatch_interval: Duration::from_secs(var_or(
                    "REMINDER_DISPATCH_INTERVAL_SECS",
                    jobs.reminder_dispatch_interval.as_secs(),
                )),
            },
            delivery: DeliveryPolicy {
                max_retries: var_or("NOTIFY_MAX_RETRIES", delivery.max_retries),
                initial_delay: Duration::from_millis(var_or(
                    "NOTIFY_INITIAL_DELAY_MS",
                    200_u64,
                )),
                max_delay: Duration::from_millis(var_or("NOTIFY_MAX_DELAY_MS", 5000_u64)),
                multiplier: var_or("NOTIFY_BACKOFF_MULTIPLIER", delivery.multiplier),
            },
            server: ServerConfig {
                log_level: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "studio_credits=info".to_string()),
                metrics_addr: env::var("METRICS_ADDR").ok(),
                state_file: env::var("STATE_FILE").ok(),
                shutdown_timeout: var_or("SHUTDOWN_TIMEOUT", 30),
            },
        }
    }

    /// Rejects values the engine cannot run with
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.credit_value_cents == 0 {
            return Err(ConfigError::Invalid {
                key: "CREDIT_VALUE_CENTS",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.policy.late_cancel_refund_percent > 100 {
            return Err(ConfigError::Invalid {
                key: "LATE_CANCEL_REFUND_PERCENT",
                reason: format!("{} exceeds 100", self.policy.late_cancel_refund_percent),
            });
        }
        if self.delivery.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                key: "NOTIFY_BACKOFF_MULTIPLIER",
                reason: "must be at least 1.0".to_string(),
            });
        }
        let intervals = [
            ("NO_SHOW_INTERVAL_SECS", self.jobs.no_show_interval),
            ("COMPLETION_INTERVAL_SECS", self.jobs.completion_interval),
            ("DISCOUNT_SUMMARY_INTERVAL_SECS", self.jobs.discount_summary_interval),
            ("REMINDER_DISPATCH_INTERVAL_SECS", self.jobs.reminder_dispatch_interval),
        ];
        for (key, interval) in intervals {
            if interval.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "interval must be non-zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

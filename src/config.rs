use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

mod defaults;
mod validation;

pub(crate) use defaults::DEFAULT_CONFIG_PATH;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub retry: RetrySettings,
    #[serde(default)]
    pub profiles: Vec<ProfileSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerSettings {
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub check_jitter: Duration,
    #[serde(with = "humantime_serde")]
    pub duration_tolerance: Duration,
    pub max_concurrent_renewals: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub backoff_secs: Vec<u64>,
}

/// One certificate under management.
#[derive(Debug, Deserialize, Clone)]
pub struct ProfileSettings {
    pub name: String,
    pub cert_path: PathBuf,
    /// Requested validity; compared against what the issuer granted.
    #[serde(default, with = "humantime_serde::option")]
    pub duration: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub renew_before: Option<Duration>,
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    #[serde(default)]
    pub hooks: HookSettings,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HookSettings {
    #[serde(default)]
    pub renew: Vec<HookCommand>,
    #[serde(default)]
    pub post_renew: PostRenewHooks,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PostRenewHooks {
    #[serde(default)]
    pub success: Vec<HookCommand>,
    #[serde(default)]
    pub failure: Vec<HookCommand>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HookCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "defaults::default_hook_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry_backoff_secs: Vec<u64>,
    #[serde(default)]
    pub max_output_bytes: Option<u64>,
    #[serde(default)]
    pub on_failure: HookFailurePolicy,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HookFailurePolicy {
    #[default]
    Continue,
    Stop,
}

impl Settings {
    /// Creates a new `Settings` instance.
    ///
    /// # Errors
    /// Returns error if configuration parsing fails (e.g. invalid format).
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = defaults::apply_defaults(Config::builder())?;

        let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        s = s.add_source(File::from(path).required(false));

        // e.g. CERTWATCH_SCHEDULER__CHECK_INTERVAL=30m
        s = s.add_source(
            Environment::with_prefix("CERTWATCH")
                .prefix_separator("_")
                .separator("__"),
        );

        s.build()?.try_deserialize()
    }

    /// Merges CLI arguments into the settings, overriding values if present.
    pub fn merge_with_args(&mut self, args: &crate::args::RunArgs) {
        if let Some(check_interval) = args.check_interval {
            self.scheduler.check_interval = check_interval;
        }
        if let Some(max_concurrent) = args.max_concurrent_renewals {
            self.scheduler.max_concurrent_renewals = max_concurrent;
        }
    }

    /// Validates configuration values for correctness.
    ///
    /// # Errors
    /// Returns error if any setting is invalid or out of range.
    pub fn validate(&self) -> Result<()> {
        validation::validate_settings(self)
    }

    /// Mismatch tolerance as a calendar duration.
    ///
    /// # Errors
    /// Returns error if the configured tolerance does not fit.
    pub fn duration_tolerance(&self) -> Result<time::Duration> {
        crate::utils::to_time_duration(self.scheduler.duration_tolerance, "duration_tolerance")
    }

    pub(crate) fn max_concurrent_renewals(&self) -> Result<usize> {
        usize::try_from(self.scheduler.max_concurrent_renewals).map_err(|_| {
            anyhow::anyhow!("scheduler.max_concurrent_renewals is too large for this platform")
        })
    }

    /// Retry backoff for a profile, falling back to the global one.
    #[must_use]
    pub fn retry_backoff<'a>(&'a self, profile: &'a ProfileSettings) -> &'a [u64] {
        profile
            .retry
            .as_ref()
            .map_or(self.retry.backoff_secs.as_slice(), |retry| {
                retry.backoff_secs.as_slice()
            })
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(s) if !s.trim().is_empty() => humantime::parse_duration(s.trim())
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                _ => Ok(None),
            }
        }
    }
}

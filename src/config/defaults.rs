use config::{ConfigBuilder, ConfigError, builder::DefaultState};

pub(crate) const DEFAULT_CONFIG_PATH: &str = "certwatch.toml";
const DEFAULT_CHECK_INTERVAL: &str = "1h";
const DEFAULT_CHECK_JITTER: &str = "0s";
const DEFAULT_DURATION_TOLERANCE: &str = "5m";
const DEFAULT_MAX_CONCURRENT_RENEWALS: u64 = 2;
const DEFAULT_RETRY_BACKOFF_SECS: [u64; 3] = [5, 10, 30];
const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 30;

pub(crate) fn apply_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("scheduler.check_interval", DEFAULT_CHECK_INTERVAL)?
        .set_default("scheduler.check_jitter", DEFAULT_CHECK_JITTER)?
        .set_default("scheduler.duration_tolerance", DEFAULT_DURATION_TOLERANCE)?
        .set_default(
            "scheduler.max_concurrent_renewals",
            DEFAULT_MAX_CONCURRENT_RENEWALS,
        )?
        .set_default("retry.backoff_secs", DEFAULT_RETRY_BACKOFF_SECS.to_vec())
}

pub(crate) fn default_hook_timeout_secs() -> u64 {
    DEFAULT_HOOK_TIMEOUT_SECS
}

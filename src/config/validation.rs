use std::collections::BTreeSet;

use anyhow::Result;

use super::{HookCommand, ProfileSettings, Settings};

pub(crate) fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.scheduler.check_interval.is_zero() {
        anyhow::bail!("scheduler.check_interval must be greater than 0");
    }
    if settings.scheduler.max_concurrent_renewals == 0 {
        anyhow::bail!("scheduler.max_concurrent_renewals must be greater than 0");
    }
    settings.duration_tolerance()?;
    if settings.retry.backoff_secs.is_empty() {
        anyhow::bail!("retry.backoff_secs must not be empty");
    }
    validate_retry_settings(&settings.retry.backoff_secs, "retry.backoff_secs")?;
    if settings.profiles.is_empty() {
        anyhow::bail!("profiles must not be empty");
    }
    let mut names = BTreeSet::new();
    for profile in &settings.profiles {
        validate_profile(profile)?;
        if !names.insert(profile.name.as_str()) {
            anyhow::bail!("duplicate profile name '{}'", profile.name);
        }
    }
    Ok(())
}

fn validate_profile(profile: &ProfileSettings) -> Result<()> {
    if profile.name.trim().is_empty() {
        anyhow::bail!("profiles.name must not be empty");
    }
    if profile.cert_path.as_os_str().is_empty() {
        anyhow::bail!("profiles.cert_path must not be empty");
    }
    if let Some(duration) = profile.duration {
        crate::utils::to_time_duration(duration, "profiles.duration")?;
    }
    if let Some(renew_before) = profile.renew_before {
        crate::utils::to_time_duration(renew_before, "profiles.renew_before")?;
    }
    if let Some(retry) = &profile.retry {
        validate_retry_settings(&retry.backoff_secs, "profiles.retry.backoff_secs")?;
    }
    validate_hook_commands(&profile.hooks.renew, "profiles.hooks.renew")?;
    validate_hook_commands(
        &profile.hooks.post_renew.success,
        "profiles.hooks.post_renew.success",
    )?;
    validate_hook_commands(
        &profile.hooks.post_renew.failure,
        "profiles.hooks.post_renew.failure",
    )?;
    Ok(())
}

fn validate_hook_commands(hooks: &[HookCommand], label: &str) -> Result<()> {
    for hook in hooks {
        if hook.command.trim().is_empty() {
            anyhow::bail!("{label} hook command must not be empty");
        }
        if let Some(working_dir) = &hook.working_dir
            && working_dir.as_os_str().is_empty()
        {
            anyhow::bail!("{label} hook working_dir must not be empty");
        }
        if hook.timeout_secs == 0 {
            anyhow::bail!("{label} hook timeout_secs must be greater than 0");
        }
        validate_retry_settings(
            &hook.retry_backoff_secs,
            &format!("{label} hook retry_backoff_secs"),
        )?;
        if let Some(max_output_bytes) = hook.max_output_bytes
            && max_output_bytes == 0
        {
            anyhow::bail!("{label} hook max_output_bytes must be greater than 0");
        }
    }
    Ok(())
}

fn validate_retry_settings(backoff_secs: &[u64], label: &str) -> Result<()> {
    if backoff_secs.contains(&0) {
        anyhow::bail!("{label} values must be greater than 0");
    }
    Ok(())
}

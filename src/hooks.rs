use std::process::Stdio;
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::{HookCommand, HookFailurePolicy, ProfileSettings};
use crate::controller::Reconciliation;

const ENV_CERT_NAME: &str = "CERT_NAME";
const ENV_CERT_PATH: &str = "CERT_PATH";
const ENV_NOT_AFTER: &str = "NOT_AFTER";
const ENV_RENEW_AT: &str = "RENEW_AT";
const ENV_RENEWED_AT: &str = "RENEWED_AT";
const ENV_RENEW_STATUS: &str = "RENEW_STATUS";
const ENV_RENEW_ERROR: &str = "RENEW_ERROR";

#[derive(Debug, Clone, Copy)]
pub enum HookStatus {
    Success,
    Failure,
}

impl HookStatus {
    fn as_str(self) -> &'static str {
        match self {
            HookStatus::Success => "success",
            HookStatus::Failure => "failure",
        }
    }
}

/// Certificate state handed to hooks through the environment.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    not_after: Option<OffsetDateTime>,
    renew_at: Option<OffsetDateTime>,
    status: Option<HookStatus>,
    error_message: Option<String>,
    renewed_at: Option<OffsetDateTime>,
}

impl HookContext {
    #[must_use]
    pub fn from_reconciliation(reconciliation: &Reconciliation) -> Self {
        let plan = reconciliation.plan();
        Self {
            not_after: plan.map(|plan| plan.window.not_after()),
            renew_at: plan.map(|plan| plan.renew_at),
            ..Self::default()
        }
    }

    /// Records how the renewal ended and when, as read from the caller's clock.
    #[must_use]
    pub fn with_status(
        mut self,
        status: HookStatus,
        error_message: Option<String>,
        renewed_at: OffsetDateTime,
    ) -> Self {
        self.status = Some(status);
        self.error_message = error_message;
        self.renewed_at = Some(renewed_at);
        self
    }

    fn envs(&self, profile: &ProfileSettings) -> Vec<(String, String)> {
        let mut envs = vec![
            (ENV_CERT_NAME.to_string(), profile.name.clone()),
            (
                ENV_CERT_PATH.to_string(),
                profile.cert_path.display().to_string(),
            ),
            (ENV_NOT_AFTER.to_string(), format_timestamp(self.not_after)),
            (ENV_RENEW_AT.to_string(), format_timestamp(self.renew_at)),
        ];
        if let Some(status) = self.status {
            envs.push((ENV_RENEWED_AT.to_string(), format_timestamp(self.renewed_at)));
            envs.push((ENV_RENEW_STATUS.to_string(), status.as_str().to_string()));
            envs.push((
                ENV_RENEW_ERROR.to_string(),
                self.error_message.clone().unwrap_or_default(),
            ));
        }
        envs
    }
}

fn format_timestamp(value: Option<OffsetDateTime>) -> String {
    value
        .map(|at| at.format(&Rfc3339).unwrap_or_else(|_| at.to_string()))
        .unwrap_or_default()
}

/// Runs the profile's renew commands in order.
///
/// # Errors
/// Returns an error if no renew command is configured or any of them fails.
pub async fn run_renew_hooks(
    profile: &ProfileSettings,
    context: &HookContext,
) -> anyhow::Result<()> {
    if profile.hooks.renew.is_empty() {
        anyhow::bail!("Profile '{}' has no renew hooks configured", profile.name);
    }

    let mut first_error = None;
    for hook in &profile.hooks.renew {
        if let Err(err) = run_hook_with_retry(hook, context, profile, "renew").await {
            error!("Renew hook failed (command='{}'): {err}", hook.command);
            if hook.on_failure == HookFailurePolicy::Stop {
                return Err(err);
            }
            first_error.get_or_insert(err);
        }
    }

    first_error.map_or(Ok(()), Err)
}

/// Runs the post-renew hooks matching the status recorded on `context`.
///
/// A context without a status runs nothing.
///
/// # Errors
/// Returns error when a hook fails and its policy is set to stop.
pub async fn run_post_renew_hooks(
    profile: &ProfileSettings,
    context: &HookContext,
) -> anyhow::Result<()> {
    let hooks = match context.status {
        Some(HookStatus::Success) => &profile.hooks.post_renew.success,
        Some(HookStatus::Failure) => &profile.hooks.post_renew.failure,
        None => return Ok(()),
    };

    for hook in hooks {
        if let Err(err) = run_hook_with_retry(hook, context, profile, "post_renew").await {
            error!("Post-renew hook failed (command='{}'): {err}", hook.command);
            if hook.on_failure == HookFailurePolicy::Stop {
                return Err(err);
            }
        }
    }

    Ok(())
}

async fn run_hook_with_retry(
    hook: &HookCommand,
    context: &HookContext,
    profile: &ProfileSettings,
    stage: &str,
) -> anyhow::Result<()> {
    crate::utils::retry_with_backoff(&hook.retry_backoff_secs, |attempt, remaining| async move {
        let result = run_hook_command(hook, context, profile, stage).await;
        if let Err(err) = &result {
            error!(
                "Hook attempt {attempt} failed (command='{}', remaining_retries={}): {err}",
                hook.command, remaining
            );
        }
        result
    })
    .await
}

async fn run_hook_command(
    hook: &HookCommand,
    context: &HookContext,
    profile: &ProfileSettings,
    stage: &str,
) -> anyhow::Result<()> {
    info!(
        "Running {} hook for '{}' (renew_at={}, not_after={}): {} {:?}",
        stage,
        profile.name,
        format_timestamp(context.renew_at),
        format_timestamp(context.not_after),
        hook.command,
        hook.args
    );

    let mut command = Command::new(&hook.command);
    command
        .args(&hook.args)
        .envs(context.envs(profile))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(working_dir) = &hook.working_dir {
        command.current_dir(working_dir);
    }

    let mut child = command
        .spawn()
        .map_err(|e| anyhow::anyhow!("Failed to spawn hook command '{}': {e}", hook.command))?;

    let timeout = Duration::from_secs(hook.timeout_secs);
    let stdout_handle = tokio::spawn(read_stream_limited(
        child.stdout.take(),
        hook.max_output_bytes,
    ));
    let stderr_handle = tokio::spawn(read_stream_limited(
        child.stderr.take(),
        hook.max_output_bytes,
    ));

    let status = tokio::time::timeout(timeout, child.wait()).await;
    if let Ok(result) = status {
        let status = result.map_err(|e| anyhow::anyhow!("Hook command failed: {e}"))?;
        let stdout = stdout_handle
            .await
            .map_err(|e| anyhow::anyhow!("Hook stdout task failed: {e}"))??;
        let stderr = stderr_handle
            .await
            .map_err(|e| anyhow::anyhow!("Hook stderr task failed: {e}"))??;
        log_hook_output("stdout", &stdout);
        log_hook_output("stderr", &stderr);
        if status.success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Hook exited with status: {status}"))
        }
    } else {
        child
            .kill()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill timed out hook: {e}"))?;
        let _ = child.wait().await;
        let _ = stdout_handle.await;
        let _ = stderr_handle.await;
        Err(anyhow::anyhow!(
            "Hook timed out after {} seconds",
            hook.timeout_secs
        ))
    }
}

fn log_hook_output(label: &str, output: &HookOutput) {
    if !output.text.trim().is_empty() || output.truncated {
        debug!(
            "Hook {label} (bytes={}, truncated={}): {}",
            output.bytes,
            output.truncated,
            output.text.trim()
        );
    }
}

struct HookOutput {
    text: String,
    bytes: usize,
    truncated: bool,
}

async fn read_stream_limited<R>(
    stream: Option<R>,
    max_output_bytes: Option<u64>,
) -> anyhow::Result<HookOutput>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(HookOutput {
            text: String::new(),
            bytes: 0,
            truncated: false,
        });
    };

    let max_bytes = max_output_bytes.map_or(usize::MAX, |value| {
        usize::try_from(value).unwrap_or(usize::MAX)
    });
    let mut buf = Vec::new();
    let mut total = 0usize;
    let mut truncated = false;
    let mut chunk = [0u8; 4096];

    loop {
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read hook output: {e}"))?;
        if read == 0 {
            break;
        }
        total = total.saturating_add(read);
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            truncated = true;
            break;
        }
        let to_copy = read.min(remaining);
        buf.extend_from_slice(&chunk[..to_copy]);
        if to_copy < read {
            truncated = true;
            break;
        }
    }

    Ok(HookOutput {
        text: String::from_utf8_lossy(&buf).to_string(),
        bytes: total,
        truncated,
    })
}

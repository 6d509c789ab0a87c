use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::{self, ProfileSettings};
use crate::controller::{self, Reconciliation};
use crate::events::EventSink;
use crate::hooks::{self, HookContext, HookStatus};
use crate::utils;

pub const MIN_DAEMON_CHECK_DELAY_NANOS: i128 = utils::MIN_JITTER_DELAY_NANOS;

/// Shared collaborators for every profile task.
#[derive(Clone)]
pub struct Runtime {
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn EventSink>,
}

/// Runs the watch loop for all profiles until a shutdown signal arrives.
///
/// # Errors
/// Returns an error if a profile task fails or shutdown handling fails.
pub async fn run_daemon(settings: Arc<config::Settings>, runtime: Runtime) -> anyhow::Result<()> {
    let max_concurrent = settings.max_concurrent_renewals()?;
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let shutdown_handle = tokio::spawn(async move {
        if let Err(err) = wait_for_shutdown().await {
            error!("Shutdown signal handler error: {err}");
        }
        let _ = shutdown_tx.send(true);
    });

    let mut handles = Vec::new();
    for profile in settings.profiles.clone() {
        let settings = Arc::clone(&settings);
        let semaphore = Arc::clone(&semaphore);
        let shutdown_rx = shutdown_rx.clone();
        let runtime = runtime.clone();

        handles.push(tokio::spawn(async move {
            run_profile_daemon(settings, profile, runtime, semaphore, shutdown_rx).await
        }));
    }

    let _ = shutdown_handle.await;
    collect_results(handles, "Profile daemon").await
}

async fn run_profile_daemon(
    settings: Arc<config::Settings>,
    profile: ProfileSettings,
    runtime: Runtime,
    semaphore: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let check_interval = settings.scheduler.check_interval;
    let check_jitter = settings.scheduler.check_jitter;
    let tolerance = settings.duration_tolerance()?;

    info!(
        "Profile '{}' watching {}. check_interval={:?}, check_jitter={:?}",
        profile.name,
        profile.cert_path.display(),
        check_interval,
        check_jitter
    );

    let mut delay = Duration::ZERO;
    loop {
        if *shutdown.borrow() {
            info!("Shutdown signal received. Exiting profile '{}'.", profile.name);
            break;
        }

        tokio::select! {
            _ = shutdown.changed() => {
                info!("Shutdown signal received. Exiting profile '{}'.", profile.name);
                break;
            }
            () = tokio::time::sleep(delay) => {
                let pass = check_and_renew_profile(
                    &settings,
                    &profile,
                    &runtime,
                    Arc::clone(&semaphore),
                    tolerance,
                )
                .await?;
                delay = next_check_delay(
                    &pass,
                    utils::jittered_delay(check_interval, check_jitter),
                );
                tracing::debug!("Profile '{}' next check in {:?}", profile.name, delay);
            }
        }
    }

    Ok(())
}

/// Outcome of one check pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing was due; renewal is this far away.
    Waiting(time::Duration),
    /// Renewal was attempted (successfully or not).
    Attempted,
    /// The certificate could not be inspected.
    Failed,
}

/// Picks how long to sleep before the next pass.
///
/// A pending renewal wakes the loop early. After an attempt or a failed check
/// the regular interval applies.
#[must_use]
pub fn next_check_delay(pass: &PassOutcome, jittered_interval: Duration) -> Duration {
    let floor =
        Duration::from_nanos(u64::try_from(MIN_DAEMON_CHECK_DELAY_NANOS).unwrap_or(u64::MAX));
    let delay = match pass {
        PassOutcome::Waiting(renew_in) => {
            jittered_interval.min(utils::to_std_duration(*renew_in))
        }
        PassOutcome::Attempted | PassOutcome::Failed => jittered_interval,
    };
    delay.max(floor)
}

/// Runs a single pass for all profiles, renewing whatever is due.
///
/// # Errors
/// Returns an error if any profile check or renewal fails.
pub async fn run_oneshot(settings: Arc<config::Settings>, runtime: Runtime) -> anyhow::Result<()> {
    let max_concurrent = settings.max_concurrent_renewals()?;
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let tolerance = settings.duration_tolerance()?;
    let mut handles = Vec::new();

    for profile in settings.profiles.clone() {
        let settings = Arc::clone(&settings);
        let semaphore = Arc::clone(&semaphore);
        let runtime = runtime.clone();

        handles.push(tokio::spawn(async move {
            let reconciliation = controller::reconcile(
                &profile,
                runtime.clock.as_ref(),
                runtime.sink.as_ref(),
                tolerance,
            )
            .await?;
            if !reconciliation.is_due() {
                info!(
                    "Profile '{}' certificate still valid. Renewal in {}.",
                    profile.name,
                    utils::format_duration(reconciliation.renew_in())
                );
                return Ok(());
            }
            let _permit = semaphore.acquire().await?;
            renew_profile(&settings, &profile, &reconciliation, runtime.clock.as_ref()).await
        }));
    }

    collect_results(handles, "Profile oneshot").await
}

async fn collect_results(
    handles: Vec<tokio::task::JoinHandle<anyhow::Result<()>>>,
    label: &str,
) -> anyhow::Result<()> {
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!("{label} failed: {err}");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(err) => {
                error!("{label} task join error: {err}");
                if first_error.is_none() {
                    first_error = Some(anyhow::anyhow!("{label} task join error: {err}"));
                }
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

async fn check_and_renew_profile(
    settings: &config::Settings,
    profile: &ProfileSettings,
    runtime: &Runtime,
    semaphore: Arc<Semaphore>,
    tolerance: time::Duration,
) -> anyhow::Result<PassOutcome> {
    tracing::debug!("Profile '{}' checking renewal status...", profile.name);
    let reconciliation = match controller::reconcile(
        profile,
        runtime.clock.as_ref(),
        runtime.sink.as_ref(),
        tolerance,
    )
    .await
    {
        Ok(reconciliation) => reconciliation,
        Err(err) => {
            error!("Profile '{}' renewal check failed: {err}", profile.name);
            return Ok(PassOutcome::Failed);
        }
    };

    if !reconciliation.is_due() {
        tracing::debug!("Profile '{}' certificate still valid.", profile.name);
        return Ok(PassOutcome::Waiting(reconciliation.renew_in()));
    }

    info!("Profile '{}' renewal required. Running renew hooks...", profile.name);
    let _permit = semaphore.acquire().await?;
    if let Err(err) = renew_profile(
        settings,
        profile,
        &reconciliation,
        runtime.clock.as_ref(),
    )
    .await
    {
        error!("Profile '{}' renewal failed after retries: {err}", profile.name);
    }
    Ok(PassOutcome::Attempted)
}

/// Runs the renew hooks with retry, then the matching post-renew hooks.
async fn renew_profile(
    settings: &config::Settings,
    profile: &ProfileSettings,
    reconciliation: &Reconciliation,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    let context = HookContext::from_reconciliation(reconciliation);
    let backoff = settings.retry_backoff(profile);
    let result = renew_with_retry_inner(
        || hooks::run_renew_hooks(profile, &context),
        |duration| tokio::time::sleep(duration),
        backoff,
    )
    .await;

    match result {
        Ok(()) => {
            let context = context.with_status(HookStatus::Success, None, clock.now());
            if let Err(err) = hooks::run_post_renew_hooks(profile, &context).await {
                error!(
                    "Post-renew success hooks failed for '{}': {err}",
                    profile.name
                );
            }
            Ok(())
        }
        Err(err) => {
            let context =
                context.with_status(HookStatus::Failure, Some(err.to_string()), clock.now());
            if let Err(hook_err) = hooks::run_post_renew_hooks(profile, &context).await {
                error!(
                    "Post-renew failure hooks failed for '{}': {hook_err}",
                    profile.name
                );
            }
            Err(err)
        }
    }
}

/// Renews a certificate with retry and backoff.
///
/// # Errors
/// Returns an error if all retries fail.
pub async fn renew_with_retry_inner<RenewFn, RenewFut, SleepFn, SleepFut>(
    mut renew_fn: RenewFn,
    mut sleep_fn: SleepFn,
    delays: &[u64],
) -> anyhow::Result<()>
where
    RenewFn: FnMut() -> RenewFut,
    RenewFut: Future<Output = anyhow::Result<()>>,
    SleepFn: FnMut(Duration) -> SleepFut,
    SleepFut: Future<Output = ()>,
{
    let result = utils::retry_with_backoff_and_sleep(
        &mut renew_fn,
        &mut sleep_fn,
        |attempt, err| {
            error!("Certificate renewal failed (attempt {}): {err}", attempt);
        },
        delays,
    )
    .await;
    if result.is_ok() {
        info!("Certificate renewal succeeded.");
    }
    result
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {e}"))?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| anyhow::anyhow!("Failed to listen for Ctrl+C: {e}"))?;
            }
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to listen for Ctrl+C: {e}"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const TEST_DELAYS: [u64; 3] = [1, 2, 3];
    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[test]
    fn test_next_check_delay_wakes_for_pending_renewal() {
        let pass = PassOutcome::Waiting(time::Duration::minutes(10));

        let delay = next_check_delay(&pass, HOUR);

        assert_eq!(delay, Duration::from_secs(10 * 60));
    }

    #[test]
    fn test_next_check_delay_caps_at_interval() {
        let pass = PassOutcome::Waiting(time::Duration::days(40));

        let delay = next_check_delay(&pass, HOUR);

        assert_eq!(delay, HOUR);
    }

    #[test]
    fn test_next_check_delay_after_attempt_uses_interval() {
        let delay = next_check_delay(&PassOutcome::Attempted, HOUR + Duration::from_secs(5));

        assert_eq!(delay, HOUR + Duration::from_secs(5));
    }

    #[test]
    fn test_next_check_delay_has_floor() {
        let pass = PassOutcome::Waiting(time::Duration::ZERO);

        let delay = next_check_delay(&pass, HOUR);

        assert_eq!(delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_renew_with_retry_succeeds_after_retries() {
        let attempts = Arc::new(Mutex::new(0usize));
        let sleeps = Arc::new(Mutex::new(Vec::new()));

        let attempts_renew = Arc::clone(&attempts);
        let renew_fn = move || {
            let attempts_inner = Arc::clone(&attempts_renew);
            async move {
                let mut guard = attempts_inner.lock().unwrap();
                *guard += 1;
                if *guard < 3 {
                    anyhow::bail!("transient failure");
                }
                Ok(())
            }
        };

        let sleeps_log = Arc::clone(&sleeps);
        let sleep_fn = move |duration: Duration| {
            let sleeps_inner = Arc::clone(&sleeps_log);
            async move {
                sleeps_inner.lock().unwrap().push(duration);
            }
        };

        let ok = renew_with_retry_inner(renew_fn, sleep_fn, &TEST_DELAYS).await;

        assert!(ok.is_ok());
        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(
            *sleeps.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_renew_profile_stamps_post_renew_hooks_with_clock() {
        use time::macros::datetime;

        use crate::clock::FixedClock;
        use crate::config::{HookCommand, HookFailurePolicy, HookSettings, PostRenewHooks};

        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("renewed_at.txt");
        let shell = |script: String| HookCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            working_dir: None,
            timeout_secs: 5,
            retry_backoff_secs: Vec::new(),
            max_output_bytes: None,
            on_failure: HookFailurePolicy::Stop,
        };
        let profile = ProfileSettings {
            name: "edge-proxy".to_string(),
            cert_path: dir.path().join("cert.pem"),
            duration: None,
            renew_before: None,
            retry: None,
            hooks: HookSettings {
                renew: vec![shell("true".to_string())],
                post_renew: PostRenewHooks {
                    success: vec![shell(format!(
                        "printf \"%s\" \"$RENEWED_AT\" > \"{}\"",
                        output_path.display()
                    ))],
                    failure: Vec::new(),
                },
            },
        };
        let settings = config::Settings {
            scheduler: config::SchedulerSettings {
                check_interval: HOUR,
                check_jitter: Duration::ZERO,
                duration_tolerance: Duration::from_secs(300),
                max_concurrent_renewals: 1,
            },
            retry: config::RetrySettings {
                backoff_secs: vec![1],
            },
            profiles: vec![profile.clone()],
        };
        let clock = FixedClock::new(datetime!(2031-07-04 10:20:30 UTC));

        renew_profile(&settings, &profile, &Reconciliation::Missing, &clock)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(output_path).unwrap(),
            "2031-07-04T10:20:30Z"
        );
    }

    #[tokio::test]
    async fn test_renew_with_retry_gives_up() {
        let attempts = Arc::new(Mutex::new(0usize));

        let attempts_renew = Arc::clone(&attempts);
        let renew_fn = move || {
            let attempts_inner = Arc::clone(&attempts_renew);
            async move {
                *attempts_inner.lock().unwrap() += 1;
                anyhow::bail!("persistent failure");
            }
        };

        let ok = renew_with_retry_inner(renew_fn, |_| async {}, &TEST_DELAYS).await;

        assert!(ok.is_err());
        assert_eq!(*attempts.lock().unwrap(), 3);
    }
}

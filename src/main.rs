use std::sync::Arc;

use anyhow::Context;
use certwatch::args::{CheckArgs, Command, RunArgs};
use certwatch::config::{self, HookSettings, ProfileSettings};
use certwatch::daemon::{self, Runtime};
use certwatch::events::TracingSink;
use certwatch::report::ScheduleReport;
use certwatch::{Cli, SystemClock, controller};
use clap::Parser;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Check(args) => run_check(&args).await,
        Command::Run(args) => run(&args).await,
    }
}

async fn run_check(args: &CheckArgs) -> anyhow::Result<()> {
    let settings = load_check_settings(args)?;
    let tolerance = settings.duration_tolerance()?;

    let mut reports = Vec::new();
    let mut failures = 0usize;
    for profile in &settings.profiles {
        match controller::reconcile(profile, &SystemClock, &TracingSink, tolerance).await {
            Ok(reconciliation) => reports.push(ScheduleReport::new(profile, &reconciliation)),
            Err(err) => {
                error!("Profile '{}' check failed: {err}", profile.name);
                failures += 1;
            }
        }
    }

    if args.json {
        let output =
            serde_json::to_string_pretty(&reports).context("Failed to serialize report")?;
        println!("{output}");
    } else {
        for report in &reports {
            println!("{}", report.to_text());
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} certificate(s) could not be checked");
    }
    Ok(())
}

fn load_check_settings(args: &CheckArgs) -> anyhow::Result<config::Settings> {
    let mut settings = config::Settings::new(args.config.clone())?;
    if let Some(cert_path) = &args.cert {
        let name = cert_path
            .file_stem()
            .map_or_else(|| cert_path.display().to_string(), |stem| {
                stem.to_string_lossy().into_owned()
            });
        settings.profiles = vec![ProfileSettings {
            name,
            cert_path: cert_path.clone(),
            duration: args.duration,
            renew_before: args.renew_before,
            retry: None,
            hooks: HookSettings::default(),
        }];
    }
    settings.validate()?;
    Ok(settings)
}

async fn run(args: &RunArgs) -> anyhow::Result<()> {
    info!("Starting certwatch");
    let runtime = Runtime {
        clock: Arc::new(SystemClock),
        sink: Arc::new(TracingSink),
    };

    if args.oneshot {
        let settings = load_run_settings(args)?;
        match daemon::run_oneshot(Arc::new(settings), runtime).await {
            Ok(()) => info!("Renewal pass completed."),
            Err(err) => {
                error!("Renewal pass failed: {err:?}");
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut pending = None;
    #[cfg(unix)]
    let mut hup = signal(SignalKind::hangup())?;
    loop {
        let settings = match pending.take() {
            Some(value) => value,
            None => load_run_settings(args)?,
        };
        info!("Loaded {} profile(s).", settings.profiles.len());
        let mut task = tokio::spawn(daemon::run_daemon(Arc::new(settings), runtime.clone()));
        #[cfg(unix)]
        loop {
            tokio::select! {
                result = &mut task => return handle_daemon_result(result),
                _ = hup.recv() => {
                    match load_run_settings(args) {
                        Ok(settings) => {
                            info!("Reload signal received. Restarting daemon with new config.");
                            pending = Some(settings);
                            task.abort();
                            let _ = task.await;
                            break;
                        }
                        Err(err) => {
                            error!("Reload failed: {err}");
                        }
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            return handle_daemon_result(task.await);
        }
    }
}

fn load_run_settings(args: &RunArgs) -> anyhow::Result<config::Settings> {
    let mut settings = config::Settings::new(args.config.clone())?;
    settings.merge_with_args(args);
    settings.validate()?;
    Ok(settings)
}

fn handle_daemon_result(
    result: Result<anyhow::Result<()>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match result {
        Ok(inner) => inner,
        Err(err) => {
            if err.is_cancelled() {
                Ok(())
            } else {
                Err(err.into())
            }
        }
    }
}

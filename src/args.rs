use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the renewal schedule of every configured certificate
    Check(CheckArgs),
    /// Watch certificates and run renew hooks when renewal is due
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to configuration file (default: certwatch.toml)
    #[arg(long, short, env = "CERTWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Check a single certificate file instead of the configured profiles
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Requested validity duration for --cert (e.g. 90days)
    #[arg(long, requires = "cert", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Requested renew-before window for --cert (e.g. 720h)
    #[arg(long, requires = "cert", value_parser = humantime::parse_duration)]
    pub renew_before: Option<Duration>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to configuration file (default: certwatch.toml)
    #[arg(long, short, env = "CERTWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run a single pass and exit (disable daemon loop)
    #[arg(long)]
    pub oneshot: bool,

    /// Override scheduler.check_interval (e.g. 15m)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub check_interval: Option<Duration>,

    /// Override scheduler.max_concurrent_renewals
    #[arg(long)]
    pub max_concurrent_renewals: Option<u64>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check_with_single_cert() {
        let cli = Cli::try_parse_from([
            "certwatch",
            "check",
            "--cert",
            "certs/edge.pem",
            "--renew-before",
            "10days",
            "--json",
        ])
        .unwrap();

        let Command::Check(args) = cli.command else {
            panic!("expected check command");
        };
        assert_eq!(args.cert, Some(PathBuf::from("certs/edge.pem")));
        assert_eq!(args.renew_before, Some(Duration::from_secs(10 * 24 * 60 * 60)));
        assert!(args.duration.is_none());
        assert!(args.json);
    }

    #[test]
    fn test_renew_before_requires_cert() {
        let result = Cli::try_parse_from(["certwatch", "check", "--renew-before", "1h"]);
        assert!(result.is_err());
    }
}

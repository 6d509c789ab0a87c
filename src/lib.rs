pub mod args;
pub mod cert;
pub mod clock;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod events;
pub mod hooks;
pub mod report;
pub mod schedule;
pub mod utils;

pub use args::Cli;
pub use clock::{Clock, FixedClock, SystemClock};
pub use schedule::{
    DEFAULT_RENEW_BEFORE, DURATION_MISMATCH_TOLERANCE, Diagnostic, RenewalPolicy, ScheduleResult,
    ValidityWindow, compute, compute_with_tolerance,
};

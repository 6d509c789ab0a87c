//! A single reconciliation pass for one certificate profile.

use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::cert;
use crate::clock::Clock;
use crate::config::ProfileSettings;
use crate::events::{EventSink, ScheduleEvent};
use crate::schedule::{self, RenewalPolicy, ScheduleResult, ValidityWindow};
use crate::utils::to_time_duration;

/// Where a certificate stands relative to its renewal schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPlan {
    pub window: ValidityWindow,
    pub result: ScheduleResult,
    pub renew_at: OffsetDateTime,
    /// Time left until `renew_at`, zero once it has passed.
    pub renew_in: Duration,
    pub due: bool,
}

impl RenewalPlan {
    #[must_use]
    pub fn new(window: ValidityWindow, result: ScheduleResult, now: OffsetDateTime) -> Self {
        let renew_at = result.renew_at(&window);
        let remaining = renew_at - now;
        Self {
            window,
            result,
            renew_at,
            renew_in: if remaining.is_positive() {
                remaining
            } else {
                Duration::ZERO
            },
            due: now >= renew_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// No certificate on disk yet.
    Missing,
    Scheduled(RenewalPlan),
}

impl Reconciliation {
    #[must_use]
    pub fn is_due(&self) -> bool {
        match self {
            Reconciliation::Missing => true,
            Reconciliation::Scheduled(plan) => plan.due,
        }
    }

    #[must_use]
    pub fn renew_in(&self) -> Duration {
        match self {
            Reconciliation::Missing => Duration::ZERO,
            Reconciliation::Scheduled(plan) => plan.renew_in,
        }
    }

    #[must_use]
    pub fn plan(&self) -> Option<&RenewalPlan> {
        match self {
            Reconciliation::Missing => None,
            Reconciliation::Scheduled(plan) => Some(plan),
        }
    }
}

/// Builds the renewal policy configured for a profile.
///
/// # Errors
/// Returns an error if a configured duration does not fit.
pub fn renewal_policy(profile: &ProfileSettings) -> anyhow::Result<RenewalPolicy> {
    let requested_duration = profile
        .duration
        .map(|value| to_time_duration(value, "duration"))
        .transpose()?
        .unwrap_or(Duration::ZERO);
    let requested_renew_before = profile
        .renew_before
        .map(|value| to_time_duration(value, "renew_before"))
        .transpose()?
        .unwrap_or(Duration::ZERO);
    Ok(RenewalPolicy::new(requested_duration, requested_renew_before))
}

/// Computes the schedule for `window` and reports any deviation to `sink`.
pub fn plan_window(
    subject: &str,
    window: ValidityWindow,
    policy: &RenewalPolicy,
    tolerance: Duration,
    now: OffsetDateTime,
    sink: &dyn EventSink,
) -> RenewalPlan {
    let result = schedule::compute_with_tolerance(&window, policy, tolerance);
    if let Some(event) = ScheduleEvent::from_result(&window, policy, &result) {
        sink.record(subject, &event);
    }
    RenewalPlan::new(window, result, now)
}

/// Reads the profile's certificate and places it on its renewal schedule.
///
/// # Errors
/// Returns an error if the certificate cannot be read or parsed, or the
/// profile's durations are out of range.
pub async fn reconcile(
    profile: &ProfileSettings,
    clock: &dyn Clock,
    sink: &dyn EventSink,
    tolerance: Duration,
) -> anyhow::Result<Reconciliation> {
    let policy = renewal_policy(profile)?;
    let Some(window) = cert::read_validity_window(&profile.cert_path).await? else {
        debug!(
            "Profile '{}' certificate {} not found.",
            profile.name,
            profile.cert_path.display()
        );
        return Ok(Reconciliation::Missing);
    };

    let plan = plan_window(&profile.name, window, &policy, tolerance, clock.now(), sink);
    debug!(
        "Profile '{}' renews at {} (due={}, diagnostic={:?})",
        profile.name, plan.renew_at, plan.due, plan.result.diagnostic
    );
    Ok(Reconciliation::Scheduled(plan))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use rcgen::CertificateParams;
    use tempfile::tempdir;
    use time::macros::datetime;

    use super::*;
    use crate::clock::FixedClock;
    use crate::config::HookSettings;
    use crate::events::{MemorySink, REASON_CERTIFICATE_DURATION};
    use crate::schedule::{DURATION_MISMATCH_TOLERANCE, Diagnostic};

    const NOT_BEFORE: OffsetDateTime = datetime!(2024-01-01 00:00 UTC);

    fn build_profile(cert_path: PathBuf) -> ProfileSettings {
        ProfileSettings {
            name: "edge-proxy".to_string(),
            cert_path,
            duration: None,
            renew_before: None,
            retry: None,
            hooks: HookSettings::default(),
        }
    }

    fn write_cert(path: &PathBuf, lifetime: Duration) {
        let mut params = CertificateParams::new(vec!["edge.internal".to_string()]).unwrap();
        params.not_before = NOT_BEFORE;
        params.not_after = NOT_BEFORE + lifetime;
        let key = rcgen::KeyPair::generate().unwrap();
        fs::write(path, params.self_signed(&key).unwrap().pem()).unwrap();
    }

    #[test]
    fn test_renewal_policy_defaults_to_unset() {
        let policy = renewal_policy(&build_profile(PathBuf::from("unused.pem"))).unwrap();
        assert_eq!(policy, RenewalPolicy::default());
    }

    #[test]
    fn test_renewal_policy_rejects_large_duration() {
        let mut profile = build_profile(PathBuf::from("unused.pem"));
        profile.renew_before = Some(std::time::Duration::MAX);

        let err = renewal_policy(&profile).unwrap_err();

        assert!(err.to_string().contains("renew_before duration is too large"));
    }

    #[test]
    fn test_plan_renew_in_saturates() {
        let window = ValidityWindow::new(NOT_BEFORE, NOT_BEFORE + Duration::days(90)).unwrap();
        let result = schedule::compute(&window, &RenewalPolicy::default());

        let early = RenewalPlan::new(window, result, NOT_BEFORE + Duration::days(10));
        let late = RenewalPlan::new(window, result, NOT_BEFORE + Duration::days(70));

        assert_eq!(early.renew_in, Duration::days(50));
        assert!(!early.due);
        assert_eq!(late.renew_in, Duration::ZERO);
        assert!(late.due);
    }

    #[tokio::test]
    async fn test_reconcile_missing_cert_is_due() {
        let dir = tempdir().unwrap();
        let profile = build_profile(dir.path().join("missing.pem"));
        let clock = FixedClock::new(NOT_BEFORE);
        let sink = MemorySink::default();

        let outcome = reconcile(&profile, &clock, &sink, DURATION_MISMATCH_TOLERANCE)
            .await
            .unwrap();

        assert_eq!(outcome, Reconciliation::Missing);
        assert!(outcome.is_due());
        assert_eq!(outcome.renew_in(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_reconcile_follows_frozen_clock() {
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        write_cert(&cert_path, Duration::days(365));
        let mut profile = build_profile(cert_path);
        profile.renew_before = Some(std::time::Duration::from_secs(60 * 24 * 60 * 60));
        let clock = FixedClock::new(NOT_BEFORE + Duration::days(300));
        let sink = MemorySink::default();

        let before = reconcile(&profile, &clock, &sink, DURATION_MISMATCH_TOLERANCE)
            .await
            .unwrap();
        clock.advance(Duration::days(5));
        let after = reconcile(&profile, &clock, &sink, DURATION_MISMATCH_TOLERANCE)
            .await
            .unwrap();

        let plan = before.plan().unwrap();
        assert_eq!(plan.renew_at, NOT_BEFORE + Duration::days(305));
        assert_eq!(plan.renew_in, Duration::days(5));
        assert!(!before.is_due());
        assert!(after.is_due());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_records_duration_mismatch() {
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        write_cert(&cert_path, Duration::days(90));
        let mut profile = build_profile(cert_path);
        profile.duration = Some(std::time::Duration::from_secs(120 * 24 * 60 * 60));
        let clock = FixedClock::new(NOT_BEFORE);
        let sink = MemorySink::default();

        let outcome = reconcile(&profile, &clock, &sink, DURATION_MISMATCH_TOLERANCE)
            .await
            .unwrap();

        let plan = outcome.plan().unwrap();
        assert_eq!(plan.result.lead_time, Duration::days(60));
        assert_eq!(plan.result.diagnostic, Diagnostic::DurationMismatch);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "edge-proxy");
        assert_eq!(events[0].1.reason, REASON_CERTIFICATE_DURATION);
    }

    #[tokio::test]
    async fn test_reconcile_invalid_cert_errors() {
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("invalid.pem");
        fs::write(&cert_path, "not a cert").unwrap();
        let profile = build_profile(cert_path);
        let clock = FixedClock::new(NOT_BEFORE);

        let err = reconcile(&profile, &clock, &MemorySink::default(), Duration::ZERO)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Failed to parse PEM certificate"));
    }
}

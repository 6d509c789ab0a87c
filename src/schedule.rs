//! Renewal schedule calculation.
//!
//! [`compute`] reconciles the validity window an issuer actually granted with
//! the lifetime and renew-before values a certificate was configured with, and
//! returns how far into the window renewal should start. The function is total:
//! misconfigured policies are folded into a safe fallback and reported through
//! [`Diagnostic`] instead of an error.

use serde::Serialize;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Renew-before window applied when a certificate has no preference.
pub const DEFAULT_RENEW_BEFORE: Duration = Duration::days(30);

/// Largest gap between the requested and the granted lifetime that still
/// counts as a match. Issuers commonly backdate `notBefore` by up to a minute.
pub const DURATION_MISMATCH_TOLERANCE: Duration = Duration::minutes(5);

/// The `[notBefore, notAfter]` interval of an issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("certificate validity window is empty: notAfter {not_after} is not after notBefore {not_before}")]
pub struct InvalidWindow {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl ValidityWindow {
    /// Creates a validity window.
    ///
    /// # Errors
    /// Returns [`InvalidWindow`] if `not_after` is not strictly after
    /// `not_before`.
    pub fn new(
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<Self, InvalidWindow> {
        if not_after <= not_before {
            return Err(InvalidWindow {
                not_before,
                not_after,
            });
        }
        Ok(Self {
            not_before,
            not_after,
        })
    }

    #[must_use]
    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    #[must_use]
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Lifetime actually granted by the issuer. Always positive.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.not_after - self.not_before
    }
}

/// Lifetime and renew-before values requested for a certificate.
///
/// A zero duration means the value was not set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenewalPolicy {
    pub requested_duration: Duration,
    pub requested_renew_before: Duration,
}

impl RenewalPolicy {
    #[must_use]
    pub fn new(requested_duration: Duration, requested_renew_before: Duration) -> Self {
        Self {
            requested_duration,
            requested_renew_before,
        }
    }
}

/// Why a computed schedule differs from what was literally requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostic {
    #[default]
    None,
    /// The issuer granted a lifetime other than the requested one.
    DurationMismatch,
    /// The renew-before value was unusable and the 2/3 fallback was applied.
    ScheduleAdjusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleResult {
    /// Offset from `notBefore` at which renewal starts.
    pub lead_time: Duration,
    pub diagnostic: Diagnostic,
}

impl ScheduleResult {
    /// Absolute instant at which renewal starts.
    #[must_use]
    pub fn renew_at(&self, window: &ValidityWindow) -> OffsetDateTime {
        window.not_before() + self.lead_time
    }

    /// Renew-before window that was effectively applied, measured back from
    /// `notAfter`.
    #[must_use]
    pub fn renewal_window(&self, window: &ValidityWindow) -> Duration {
        window.duration() - self.lead_time
    }
}

/// Computes the renewal schedule using [`DURATION_MISMATCH_TOLERANCE`].
#[must_use]
pub fn compute(window: &ValidityWindow, policy: &RenewalPolicy) -> ScheduleResult {
    compute_with_tolerance(window, policy, DURATION_MISMATCH_TOLERANCE)
}

/// Computes the renewal schedule.
///
/// The granted window is always authoritative. When the requested lifetime
/// disagrees with it by more than `tolerance` the result carries
/// [`Diagnostic::DurationMismatch`] and scheduling proceeds from the granted
/// window alone.
///
/// A renew-before that is set and shorter than the granted lifetime is used
/// as is. With no renew-before, certificates living longer than
/// [`DEFAULT_RENEW_BEFORE`] renew that long before expiry. Every other case
/// (a short lifetime, or a renew-before that is negative or does not fit the
/// lifetime) renews after two thirds of the lifetime and reports
/// [`Diagnostic::ScheduleAdjusted`] unless a mismatch was already reported.
#[must_use]
pub fn compute_with_tolerance(
    window: &ValidityWindow,
    policy: &RenewalPolicy,
    tolerance: Duration,
) -> ScheduleResult {
    let actual = window.duration();
    let mut diagnostic = Diagnostic::None;

    if is_duration_mismatch(policy.requested_duration, actual, tolerance) {
        diagnostic = Diagnostic::DurationMismatch;
    }

    let renew_before = policy.requested_renew_before;
    let lead_time = if renew_before.is_zero() {
        // The default window must fit inside the lifetime, same as a
        // configured one.
        if actual > DEFAULT_RENEW_BEFORE {
            actual - DEFAULT_RENEW_BEFORE
        } else {
            adjusted(&mut diagnostic, actual)
        }
    } else if renew_before.is_positive() && renew_before < actual {
        actual - renew_before
    } else {
        adjusted(&mut diagnostic, actual)
    };

    ScheduleResult {
        lead_time,
        diagnostic,
    }
}

fn is_duration_mismatch(requested: Duration, actual: Duration, tolerance: Duration) -> bool {
    if requested.is_zero() {
        return false;
    }
    requested
        .checked_sub(actual)
        .is_none_or(|diff| diff.abs() > tolerance)
}

fn adjusted(diagnostic: &mut Diagnostic, actual: Duration) -> Duration {
    if *diagnostic == Diagnostic::None {
        *diagnostic = Diagnostic::ScheduleAdjusted;
    }
    two_thirds(actual)
}

/// Two thirds of `duration`, never below one nanosecond.
fn two_thirds(duration: Duration) -> Duration {
    duration
        .checked_mul(2)
        .map_or_else(|| -> Duration { duration / 3 * 2 }, |doubled| -> Duration { doubled / 3 })
        .max(Duration::nanoseconds(1))
}

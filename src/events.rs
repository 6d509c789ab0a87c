//! Turns schedule diagnostics into user facing events.
//!
//! The calculator only classifies; this module decides what an operator gets
//! to read and where it goes.

use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::schedule::{Diagnostic, RenewalPolicy, ScheduleResult, ValidityWindow};
use crate::utils::format_duration;

pub const REASON_CERTIFICATE_DURATION: &str = "CertificateDuration";
pub const REASON_SCHEDULE_MODIFIED: &str = "ScheduleModified";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEvent {
    pub reason: &'static str,
    pub message: String,
}

impl ScheduleEvent {
    /// Builds the event describing `result`, if it deviates from the request.
    #[must_use]
    pub fn from_result(
        window: &ValidityWindow,
        policy: &RenewalPolicy,
        result: &ScheduleResult,
    ) -> Option<Self> {
        let actual = format_duration(window.duration());
        match result.diagnostic {
            Diagnostic::None => None,
            Diagnostic::DurationMismatch => Some(Self {
                reason: REASON_CERTIFICATE_DURATION,
                message: format!(
                    "Certificate received from the issuer has a validity duration of {actual}. \
The requested validity duration was {}",
                    format_duration(policy.requested_duration)
                ),
            }),
            Diagnostic::ScheduleAdjusted => {
                let requested = if policy.requested_renew_before.is_zero() {
                    format!("default {}", format_duration(crate::schedule::DEFAULT_RENEW_BEFORE))
                } else {
                    format_duration(policy.requested_renew_before)
                };
                Some(Self {
                    reason: REASON_SCHEDULE_MODIFIED,
                    message: format!(
                        "Renew-before of {requested} does not fit a validity duration of {actual}. \
Renewal will start {} before expiry",
                        format_duration(result.renewal_window(window))
                    ),
                })
            }
        }
    }
}

/// Destination for schedule events.
pub trait EventSink: Send + Sync {
    fn record(&self, subject: &str, event: &ScheduleEvent);
}

/// Writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, subject: &str, event: &ScheduleEvent) {
        info!("Certificate '{}' {}: {}", subject, event.reason, event.message);
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<(String, ScheduleEvent)>>,
}

impl MemorySink {
    #[must_use]
    pub fn events(&self) -> Vec<(String, ScheduleEvent)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for MemorySink {
    fn record(&self, subject: &str, event: &ScheduleEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subject.to_string(), event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use time::macros::datetime;

    use super::*;
    use crate::schedule::compute;

    fn window(days: i64) -> ValidityWindow {
        let start = datetime!(2024-05-01 00:00 UTC);
        ValidityWindow::new(start, start + Duration::days(days)).unwrap()
    }

    #[test]
    fn test_no_event_without_diagnostic() {
        let window = window(120);
        let policy = RenewalPolicy::default();
        let result = compute(&window, &policy);

        assert!(ScheduleEvent::from_result(&window, &policy, &result).is_none());
    }

    #[test]
    fn test_duration_mismatch_event() {
        let window = window(90);
        let policy = RenewalPolicy::new(Duration::days(120), Duration::ZERO);
        let result = compute(&window, &policy);

        let event = ScheduleEvent::from_result(&window, &policy, &result).unwrap();

        assert_eq!(event.reason, REASON_CERTIFICATE_DURATION);
        assert!(event.message.contains("90days"));
        assert!(event.message.contains("120days"));
    }

    #[test]
    fn test_schedule_modified_event() {
        let window = window(35);
        let policy = RenewalPolicy::new(Duration::days(35), Duration::days(40));
        let result = compute(&window, &policy);

        let event = ScheduleEvent::from_result(&window, &policy, &result).unwrap();

        assert_eq!(event.reason, REASON_SCHEDULE_MODIFIED);
        assert!(event.message.contains("40days"));
        assert!(event.message.contains("35days"));
    }

    #[test]
    fn test_schedule_modified_event_names_default() {
        let window = window(20);
        let policy = RenewalPolicy::default();
        let result = compute(&window, &policy);

        let event = ScheduleEvent::from_result(&window, &policy, &result).unwrap();

        assert!(event.message.contains("default 30days"));
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::default();
        let event = ScheduleEvent {
            reason: REASON_SCHEDULE_MODIFIED,
            message: "moved".to_string(),
        };

        sink.record("edge-proxy", &event);
        TracingSink.record("edge-proxy", &event);

        assert_eq!(sink.events(), vec![("edge-proxy".to_string(), event)]);
    }
}

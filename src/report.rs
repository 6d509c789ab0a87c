use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::ProfileSettings;
use crate::controller::Reconciliation;
use crate::schedule::Diagnostic;
use crate::utils::format_duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Missing,
    Scheduled,
    Due,
}

/// One line of `certwatch check` output.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReport {
    pub name: String,
    pub cert_path: String,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renew_at: Option<String>,
    pub renew_in: String,
    pub diagnostic: Diagnostic,
}

impl ScheduleReport {
    #[must_use]
    pub fn new(profile: &ProfileSettings, reconciliation: &Reconciliation) -> Self {
        let plan = reconciliation.plan();
        let status = match plan {
            None => ReportStatus::Missing,
            Some(plan) if plan.due => ReportStatus::Due,
            Some(_) => ReportStatus::Scheduled,
        };
        Self {
            name: profile.name.clone(),
            cert_path: profile.cert_path.display().to_string(),
            status,
            not_before: plan.map(|plan| timestamp(plan.window.not_before())),
            not_after: plan.map(|plan| timestamp(plan.window.not_after())),
            lead_time: plan.map(|plan| format_duration(plan.result.lead_time)),
            renew_before: plan
                .map(|plan| format_duration(plan.result.renewal_window(&plan.window))),
            renew_at: plan.map(|plan| timestamp(plan.renew_at)),
            renew_in: format_duration(reconciliation.renew_in()),
            diagnostic: plan.map_or(Diagnostic::None, |plan| plan.result.diagnostic),
        }
    }

    #[must_use]
    pub fn to_text(&self) -> String {
        match self.status {
            ReportStatus::Missing => format!(
                "{}: certificate {} not found, renewal due now",
                self.name, self.cert_path
            ),
            ReportStatus::Scheduled | ReportStatus::Due => {
                let mut line = format!(
                    "{}: renew at {} (in {}, {} before expiry at {})",
                    self.name,
                    self.renew_at.as_deref().unwrap_or_default(),
                    self.renew_in,
                    self.renew_before.as_deref().unwrap_or_default(),
                    self.not_after.as_deref().unwrap_or_default(),
                );
                if self.status == ReportStatus::Due {
                    line.push_str(" [due]");
                }
                match self.diagnostic {
                    Diagnostic::None => {}
                    Diagnostic::DurationMismatch => line.push_str(" [duration mismatch]"),
                    Diagnostic::ScheduleAdjusted => line.push_str(" [schedule adjusted]"),
                }
                line
            }
        }
    }
}

fn timestamp(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use time::Duration;
    use time::macros::datetime;

    use super::*;
    use crate::config::HookSettings;
    use crate::controller::RenewalPlan;
    use crate::schedule::{RenewalPolicy, ValidityWindow, compute};

    fn profile() -> ProfileSettings {
        ProfileSettings {
            name: "edge-proxy".to_string(),
            cert_path: PathBuf::from("certs/edge.pem"),
            duration: None,
            renew_before: None,
            retry: None,
            hooks: HookSettings::default(),
        }
    }

    fn scheduled(days: i64, renew_before: Duration, now_offset: Duration) -> Reconciliation {
        let not_before = datetime!(2024-01-01 00:00 UTC);
        let window = ValidityWindow::new(not_before, not_before + Duration::days(days)).unwrap();
        let result = compute(&window, &RenewalPolicy::new(Duration::ZERO, renew_before));
        Reconciliation::Scheduled(RenewalPlan::new(window, result, not_before + now_offset))
    }

    #[test]
    fn test_report_for_scheduled_certificate() {
        let report = ScheduleReport::new(
            &profile(),
            &scheduled(90, Duration::ZERO, Duration::days(10)),
        );

        assert_eq!(report.status, ReportStatus::Scheduled);
        assert_eq!(report.renew_at.as_deref(), Some("2024-03-01T00:00:00Z"));
        assert_eq!(report.renew_in, "50days");
        assert_eq!(report.renew_before.as_deref(), Some("30days"));
        assert_eq!(
            report.to_text(),
            "edge-proxy: renew at 2024-03-01T00:00:00Z (in 50days, 30days before expiry at 2024-03-31T00:00:00Z)"
        );
    }

    #[test]
    fn test_report_marks_adjusted_and_due() {
        let report = ScheduleReport::new(
            &profile(),
            &scheduled(20, Duration::days(40), Duration::days(19)),
        );

        assert_eq!(report.status, ReportStatus::Due);
        assert_eq!(report.diagnostic, Diagnostic::ScheduleAdjusted);
        assert!(report.to_text().ends_with("[due] [schedule adjusted]"));
    }

    #[test]
    fn test_report_for_missing_certificate_serializes() {
        let report = ScheduleReport::new(&profile(), &Reconciliation::Missing);

        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "missing");
        assert_eq!(json["diagnostic"], "none");
        assert_eq!(json["renew_in"], "0s");
        assert!(json.get("renew_at").is_none());
        assert!(report.to_text().contains("not found"));
    }
}

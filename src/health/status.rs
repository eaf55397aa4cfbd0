//! Health status values and report aggregation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Most severe status in `statuses`; healthy when there are none.
    pub fn worst<I>(statuses: I) -> HealthStatus
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        statuses
            .into_iter()
            .max_by_key(|s| s.severity())
            .unwrap_or(HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one sub-check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl CheckResult {
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            duration_ms: 0,
            message: None,
            details: Value::Null,
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded).with_message(message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Aggregate of named sub-checks. The overall status is the worst of the parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, CheckResult>,
}

impl HealthReport {
    pub fn from_checks(checks: BTreeMap<String, CheckResult>) -> Self {
        Self {
            status: HealthStatus::worst(checks.values().map(|c| c.status)),
            timestamp: Utc::now(),
            checks,
        }
    }

    /// One line naming every check that is not healthy.
    pub fn summary(&self) -> String {
        let problems: Vec<String> = self
            .checks
            .iter()
            .filter(|(_, check)| !check.status.is_ok())
            .map(|(name, check)| match &check.message {
                Some(message) => format!("{} {}: {}", name, check.status, message),
                None => format!("{} {}", name, check.status),
            })
            .collect();

        if problems.is_empty() {
            "all checks passed".to_string()
        } else {
            problems.join("; ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(statuses: &[(&str, HealthStatus)]) -> HealthReport {
        HealthReport::from_checks(
            statuses
                .iter()
                .map(|(name, status)| (name.to_string(), CheckResult::new(*status)))
                .collect(),
        )
    }

    #[test]
    fn test_worst_status() {
        assert_eq!(HealthStatus::worst(std::iter::empty()), HealthStatus::Healthy);
        assert_eq!(
            HealthStatus::worst([HealthStatus::Healthy, HealthStatus::Degraded]),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::worst([
                HealthStatus::Unhealthy,
                HealthStatus::Degraded,
                HealthStatus::Healthy
            ]),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_single_unhealthy_check_makes_report_unhealthy() {
        let all_ok = report(&[
            ("database", HealthStatus::Healthy),
            ("services", HealthStatus::Healthy),
            ("storage", HealthStatus::Healthy),
            ("system", HealthStatus::Healthy),
        ]);
        assert_eq!(all_ok.status, HealthStatus::Healthy);
        assert_eq!(all_ok.summary(), "all checks passed");

        let storage_down = report(&[
            ("database", HealthStatus::Healthy),
            ("services", HealthStatus::Healthy),
            ("storage", HealthStatus::Unhealthy),
            ("system", HealthStatus::Healthy),
        ]);
        assert_eq!(storage_down.status, HealthStatus::Unhealthy);
        assert_eq!(storage_down.summary(), "storage unhealthy");
    }

    #[test]
    fn test_check_result_json() {
        let check = CheckResult::degraded("slow");
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["message"], "slow");
        assert!(json.get("details").is_none());
    }
}

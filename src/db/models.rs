//! Database model types.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::probe::normalize_url;

/// Who gets told when a target changes state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSettings {
    pub enabled: bool,
    #[serde(default)]
    pub emails: BTreeSet<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            emails: BTreeSet::new(),
            phone: None,
        }
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    pub check_ssl: bool,
    pub check_security: bool,
    #[serde(default)]
    pub alerts: AlertSettings,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            description: None,
            check_ssl: true,
            check_security: true,
            alerts: AlertSettings::default(),
        }
    }
}

impl Target {
    /// Canonicalize the URL and validate alert recipients.
    ///
    /// A missing scheme becomes `https://`. Fails with a human readable
    /// message when the URL has no host or a recipient is malformed.
    pub fn normalize(&mut self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("target name cannot be empty".to_string());
        }

        let url = normalize_url(&self.url).map_err(|e| e.to_string())?;
        self.url = url.to_string();

        for email in &self.alerts.emails {
            if !is_valid_email(email) {
                return Err(format!("invalid alert email: {}", email));
            }
        }

        if let Some(phone) = &self.alerts.phone {
            if !is_valid_phone(phone) {
                return Err(format!("invalid alert phone: {}", phone));
            }
        }

        Ok(())
    }
}

fn is_valid_email(email: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
    });
    re.is_match(email)
}

fn is_valid_phone(phone: &str) -> bool {
    let phone = phone.trim();
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let len = if phone.starts_with('+') {
        digits.len() + 1
    } else {
        digits.len()
    };
    (8..=16).contains(&len)
}

/// The outcome of one health check. Append-only once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub target_id: i64,
    pub timestamp: DateTime<Utc>,
    pub is_up: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<f64>,
    pub error: Option<String>,
    pub ssl_valid: Option<bool>,
    pub ssl_days_remaining: Option<i64>,
    pub ssl_issuer: Option<String>,
    pub ssl_error: Option<String>,
    pub security_score: Option<u8>,
    pub security_issues: Vec<String>,
    pub ping_time_ms: Option<f64>,
    pub redirect_url: Option<String>,
    pub content_size: Option<u64>,
}

impl CheckResult {
    /// An empty "down" result; probes fill in what they learn.
    pub fn new(target_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            target_id,
            timestamp,
            is_up: false,
            status_code: None,
            response_time_ms: None,
            error: None,
            ssl_valid: None,
            ssl_days_remaining: None,
            ssl_issuer: None,
            ssl_error: None,
            security_score: None,
            security_issues: Vec::new(),
            ping_time_ms: None,
            redirect_url: None,
            content_size: None,
        }
    }

    /// Result recorded when a check did not finish within the tick budget.
    pub fn timed_out(target_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            error: Some("timeout".to_string()),
            ..Self::new(target_id, timestamp)
        }
    }
}

/// A contiguous downtime episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Zero until the store assigns one.
    pub id: i64,
    pub target_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub resolved: bool,
}

impl Incident {
    pub fn open(target_id: i64, start_time: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            target_id,
            start_time,
            end_time: None,
            duration_seconds: None,
            resolved: false,
        }
    }

    /// Close the incident at `end_time`. Duration is truncated to whole
    /// seconds and never negative.
    pub fn resolve(&mut self, end_time: DateTime<Utc>) {
        let duration = (end_time - self.start_time).num_seconds().max(0);
        self.end_time = Some(end_time);
        self.duration_seconds = Some(duration);
        self.resolved = true;
    }
}

/// Per-day rollup computed from check history. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStat {
    pub day: NaiveDate,
    pub checks: u64,
    pub up_count: u64,
    pub uptime_percentage: f64,
    pub avg_response_time: Option<f64>,
    pub avg_security_score: Option<f64>,
}

/// Response time summary over up checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResponseTimeStats {
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
}

/// Counters from the most recent scheduler tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub timestamp: DateTime<Utc>,
    pub targets_checked: u64,
    pub up_count: u64,
    pub down_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_adds_scheme() {
        let mut target = Target {
            name: "Example".to_string(),
            url: "example.com".to_string(),
            ..Default::default()
        };
        target.normalize().unwrap();
        assert_eq!(target.url, "https://example.com/");
    }

    #[test]
    fn test_normalize_rejects_bad_recipients() {
        let mut target = Target {
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        target.alerts.emails.insert("not-an-email".to_string());
        assert!(target.normalize().is_err());

        target.alerts.emails.clear();
        target.alerts.emails.insert("ops@example.com".to_string());
        target.alerts.phone = Some("12".to_string());
        assert!(target.normalize().is_err());

        target.alerts.phone = Some("+1 (555) 010-9999".to_string());
        assert!(target.normalize().is_ok());
    }

    #[test]
    fn test_incident_resolve_truncates() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut incident = Incident::open(7, start);
        incident.resolve(start + chrono::Duration::milliseconds(90_900));
        assert!(incident.resolved);
        assert_eq!(incident.duration_seconds, Some(90));
        assert_eq!(incident.end_time, Some(start + chrono::Duration::milliseconds(90_900)));
    }

    #[test]
    fn test_incident_resolve_clamps_clock_skew() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut incident = Incident::open(7, start);
        incident.resolve(start - chrono::Duration::seconds(5));
        assert_eq!(incident.duration_seconds, Some(0));
    }
}

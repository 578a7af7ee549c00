//! Alert payloads and their human-readable renderings.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Target;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    Down {
        status_code: Option<u16>,
        response_time_ms: Option<f64>,
    },
    Recovered {
        downtime_seconds: i64,
    },
    SslExpiring {
        days_remaining: i64,
    },
}

/// One event for one target, addressed to that target's recipients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub target_id: i64,
    pub target_name: String,
    pub url: String,
    pub emails: Vec<String>,
    pub phone: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: AlertKind,
}

impl Alert {
    pub fn new(target: &Target, kind: AlertKind) -> Self {
        Self {
            target_id: target.id,
            target_name: target.name.clone(),
            url: target.url.clone(),
            emails: target.alerts.emails.iter().cloned().collect(),
            phone: target.alerts.phone.clone(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn subject(&self) -> String {
        let name = &self.target_name;
        match self.kind {
            AlertKind::Down { .. } => format!("ALERT: {} is DOWN!", name),
            AlertKind::Recovered { .. } => format!("RECOVERED: {} is back online", name),
            AlertKind::SslExpiring { .. } => format!("SSL Certificate Expiring: {}", name),
        }
    }

    /// Multi-line message for email-like channels.
    pub fn body(&self) -> String {
        let time = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        let detail = match self.kind {
            AlertKind::Down {
                status_code,
                response_time_ms,
            } => format!(
                "Status: DOWN\nTime: {}\nStatus Code: {}\nResponse Time: {} ms\n\n\
                 Please check your website as soon as possible.",
                time,
                or_na(status_code),
                or_na(response_time_ms),
            ),
            AlertKind::Recovered { downtime_seconds } => format!(
                "Status: RECOVERED\nTime: {}\nDowntime Duration: {}\n\n\
                 Your website is now back online.",
                time,
                format_duration(downtime_seconds),
            ),
            AlertKind::SslExpiring { days_remaining } => format!(
                "Alert Time: {}\n\nYour SSL certificate will expire in {} days.\n\
                 Please renew your SSL certificate before it expires.",
                time, days_remaining,
            ),
        };

        format!("Website: {}\nURL: {}\n{}", self.target_name, self.url, detail)
    }

    /// One-line message for SMS-like channels.
    pub fn short_text(&self) -> String {
        match self.kind {
            AlertKind::Down { status_code, .. } => format!(
                "ALERT: {} ({}) is DOWN! Status: {}. Please check ASAP.",
                self.target_name,
                self.url,
                or_na(status_code)
            ),
            AlertKind::Recovered { downtime_seconds } => format!(
                "RECOVERED: {} ({}) is back online after {} of downtime.",
                self.target_name,
                self.url,
                format_duration(downtime_seconds)
            ),
            AlertKind::SslExpiring { days_remaining } => format!(
                "SSL ALERT: {} SSL certificate expires in {} days. Please renew it soon.",
                self.target_name, days_remaining
            ),
        }
    }
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

/// Humanize a downtime duration: seconds under a minute, minutes and
/// seconds under an hour, hours and minutes beyond.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        format!("{} seconds", seconds)
    } else if seconds < 3600 {
        format!("{} minutes, {} seconds", seconds / 60, seconds % 60)
    } else {
        format!("{} hours, {} minutes", seconds / 3600, (seconds % 3600) / 60)
    }
}

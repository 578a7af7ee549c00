//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::db::Target;
use crate::notify::{NotificationGateway, NotifyError};
use crate::probe::{CertificateInfo, HttpResponse, ProbeError, Transport};

/// What a scripted fetch returns.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(HttpResponse),
    Fail(ProbeError),
}

impl Step {
    pub fn status(status: u16) -> Self {
        Step::Respond(HttpResponse {
            status,
            final_url: String::new(),
            headers: Default::default(),
            content_size: 512,
        })
    }

    pub fn refused() -> Self {
        Step::Fail(ProbeError::Transport("connection refused".to_string()))
    }
}

/// A [`Transport`] that replays fetch outcomes in order.
///
/// A `Step::status` response echoes the requested URL, so no redirect is
/// recorded. Once the script runs out, `fallback` is repeated, or the
/// fetch fails when there is none.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    ping: Option<f64>,
    certificate: Result<CertificateInfo, ProbeError>,
    delay: Duration,
    fetch_calls: AtomicUsize,
    ping_calls: AtomicUsize,
    certificate_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: None,
            ping: Some(5.0),
            certificate: Ok(certificate_expiring_in(90, "Test CA")),
            delay: Duration::ZERO,
            fetch_calls: AtomicUsize::new(0),
            ping_calls: AtomicUsize::new(0),
            certificate_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answer every fetch with the same step.
    pub fn always(step: Step) -> Self {
        Self {
            fallback: Some(step),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_ping(mut self, ping: Option<f64>) -> Self {
        self.ping = ping;
        self
    }

    pub fn with_certificate(mut self, certificate: Result<CertificateInfo, ProbeError>) -> Self {
        self.certificate = certificate;
        self
    }

    /// Make every fetch take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    pub fn certificate_calls(&self) -> usize {
        self.certificate_calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn ping(&self, _host: &str, timeout: Duration) -> Result<f64, ProbeError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        self.ping.ok_or(ProbeError::Timeout(timeout))
    }

    async fn fetch(&self, url: &Url) -> Result<HttpResponse, ProbeError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let step = self.steps.lock().unwrap().pop_front().or_else(|| self.fallback.clone());
        match step {
            Some(Step::Respond(mut response)) => {
                if response.final_url.is_empty() {
                    response.final_url = url.to_string();
                }
                Ok(response)
            }
            Some(Step::Fail(e)) => Err(e),
            None => Err(ProbeError::Transport("script exhausted".to_string())),
        }
    }

    async fn inspect_certificate(
        &self,
        _host: &str,
        _port: u16,
        _timeout: Duration,
    ) -> Result<CertificateInfo, ProbeError> {
        self.certificate_calls.fetch_add(1, Ordering::SeqCst);
        self.certificate.clone()
    }
}

/// A certificate whose `days_remaining` is exactly `days` for the next
/// twelve hours.
pub fn certificate_expiring_in(days: i64, issuer: &str) -> CertificateInfo {
    let now = Utc::now();
    CertificateInfo {
        issuer: Some(issuer.to_string()),
        subject: Some("example.com".to_string()),
        not_before: now - ChronoDuration::days(30),
        not_after: now + ChronoDuration::days(days) + ChronoDuration::hours(12),
        subject_alt_names: vec!["example.com".to_string()],
    }
}

/// An event seen by [`RecordingGateway`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Down { target_id: i64, status_code: Option<u16> },
    Recovered { target_id: i64, downtime_seconds: i64 },
    SslExpiring { target_id: i64, days_remaining: i64 },
}

/// Remembers every notification. Optionally fails after recording.
#[derive(Default)]
pub struct RecordingGateway {
    events: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingGateway {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }

    pub fn recovered_count(&self) -> usize {
        self.count(|n| matches!(n, Notification::Recovered { .. }))
    }

    pub fn down_count(&self) -> usize {
        self.count(|n| matches!(n, Notification::Down { .. }))
    }

    pub fn ssl_count(&self) -> usize {
        self.count(|n| matches!(n, Notification::SslExpiring { .. }))
    }

    fn count(&self, pred: impl Fn(&Notification) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|n| pred(n)).count()
    }

    fn record(&self, event: Notification) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event);
        if self.fail {
            Err(NotifyError::Partial(vec!["email: unavailable".to_string()]))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn notify_down(
        &self,
        target: &Target,
        status_code: Option<u16>,
        _response_time_ms: Option<f64>,
    ) -> Result<(), NotifyError> {
        self.record(Notification::Down {
            target_id: target.id,
            status_code,
        })
    }

    async fn notify_recovered(
        &self,
        target: &Target,
        downtime_seconds: i64,
    ) -> Result<(), NotifyError> {
        self.record(Notification::Recovered {
            target_id: target.id,
            downtime_seconds,
        })
    }

    async fn notify_ssl_expiring(
        &self,
        target: &Target,
        days_remaining: i64,
    ) -> Result<(), NotifyError> {
        self.record(Notification::SslExpiring {
            target_id: target.id,
            days_remaining,
        })
    }
}

//! Probe module for endpoint health checks.
//!
//! A check combines a latency probe, an HTTP probe with retries, an
//! optional TLS certificate probe and an optional security header scan.
//! Target-side failures are recorded in the [`CheckResult`]; only a
//! malformed target makes [`Prober::check`] fail.

mod http;
mod ping;
mod security;
mod tls;

pub use http::*;
pub use ping::*;
pub use security::*;
pub use tls::*;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::db::{CheckResult, Target};

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Network operations used by a check.
///
/// [`NetworkTransport`] talks to the real network; tests swap in a
/// scripted implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Round-trip latency to `host` in milliseconds.
    async fn ping(&self, host: &str, timeout: Duration) -> Result<f64, ProbeError>;

    /// One GET request, following redirects. Only transport-level
    /// failures are errors; any HTTP status is a response.
    async fn fetch(&self, url: &Url) -> Result<HttpResponse, ProbeError>;

    /// TLS handshake with `host:port` and parse of the leaf certificate.
    async fn inspect_certificate(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<CertificateInfo, ProbeError>;
}

/// The production transport: ICMP/`ping`, reqwest and rustls.
pub struct NetworkTransport {
    http: HttpClient,
    tls: CertificateInspector,
}

impl NetworkTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, ProbeError> {
        Ok(Self {
            http: HttpClient::new(timeout, user_agent)?,
            tls: CertificateInspector::new()?,
        })
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    async fn ping(&self, host: &str, timeout: Duration) -> Result<f64, ProbeError> {
        run_ping_probe(host, timeout).await
    }

    async fn fetch(&self, url: &Url) -> Result<HttpResponse, ProbeError> {
        self.http.get(url).await
    }

    async fn inspect_certificate(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<CertificateInfo, ProbeError> {
        self.tls.inspect(host, port, timeout).await
    }
}

/// Add `https://` when the scheme is missing and require scheme + host.
pub fn normalize_url(input: &str) -> Result<Url, ProbeError> {
    let input = input.trim();
    let candidate = if input.starts_with("http://") || input.starts_with("https://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ProbeError::InvalidTarget(format!("{}: {}", input, e)))?;

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ProbeError::InvalidTarget(format!("{}: missing host", input))),
    }
}

/// How often and how patiently the HTTP probe retries transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, at least one is always made.
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Runs the full health check for one target.
#[derive(Clone)]
pub struct Prober {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Prober {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            transport,
            retry,
            timeout,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Check one target.
    ///
    /// Fails only with [`ProbeError::InvalidTarget`], before any I/O.
    pub async fn check(&self, target: &Target) -> Result<CheckResult, ProbeError> {
        let url = normalize_url(&target.url)?;
        let host = url.host_str().unwrap_or_default().to_string();

        let mut result = CheckResult::new(target.id, Utc::now());

        result.ping_time_ms = match self.transport.ping(&host, self.timeout).await {
            Ok(ms) => Some(round2(ms)),
            Err(e) => {
                tracing::debug!("Prober: ping to {} failed: {}", host, e);
                None
            }
        };

        let response = match self.fetch_with_retry(&url).await {
            Ok((response, elapsed_ms)) => {
                result.status_code = Some(response.status);
                result.is_up = (200..400).contains(&response.status);
                result.response_time_ms = Some(round2(elapsed_ms));
                result.content_size = Some(response.content_size);
                if response.final_url != url.as_str() {
                    result.redirect_url = Some(response.final_url.clone());
                }
                Some(response)
            }
            Err(e) => {
                tracing::warn!(
                    "Prober: failed to reach {} after {} attempts: {}",
                    url,
                    self.retry.attempts.max(1),
                    e
                );
                result.error = Some(e.to_string());
                None
            }
        };

        if target.check_ssl && url.scheme() == "https" {
            let port = url.port_or_known_default().unwrap_or(443);
            match self
                .transport
                .inspect_certificate(&host, port, self.timeout)
                .await
            {
                Ok(cert) => {
                    let days = cert.days_remaining(Utc::now());
                    result.ssl_days_remaining = Some(days);
                    result.ssl_valid = Some(days > 0);
                    result.ssl_issuer = cert.issuer;
                }
                Err(e) => {
                    result.ssl_valid = Some(false);
                    result.ssl_error = Some(e.to_string());
                }
            }
        }

        if target.check_security && result.is_up {
            let report = evaluate_security(
                url.scheme() == "https",
                response.as_ref().map(|r| &r.headers),
            );
            result.security_score = Some(report.score);
            result.security_issues = report.issues;
        }

        Ok(result)
    }

    /// GET with the retry policy. Returns the response and the duration of
    /// the successful attempt in milliseconds, or the last transport error.
    pub async fn fetch_with_retry(&self, url: &Url) -> Result<(HttpResponse, f64), ProbeError> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = ProbeError::Transport("no attempt made".to_string());

        for attempt in 1..=attempts {
            let start = Instant::now();
            match self.transport.fetch(url).await {
                Ok(response) => {
                    return Ok((response, start.elapsed().as_secs_f64() * 1000.0));
                }
                Err(e) => {
                    tracing::debug!(
                        "Prober: attempt {}/{} for {} failed: {}",
                        attempt,
                        attempts,
                        url,
                        e
                    );
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }

        Err(last_error)
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

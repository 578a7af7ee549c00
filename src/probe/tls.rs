//! TLS certificate probe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

use super::ProbeError;

/// The parts of a leaf certificate the monitor reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateInfo {
    /// Issuer organization, falling back to its common name.
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject_alt_names: Vec<String>,
}

impl CertificateInfo {
    /// Whole days until expiry, rounded toward negative infinity.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_seconds().div_euclid(86_400)
    }
}

/// Verifying TLS client that reports on the peer's leaf certificate.
pub struct CertificateInspector {
    connector: TlsConnector,
}

impl CertificateInspector {
    pub fn new() -> Result<Self, ProbeError> {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            tracing::warn!("TLS probe: error loading native certificate: {}", err);
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        tracing::debug!("TLS probe: loaded {} root certificates ({} ignored)", added, ignored);

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ProbeError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Connect, handshake and parse the leaf certificate. The connect and
    /// handshake together are bounded by `timeout`.
    pub async fn inspect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<CertificateInfo, ProbeError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ProbeError::InvalidTarget(format!("{}: {}", host, e)))?;

        let handshake = async {
            let tcp = TcpStream::connect((host, port))
                .await
                .map_err(|e| ProbeError::Transport(e.to_string()))?;
            self.connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| ProbeError::Tls(e.to_string()))
        };

        let stream = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| ProbeError::Timeout(timeout))??;

        let (_, conn) = stream.get_ref();
        let leaf = conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| ProbeError::Tls("peer sent no certificate".to_string()))?;

        parse_certificate(leaf)
    }
}

/// Extract the reported fields from a DER certificate.
pub fn parse_certificate(der: &CertificateDer<'_>) -> Result<CertificateInfo, ProbeError> {
    let (_, cert) = X509Certificate::from_der(der.as_ref())
        .map_err(|e| ProbeError::Tls(format!("unparseable certificate: {}", e)))?;

    let issuer = first_attr(cert.issuer().iter_organization())
        .or_else(|| first_attr(cert.issuer().iter_common_name()));
    let subject = first_attr(cert.subject().iter_common_name());

    let validity = cert.validity();
    let not_before = timestamp(validity.not_before.timestamp())?;
    let not_after = timestamp(validity.not_after.timestamp())?;

    let subject_alt_names = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(CertificateInfo {
        issuer,
        subject,
        not_before,
        not_after,
        subject_alt_names,
    })
}

fn first_attr<'a, 'b: 'a>(
    mut attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
) -> Option<String> {
    attrs.next().and_then(|a| a.as_str().ok()).map(str::to_string)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, ProbeError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ProbeError::Tls(format!("certificate time out of range: {}", secs)))
}

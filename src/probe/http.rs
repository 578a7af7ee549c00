//! HTTP probe implementation.

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use std::time::Duration;
use url::Url;

use super::ProbeError;

/// What the HTTP probe keeps from a response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// URL after following redirects.
    pub final_url: String,
    pub headers: HeaderMap,
    /// Body length in bytes.
    pub content_size: u64,
}

/// Shared reqwest client with the probe's timeout and identifying headers.
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, ProbeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| ProbeError::InvalidTarget(format!("bad user agent: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .default_headers(headers)
            .redirect(Policy::limited(10))
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Issue a GET and read the whole body.
    pub async fn get(&self, url: &Url) -> Result<HttpResponse, ProbeError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();

        // Read the full body so content size reflects the complete transfer
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(HttpResponse {
            status,
            final_url,
            headers,
            content_size: body.len() as u64,
        })
    }

    fn classify(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_probe_unreachable_port() {
        let client = HttpClient::new(Duration::from_millis(500), "domainwatch-test").unwrap();
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        let result = client.get(&url).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_user_agent() {
        assert!(HttpClient::new(Duration::from_secs(1), "bad\nagent").is_err());
    }
}

//! Security header posture scoring.

use reqwest::header::HeaderMap;
use serde::Serialize;

/// Headers checked, in report order.
pub const SECURITY_HEADERS: [&str; 6] = [
    "Content-Security-Policy",
    "X-XSS-Protection",
    "X-Content-Type-Options",
    "Strict-Transport-Security",
    "X-Frame-Options",
    "Referrer-Policy",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityReport {
    /// `round(100 * passed / total)`.
    pub score: u8,
    pub issues: Vec<String>,
}

/// Score the scheme and, when a response is available, its headers.
///
/// The HTTPS check always counts. Each header check counts only when
/// `headers` is `Some`.
pub fn evaluate_security(is_https: bool, headers: Option<&HeaderMap>) -> SecurityReport {
    let mut issues = Vec::new();
    let mut passed = 0u32;
    let mut total = 1u32;

    if is_https {
        passed += 1;
    } else {
        issues.push("Not using HTTPS".to_string());
    }

    if let Some(headers) = headers {
        for name in SECURITY_HEADERS {
            total += 1;
            if headers.contains_key(name) {
                passed += 1;
            } else {
                issues.push(format!("Missing {} header", name));
            }
        }
    }

    let score = (100.0 * f64::from(passed) / f64::from(total)).round() as u8;
    SecurityReport { score, issues }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(names: &[&'static str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for name in names {
            map.insert(*name, HeaderValue::from_static("1"));
        }
        map
    }

    #[test]
    fn test_https_without_headers() {
        let report = evaluate_security(true, Some(&HeaderMap::new()));
        assert_eq!(report.score, 14);
        assert_eq!(report.issues.len(), 6);
        assert_eq!(report.issues[0], "Missing Content-Security-Policy header");
        assert_eq!(report.issues[5], "Missing Referrer-Policy header");
    }

    #[test]
    fn test_all_checks_pass() {
        let report = evaluate_security(true, Some(&headers(&SECURITY_HEADERS)));
        assert_eq!(report.score, 100);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_plain_http_with_all_headers_rounds() {
        // 6 of 7 is 85.7
        let report = evaluate_security(false, Some(&headers(&SECURITY_HEADERS)));
        assert_eq!(report.score, 86);
        assert_eq!(report.issues, vec!["Not using HTTPS".to_string()]);
    }

    #[test]
    fn test_no_response_counts_scheme_only() {
        assert_eq!(evaluate_security(true, None).score, 100);
        let report = evaluate_security(false, None);
        assert_eq!(report.score, 0);
        assert_eq!(report.issues, vec!["Not using HTTPS".to_string()]);
    }

    #[test]
    fn test_issue_order_is_fixed() {
        let report = evaluate_security(
            false,
            Some(&headers(&["X-XSS-Protection", "X-Frame-Options"])),
        );
        assert_eq!(
            report.issues,
            vec![
                "Not using HTTPS",
                "Missing Content-Security-Policy header",
                "Missing X-Content-Type-Options header",
                "Missing Strict-Transport-Security header",
                "Missing Referrer-Policy header",
            ]
        );
        // 2 of 7
        assert_eq!(report.score, 29);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut map = HeaderMap::new();
        map.insert("strict-transport-security", HeaderValue::from_static("max-age=1"));
        let report = evaluate_security(true, Some(&map));
        assert!(!report.issues.iter().any(|i| i.contains("Strict-Transport-Security")));
    }
}

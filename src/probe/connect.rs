use reqwest::StatusCode;
use serde::Serialize;

use super::executor::RequestExecutor;
use super::fingerprint::{DomainFingerprinter, NOT_FOUND};
use crate::anonymizer::RequestHeaders;
use crate::transport::ProbeRequest;

pub const DEFAULT_PROXY_TEST_URL: &str = "http://httpbin.org/ip";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityReport {
    pub success: bool,
    pub message: String,
    /// Set by endpoint checks that got as far as fingerprinting.
    pub domain: Option<String>,
}

impl ConnectivityReport {
    fn failed(message: String) -> Self {
        Self { success: false, message, domain: None }
    }
}

/// GET `test_url` through the executor's transport and report whether the
/// proxy path works. Only a 200 counts as success.
pub async fn test_proxy(executor: &RequestExecutor, test_url: &str) -> ConnectivityReport {
    let retries = executor.max_retries();
    match executor.execute(&ProbeRequest::get(test_url), None).await {
        Ok(resp) if resp.status == StatusCode::OK => {
            let sample: String = resp.body.chars().take(200).collect();
            ConnectivityReport {
                success: true,
                message: format!("Proxy connection successful. Response: {sample}"),
                domain: None,
            }
        }
        Ok(resp) if matches!(resp.status_code(), 502 | 503) => ConnectivityReport::failed(format!(
            "Proxy connection failed after {retries} retries. Last status: {}",
            resp.status_code()
        )),
        Ok(resp) => ConnectivityReport::failed(format!(
            "Proxy connection failed with status code: {}",
            resp.status_code()
        )),
        Err(e) if e.is_transient() => {
            ConnectivityReport::failed(format!("Proxy connection failed after {retries} retries: {e}"))
        }
        Err(e) => ConnectivityReport::failed(format!("Proxy connection failed: {e}")),
    }
}

/// Pre-flight for a target: a plain GET must not time out at the edge
/// (504), after which the internal domain is fingerprinted.
pub async fn test_endpoint(
    executor: &RequestExecutor,
    headers: &RequestHeaders,
    base_url: &str,
) -> ConnectivityReport {
    let request = ProbeRequest::get(base_url).with_headers(headers.build());
    match executor.execute(&request, None).await {
        Ok(resp) if resp.status == StatusCode::GATEWAY_TIMEOUT => {
            return ConnectivityReport::failed("Connection failed, endpoint timed out".to_string());
        }
        Ok(_) => {}
        Err(e) => return ConnectivityReport::failed(format!("Connection failed: {e}")),
    }

    let fingerprinter = DomainFingerprinter::new(executor.clone(), headers.clone());
    let domain = fingerprinter.discover_domain(base_url).await;
    ConnectivityReport {
        success: true,
        message: format!("Fingerprinting host... Internal Domain name: {domain}"),
        domain: (domain != NOT_FOUND).then_some(domain),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntlm::challenge::fixtures;
    use crate::probe::testing::*;

    #[tokio::test]
    async fn test_proxy_success() {
        let transport = MockTransport::new(|_, _| {
            let mut resp = response(200);
            resp.body = format!("{{\"origin\": \"203.0.113.7\"}}{}", "x".repeat(500));
            Ok(resp)
        });
        let report = test_proxy(&executor(transport), DEFAULT_PROXY_TEST_URL).await;
        assert!(report.success);
        assert!(report.message.contains("203.0.113.7"));
        assert!(report.message.len() < 300);
    }

    #[tokio::test]
    async fn test_proxy_exhausted_503() {
        let transport = MockTransport::always(503);
        let report = test_proxy(&executor(transport.clone()), DEFAULT_PROXY_TEST_URL).await;
        assert!(!report.success);
        assert!(report.message.contains("Last status: 503"));
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_proxy_other_status_and_errors() {
        let report = test_proxy(&executor(MockTransport::always(407)), DEFAULT_PROXY_TEST_URL).await;
        assert!(!report.success);
        assert!(report.message.contains("407"));

        let report = test_proxy(&executor(MockTransport::failing()), DEFAULT_PROXY_TEST_URL).await;
        assert!(!report.success);
        assert!(report.message.contains("after 3 retries"));
    }

    #[tokio::test]
    async fn test_endpoint_timed_out() {
        let transport = MockTransport::always(504);
        let report = test_endpoint(&executor(transport.clone()), &fixed_headers(), "https://mail.example.com").await;
        assert!(!report.success);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_endpoint_fingerprints_domain() {
        let challenge = fixtures::header(&fixtures::challenge([5; 8], &fixtures::corp_target_info()));
        let transport = MockTransport::new(move |i, _| match i {
            0 => Ok(response(200)),
            _ => Ok(response_with_header(401, "WWW-Authenticate", &challenge)),
        });
        let report = test_endpoint(&executor(transport), &fixed_headers(), "https://mail.example.com").await;
        assert!(report.success);
        assert_eq!(report.domain.as_deref(), Some("CORP"));
        assert!(report.message.ends_with("CORP"));
    }

    #[tokio::test]
    async fn test_endpoint_reachable_without_domain() {
        let report = test_endpoint(&executor(MockTransport::always(200)), &fixed_headers(), "https://mail.example.com").await;
        assert!(report.success);
        assert_eq!(report.domain, None);
        assert!(report.message.ends_with(NOT_FOUND));
    }
}

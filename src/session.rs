use std::sync::Arc;

use crate::anonymizer::{HeaderOverrides, RandomHeaders, RequestHeaders};
use crate::config::ProbeConfig;
use crate::error::Result;
use crate::probe::{CredentialProbe, DomainFingerprinter, RequestExecutor};
use crate::proxy::{ProxyConfig, ProxyTransport};

/// Everything a run needs, built once from a [`ProbeConfig`]: one transport
/// (and so one proxy binding), the retrying executor on top of it, and the
/// request header builder.
pub struct ProbeSession {
    transport: Arc<ProxyTransport>,
    executor: RequestExecutor,
    headers: RequestHeaders,
}

impl ProbeSession {
    /// Fails on a bad proxy URL, an invalid custom header, or a client that
    /// cannot be built. Nothing goes on the wire here.
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let transport = Arc::new(ProxyTransport::from_url(
            config.proxy_url.as_deref(),
            config.client_timeouts(),
        )?);
        let executor = RequestExecutor::new(transport.clone())
            .with_max_retries(config.max_retries)
            .with_retry_delay(config.retry_delay());

        let overrides = HeaderOverrides::new(&config.custom_headers, config.forwarded_for.as_deref())?;
        let headers = RequestHeaders::new(Arc::new(RandomHeaders::new()), &config.user_agent, overrides)?;

        tracing::debug!(
            proxy = config.proxy_url.is_some(),
            max_retries = config.max_retries,
            custom_headers = config.custom_headers.len(),
            "probe session ready"
        );
        Ok(Self { transport, executor, headers })
    }

    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.transport.proxy()
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    pub fn fingerprinter(&self) -> DomainFingerprinter {
        DomainFingerprinter::new(self.executor.clone(), self.headers.clone())
    }

    pub fn credential_probe(&self) -> CredentialProbe {
        CredentialProbe::new(self.executor.clone(), self.headers.clone())
    }

    /// Closes the shared transport. Probes handed out earlier fail with
    /// `TransportClosed` afterwards.
    pub fn close(&self) {
        self.transport.close();
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::proxy::ProxyProtocol;

    #[test]
    fn test_builds_with_proxy() {
        let config = ProbeConfig {
            proxy_url: Some("socks5://user:pw@127.0.0.1:1080".into()),
            ..ProbeConfig::default()
        };
        let session = ProbeSession::new(&config).unwrap();
        let proxy = session.proxy().unwrap();
        assert_eq!(proxy.protocol, ProxyProtocol::Socks5);
        assert_eq!(proxy.port, 1080);
        assert_eq!(session.executor().max_retries(), 3);
    }

    #[test]
    fn test_bad_proxy_fails_at_construction() {
        let config = ProbeConfig {
            proxy_url: Some("socks5://127.0.0.1".into()),
            ..ProbeConfig::default()
        };
        assert!(matches!(ProbeSession::new(&config), Err(Error::InvalidProxyUrl(_))));
    }

    #[test]
    fn test_bad_header_fails_at_construction() {
        let mut config = ProbeConfig::default();
        config.custom_headers.insert("no spaces".into(), "x".into());
        assert!(matches!(ProbeSession::new(&config), Err(Error::InvalidHeader(_))));
    }

    #[tokio::test]
    async fn test_closed_session_folds_into_errored_result() {
        let session = ProbeSession::new(&ProbeConfig::default()).unwrap();
        let probe = session.credential_probe();
        session.close();
        assert!(session.is_closed());

        let result = probe.probe("https://mail.example.com", "alice", "pw").await;
        assert!(result.errored);
        assert_eq!(result.message, Error::TransportClosed.to_string());
    }
}

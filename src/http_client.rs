use reqwest::{Client, ClientBuilder, Proxy};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::proxy::ProxyConfig;

/// Timeouts applied to every client this crate builds.
#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    pub request: Duration,
    pub connect: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(10),
            connect: Duration::from_secs(5),
        }
    }
}

/// Build an HTTP client, optionally routed through `proxy`.
///
/// The proxy is bound to this client only, so clients with different proxies
/// can be used side by side.
pub fn build_client(proxy: Option<&ProxyConfig>, timeouts: ClientTimeouts) -> Result<Client> {
    configure(proxy, timeouts, 4)
}

/// Client for a single connection-bound exchange. Requests must be sent one
/// after another; each then reuses the one pooled connection.
pub fn build_exchange_client(proxy: Option<&ProxyConfig>, timeouts: ClientTimeouts) -> Result<Client> {
    configure(proxy, timeouts, 1)
}

fn configure(proxy: Option<&ProxyConfig>, timeouts: ClientTimeouts, max_idle: usize) -> Result<Client> {
    let mut builder = ClientBuilder::new()
        .pool_max_idle_per_host(max_idle)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_nodelay(true)

        // Timeouts
        .timeout(timeouts.request)
        .connect_timeout(timeouts.connect)

        // Compression
        .gzip(true)
        .brotli(true)

        // TLS
        .use_rustls_tls()
        .https_only(false)

        // Status codes are classified as returned, never after a redirect
        .redirect(reqwest::redirect::Policy::none())

        // Autodiscover endpoints are internal hosts with self-signed certificates
        .danger_accept_invalid_certs(true)

        // Ignore HTTP(S)_PROXY from the environment
        .no_proxy();

    if let Some(cfg) = proxy {
        let url = cfg.client_url()?;
        // Proxy::all covers both http and https targets
        let proxy = Proxy::all(url.as_str())
            .map_err(|e| Error::InvalidProxyUrl(format!("{cfg}: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| Error::ClientBuild(e.to_string()))
}

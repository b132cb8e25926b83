use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;

use crate::error::{Error, Result};
use crate::http_client::{build_client, build_exchange_client, ClientTimeouts};
use crate::proxy::ProxyConfig;
use crate::transport::{ProbeRequest, ProbeResponse, Transport};

/// HTTP transport bound to one proxy, or direct when no proxy is configured.
pub struct ProxyTransport {
    proxy: Option<ProxyConfig>,
    timeouts: ClientTimeouts,
    client: RwLock<Option<Client>>,
}

impl ProxyTransport {
    pub fn new(proxy: Option<ProxyConfig>, timeouts: ClientTimeouts) -> Result<Self> {
        let client = build_client(proxy.as_ref(), timeouts)?;
        match proxy {
            Some(ref cfg) => tracing::debug!(proxy = %cfg, "transport bound to proxy"),
            None => tracing::debug!("transport using direct connection"),
        }
        Ok(Self {
            proxy,
            timeouts,
            client: RwLock::new(Some(client)),
        })
    }

    pub fn direct(timeouts: ClientTimeouts) -> Result<Self> {
        Self::new(None, timeouts)
    }

    /// Parse `proxy_url` (if any) and build the transport.
    pub fn from_url(proxy_url: Option<&str>, timeouts: ClientTimeouts) -> Result<Self> {
        let proxy = proxy_url.map(ProxyConfig::parse).transpose()?;
        Self::new(proxy, timeouts)
    }

    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.client.read().is_none()
    }

    /// Release the client and its pooled connections. Safe to call repeatedly.
    pub fn close(&self) {
        if self.client.write().take().is_some() {
            tracing::debug!("transport closed");
        }
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse> {
        // Clone out of the lock; the guard must not be held across await
        let client = self.client.read().clone().ok_or(Error::TransportClosed)?;
        send_with(&client, request).await
    }

    /// A fresh client through the same proxy, so no other request can take
    /// the connection between the steps of a handshake.
    fn connection(&self) -> Result<Box<dyn Transport + '_>> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let client = build_exchange_client(self.proxy.as_ref(), self.timeouts)?;
        Ok(Box::new(ExchangeConnection { client }))
    }
}

/// Client owned by one handshake; its single pooled connection goes away
/// with it.
struct ExchangeConnection {
    client: Client,
}

#[async_trait]
impl Transport for ExchangeConnection {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse> {
        send_with(&self.client, request).await
    }

    fn connection(&self) -> Result<Box<dyn Transport + '_>> {
        Ok(Box::new(ExchangeConnection { client: self.client.clone() }))
    }
}

async fn send_with(client: &Client, request: &ProbeRequest) -> Result<ProbeResponse> {
    let mut builder = client
        .request(request.method.clone(), &request.url)
        .headers(request.headers.clone());
    if let Some(ref body) = request.body {
        builder = builder.body(body.clone());
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }

    let resp = builder.send().await?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.text().await?;

    Ok(ProbeResponse { status, headers, body })
}

impl Drop for ProxyTransport {
    fn drop(&mut self) {
        self.close();
    }
}

//! Proxy endpoints and the transports bound to them.
//!
//! A proxy is attached to a single `reqwest::Client`; nothing here touches
//! process-wide socket state, so transports for different proxies can be
//! used concurrently.

pub mod config;
pub mod transport;

pub use config::{validate_proxy_url, ProxyConfig, ProxyProtocol};
pub use transport::ProxyTransport;

pub mod anonymizer;
pub mod concurrent;
pub mod config;
pub mod error;
pub mod http_client;
pub mod ntlm;
pub mod probe;
pub mod proxy;
pub mod session;
pub mod transport;

pub use crate::config::ProbeConfig;
pub use crate::error::{Error, Result};
pub use crate::probe::{CredentialProbe, DomainFingerprinter, ProbeResult, Verdict};
pub use crate::proxy::{ProxyConfig, ProxyProtocol, ProxyTransport};
pub use crate::session::ProbeSession;

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::{Error, Result};

/// Proxy protocols accepted in a proxy URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyProtocol {
    Socks4,
    Socks4a,
    Socks5,
    Http,
}

impl ProxyProtocol {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "socks4" => Some(Self::Socks4),
            "socks4a" => Some(Self::Socks4a),
            "socks5" => Some(Self::Socks5),
            "http" => Some(Self::Http),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Socks4 => "socks4",
            Self::Socks4a => "socks4a",
            Self::Socks5 => "socks5",
            Self::Http => "http",
        }
    }

    pub fn is_socks(&self) -> bool {
        !matches!(self, Self::Http)
    }

    /// Scheme handed to the HTTP client. SOCKS4A and SOCKS5 leave name
    /// resolution to the proxy; SOCKS4 resolves locally.
    fn client_scheme(&self) -> &'static str {
        match self {
            Self::Socks4 => "socks4",
            Self::Socks4a => "socks4a",
            Self::Socks5 => "socks5h",
            Self::Http => "http",
        }
    }
}

/// Parsed `protocol://[user:pass@]host:port` proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidProxyUrl(format!("{input}: {reason}"));

        let url = Url::parse(input.trim()).map_err(|e| invalid(&e.to_string()))?;

        let protocol = ProxyProtocol::from_scheme(url.scheme()).ok_or_else(|| {
            invalid("unsupported protocol, expected one of socks4, socks4a, socks5, http")
        })?;

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(invalid("missing hostname")),
        };

        // `Url::port` hides a port equal to the scheme default (http:80)
        let port = url
            .port()
            .or_else(|| explicit_port(input))
            .ok_or_else(|| invalid("missing port"))?;
        if port == 0 {
            return Err(invalid("port must be between 1 and 65535"));
        }

        let username = decode_credential(url.username())?;
        let password = url.password().map(decode_credential).transpose()?.flatten();

        Ok(Self { protocol, host, port, username, password })
    }

    /// URL handed to `reqwest::Proxy`, credentials re-encoded.
    pub(crate) fn client_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}",
            self.protocol.client_scheme(),
            self.host,
            self.port
        ))
        .map_err(|e| Error::InvalidProxyUrl(e.to_string()))?;

        let credentials = match self.protocol {
            // Forward proxies only get credentials when both halves are present.
            ProxyProtocol::Http => match (&self.username, &self.password) {
                (Some(u), Some(p)) => (Some(u.as_str()), Some(p.as_str())),
                _ => (None, None),
            },
            _ => (self.username.as_deref(), self.password.as_deref()),
        };

        if let Some(user) = credentials.0 {
            url.set_username(user)
                .map_err(|_| Error::InvalidProxyUrl(format!("cannot carry credentials: {self}")))?;
        }
        if let Some(pass) = credentials.1 {
            url.set_password(Some(pass))
                .map_err(|_| Error::InvalidProxyUrl(format!("cannot carry credentials: {self}")))?;
        }
        Ok(url)
    }
}

impl FromStr for ProxyConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.protocol.as_str())?;
        if let Some(ref user) = self.username {
            write!(f, "{user}:***@")?;
        }
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Checks a proxy URL without building anything.
pub fn validate_proxy_url(input: &str) -> Result<()> {
    ProxyConfig::parse(input).map(|_| ())
}

fn decode_credential(raw: &str) -> Result<Option<String>> {
    if raw.is_empty() {
        return Ok(None);
    }
    urlencoding::decode(raw)
        .map(|s| Some(s.into_owned()))
        .map_err(|e| Error::InvalidProxyUrl(format!("credential is not valid UTF-8: {e}")))
}

fn explicit_port(input: &str) -> Option<u16> {
    let rest = input.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let (_, port) = host_port.rsplit_once(':')?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    port.parse().ok()
}

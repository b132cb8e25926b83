use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Proxy URL is missing a scheme, host or port, or names an unsupported protocol.
    #[error("invalid proxy URL: {0}")]
    InvalidProxyUrl(String),

    /// NTLM payload failed structural decoding.
    #[error("malformed NTLM message: {0}")]
    MalformedNtlmMessage(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("transport is closed")]
    TransportClosed,

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl Error {
    /// Transport-level failures that the executor retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Request(_) | Error::Connection(_))
    }
}

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;

use super::ntlm_challenge_header;
use crate::error::Result;
use crate::ntlm::{decode_challenge, negotiate_header, AuthenticateMessage, NtlmCredentials};
use crate::transport::{ProbeRequest, ProbeResponse, Transport};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Authentication applied to every attempt of a request.
#[derive(Clone)]
pub enum Auth {
    Basic { username: String, password: String },
    Ntlm(NtlmCredentials),
}

impl Auth {
    pub fn basic(username: &str, password: &str) -> Self {
        Auth::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn ntlm(username: &str, password: &str) -> Self {
        Auth::Ntlm(NtlmCredentials::new(username, password))
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Basic { username, .. } => write!(f, "Basic({username})"),
            Auth::Ntlm(creds) => write!(f, "Ntlm({:?})", creds),
        }
    }
}

/// Sends requests through a transport, retrying 502/503 responses and
/// transport errors a bounded number of times.
///
/// Every other status, 401/500/504 included, is returned after the first
/// attempt: those carry meaning for the caller.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    max_retries: u32,
    retry_delay: Duration,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `request` until it yields a non-transient outcome or retries run
    /// out. Exhausted 502/503 responses are returned as-is; an exhausted
    /// transport error is returned as the error.
    pub async fn execute(&self, request: &ProbeRequest, auth: Option<&Auth>) -> Result<ProbeResponse> {
        let mut retries = 0u32;
        loop {
            match self.attempt(request, auth).await {
                Ok(resp) if is_transient_status(resp.status) && retries < self.max_retries => {
                    tracing::debug!(
                        url = %request.url,
                        status = resp.status.as_u16(),
                        retry = retries + 1,
                        max_retries = self.max_retries,
                        "upstream unavailable, retrying"
                    );
                }
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    tracing::debug!(
                        url = %request.url,
                        error = %e,
                        retry = retries + 1,
                        max_retries = self.max_retries,
                        "request failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
            retries += 1;
            if !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }

    async fn attempt(&self, request: &ProbeRequest, auth: Option<&Auth>) -> Result<ProbeResponse> {
        match auth {
            None => self.transport.send(request).await,
            Some(Auth::Basic { username, password }) => {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                let req = request.clone().with_header(AUTHORIZATION, &format!("Basic {token}"))?;
                self.transport.send(&req).await
            }
            Some(Auth::Ntlm(creds)) => self.ntlm_exchange(request, creds).await,
        }
    }

    /// Negotiate, read the challenge, authenticate, all on one connection:
    /// the server binds its challenge to the connection that carried it. A
    /// response without a challenge ends the exchange early and is returned
    /// unchanged.
    async fn ntlm_exchange(&self, request: &ProbeRequest, creds: &NtlmCredentials) -> Result<ProbeResponse> {
        let conn = self.transport.connection()?;
        let negotiate = request.clone().with_header(AUTHORIZATION, &negotiate_header())?;
        let resp = conn.send(&negotiate).await?;
        if resp.status != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        let Some(header) = ntlm_challenge_header(&resp) else {
            tracing::debug!(url = %request.url, "401 without an NTLM challenge");
            return Ok(resp);
        };

        let challenge = decode_challenge(header)?;
        tracing::debug!(
            url = %request.url,
            domain = challenge.netbios_domain().unwrap_or("-"),
            "received NTLM challenge"
        );

        let authenticate = AuthenticateMessage::respond(&challenge, creds)?;
        let req = request
            .clone()
            .with_header(AUTHORIZATION, &authenticate.header_value())?;
        conn.send(&req).await
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(status, StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE)
}

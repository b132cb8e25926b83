use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;

use super::autodiscover_url;
use super::executor::{Auth, RequestExecutor};
use crate::anonymizer::RequestHeaders;
use crate::error::Result;
use crate::transport::{ProbeRequest, ProbeResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Potential,
    Failure,
}

impl Verdict {
    /// 200 is a login; 500 and 504 come back for valid credentials on
    /// misbehaving backends.
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => Verdict::Success,
            500 | 504 => Verdict::Potential,
            _ => Verdict::Failure,
        }
    }

    pub fn credential_valid(&self) -> bool {
        !matches!(self, Verdict::Failure)
    }
}

/// Outcome of one credential attempt. `verdict` is `None` exactly when
/// `errored` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub username: String,
    pub verdict: Option<Verdict>,
    pub errored: bool,
    pub message: String,
    pub credential_valid: bool,
}

impl ProbeResult {
    fn classified(username: &str, password: &str, status: u16) -> Self {
        let verdict = Verdict::from_status(status);
        let message = match verdict {
            Verdict::Success => format!("SUCCESS: valid credentials {username}:{password}"),
            Verdict::Potential => format!(
                "POTENTIAL: credentials likely valid, server returned {status}: {username}:{password}"
            ),
            Verdict::Failure => format!("FAILURE: invalid credentials {username}:{password}"),
        };
        Self {
            username: username.to_string(),
            verdict: Some(verdict),
            errored: false,
            message,
            credential_valid: verdict.credential_valid(),
        }
    }

    fn errored(username: &str, message: String) -> Self {
        Self {
            username: username.to_string(),
            verdict: None,
            errored: true,
            message,
            credential_valid: false,
        }
    }
}

/// Tries one username/password pair against the autodiscover endpoint with
/// NTLM authentication.
#[derive(Clone)]
pub struct CredentialProbe {
    executor: RequestExecutor,
    headers: RequestHeaders,
}

impl CredentialProbe {
    pub fn new(executor: RequestExecutor, headers: RequestHeaders) -> Self {
        Self { executor, headers }
    }

    /// Never fails; errors end up in [`ProbeResult::errored`].
    pub async fn probe(&self, base_url: &str, username: &str, password: &str) -> ProbeResult {
        match self.send(base_url, username, password).await {
            Ok(resp) => {
                let result = ProbeResult::classified(username, password, resp.status_code());
                tracing::info!(
                    username,
                    status = resp.status_code(),
                    verdict = ?result.verdict,
                    "credential probed"
                );
                result
            }
            Err(e) => {
                tracing::warn!(username, error = %e, "credential probe errored");
                ProbeResult::errored(username, e.to_string())
            }
        }
    }

    async fn send(&self, base_url: &str, username: &str, password: &str) -> Result<ProbeResponse> {
        let mut defaults = HeaderMap::new();
        defaults.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        let request =
            ProbeRequest::get(autodiscover_url(base_url)).with_headers(self.headers.build_with(defaults));
        let auth = Auth::ntlm(username, password);
        self.executor.execute(&request, Some(&auth)).await
    }
}

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;

use super::executor::RequestExecutor;
use super::{autodiscover_url, ntlm_challenge_header};
use crate::anonymizer::RequestHeaders;
use crate::error::Result;
use crate::ntlm::{decode_challenge, negotiate_header, ChallengeMessage};
use crate::transport::ProbeRequest;

/// Returned when the domain could not be determined.
pub const NOT_FOUND: &str = "NOTFOUND";

/// Learns the internal NetBIOS domain of an autodiscover endpoint from the
/// NTLM challenge it sends to an anonymous negotiate.
#[derive(Clone)]
pub struct DomainFingerprinter {
    executor: RequestExecutor,
    headers: RequestHeaders,
}

impl DomainFingerprinter {
    pub fn new(executor: RequestExecutor, headers: RequestHeaders) -> Self {
        Self { executor, headers }
    }

    /// The decoded challenge, or `None` when the endpoint answered without
    /// one (any status other than 401, or no NTLM challenge header).
    pub async fn fingerprint(&self, base_url: &str) -> Result<Option<ChallengeMessage>> {
        let url = autodiscover_url(base_url);
        let request = ProbeRequest::post(&url)
            .with_headers(self.headers.build())
            .with_header(AUTHORIZATION, &negotiate_header())?;

        let resp = self.executor.execute(&request, None).await?;
        if resp.status != StatusCode::UNAUTHORIZED {
            tracing::debug!(url = %url, status = resp.status.as_u16(), "no challenge, endpoint did not answer 401");
            return Ok(None);
        }
        match ntlm_challenge_header(&resp) {
            Some(header) => decode_challenge(header).map(Some),
            None => {
                tracing::debug!(url = %url, "401 without an NTLM challenge header");
                Ok(None)
            }
        }
    }

    /// NetBIOS domain name, or [`NOT_FOUND`]. Never fails: transport and
    /// decoding errors are logged and reported as not found.
    pub async fn discover_domain(&self, base_url: &str) -> String {
        match self.fingerprint(base_url).await {
            Ok(Some(challenge)) => match challenge.netbios_domain() {
                Some(domain) => {
                    tracing::info!(target_url = %base_url, domain, "internal domain found");
                    domain.to_string()
                }
                None => {
                    tracing::info!(target_url = %base_url, "challenge carries no NetBIOS domain");
                    NOT_FOUND.to_string()
                }
            },
            Ok(None) => NOT_FOUND.to_string(),
            Err(e) => {
                tracing::warn!(target_url = %base_url, error = %e, "domain fingerprint failed");
                NOT_FOUND.to_string()
            }
        }
    }
}

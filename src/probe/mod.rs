pub mod connect;
pub mod credential;
pub mod executor;
pub mod fingerprint;

pub use connect::{test_endpoint, test_proxy, ConnectivityReport, DEFAULT_PROXY_TEST_URL};
pub use credential::{CredentialProbe, ProbeResult, Verdict};
pub use executor::{Auth, RequestExecutor, DEFAULT_MAX_RETRIES};
pub use fingerprint::{DomainFingerprinter, NOT_FOUND};

use crate::ntlm::challenge::ntlm_token;
use crate::transport::ProbeResponse;

/// Path probed for both fingerprinting and credential checks.
pub const AUTODISCOVER_PATH: &str = "/autodiscover/autodiscover.xml";

/// Challenge header set by an API gateway fronting the target.
pub const REMAPPED_WWW_AUTHENTICATE: &str = "x-amzn-remapped-www-authenticate";

pub(crate) fn autodiscover_url(base_url: &str) -> String {
    format!("{}{AUTODISCOVER_PATH}", base_url.trim_end_matches('/'))
}

/// First NTLM challenge in the response, preferring the gateway-remapped
/// header over `WWW-Authenticate`.
pub(crate) fn ntlm_challenge_header(resp: &ProbeResponse) -> Option<&str> {
    resp.header_values(REMAPPED_WWW_AUTHENTICATE)
        .chain(resp.header_values(reqwest::header::WWW_AUTHENTICATE.as_str()))
        .find(|value| ntlm_token(value).is_some())
}

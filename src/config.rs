use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http_client::ClientTimeouts;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProbeConfig {
    pub user_agent: String,
    /// Per-attempt request timeout.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Extra attempts after the first one on 502/503 or transport errors.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub custom_headers: HashMap<String, String>,
    #[serde(alias = "xforwardedfor")]
    pub forwarded_for: Option<String>,
    pub proxy_url: Option<String>,
    /// Credential probes in flight at once.
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 10,
            connect_timeout_secs: 5,
            max_retries: 3,
            retry_delay_ms: 1000,
            custom_headers: HashMap::new(),
            forwarded_for: None,
            proxy_url: None,
            concurrency: 5,
        }
    }
}

impl ProbeConfig {
    /// Load a JSON config file; missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn client_timeouts(&self) -> ClientTimeouts {
        ClientTimeouts {
            request: self.timeout(),
            connect: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

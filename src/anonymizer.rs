use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use crate::error::{Error, Result};

pub const FORWARDED_FOR: &str = "x-my-x-forwarded-for";
pub const API_GATEWAY_ID: &str = "x-amzn-apigateway-api-id";
pub const TRACE_ID: &str = "x-my-x-amzn-trace-id";

const ALNUM: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const HEX: &[u8] = b"0123456789abcdef";

/// Spoofed tracing values attached to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoofedHeaders {
    pub forwarded_for: String,
    pub api_id: String,
    pub trace_id: String,
}

/// Source of spoofed header values, one set per request.
pub trait HeaderGenerator: Send + Sync {
    fn generate(&self) -> SpoofedHeaders;
}

/// Random values; never repeats any of the previous request's values.
#[derive(Default)]
pub struct RandomHeaders {
    last: Mutex<Option<SpoofedHeaders>>,
}

impl RandomHeaders {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HeaderGenerator for RandomHeaders {
    fn generate(&self) -> SpoofedHeaders {
        let mut last = self.last.lock();
        let mut rng = rand::thread_rng();

        let mut next = random_headers(&mut rng);
        if let Some(ref prev) = *last {
            while next.forwarded_for == prev.forwarded_for {
                next.forwarded_for = random_ip(&mut rng);
            }
            while next.api_id == prev.api_id {
                next.api_id = random_token(&mut rng, ALNUM, 10);
            }
            while next.trace_id == prev.trace_id {
                next.trace_id = random_trace_id(&mut rng);
            }
        }

        *last = Some(next.clone());
        next
    }
}

/// Always hands out the same values.
#[derive(Debug, Clone)]
pub struct FixedHeaders(pub SpoofedHeaders);

impl HeaderGenerator for FixedHeaders {
    fn generate(&self) -> SpoofedHeaders {
        self.0.clone()
    }
}

fn random_headers(rng: &mut impl Rng) -> SpoofedHeaders {
    SpoofedHeaders {
        forwarded_for: random_ip(rng),
        api_id: random_token(rng, ALNUM, 10),
        trace_id: random_trace_id(rng),
    }
}

fn random_ip(rng: &mut impl Rng) -> String {
    let octets: [u8; 4] = rng.gen();
    format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
}

fn random_token(rng: &mut impl Rng, charset: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}

fn random_trace_id(rng: &mut impl Rng) -> String {
    format!(
        "Root=1-{}-{}",
        random_token(rng, HEX, 8),
        random_token(rng, HEX, 24)
    )
}

/// Caller-supplied headers applied after the generated defaults.
#[derive(Debug, Clone, Default)]
pub struct HeaderOverrides {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderOverrides {
    /// Validates names and values up front so bad input fails at
    /// configuration time rather than per request.
    pub fn new(custom: &HashMap<String, String>, forwarded_for: Option<&str>) -> Result<Self> {
        let mut headers = Vec::with_capacity(custom.len() + 1);
        let mut names: Vec<&String> = custom.keys().collect();
        names.sort();
        for name in names {
            headers.push(parse_header(name, &custom[name])?);
        }
        if let Some(ip) = forwarded_for {
            headers.push(parse_header(FORWARDED_FOR, ip)?);
        }
        Ok(Self { headers })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    fn apply(&self, map: &mut HeaderMap) {
        for (name, value) in &self.headers {
            map.insert(name.clone(), value.clone());
        }
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
    let header_value =
        HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
    Ok((header_name, header_value))
}

/// Builds the header set sent with every probe request.
#[derive(Clone)]
pub struct RequestHeaders {
    generator: Arc<dyn HeaderGenerator>,
    user_agent: HeaderValue,
    overrides: HeaderOverrides,
}

impl RequestHeaders {
    pub fn new(
        generator: Arc<dyn HeaderGenerator>,
        user_agent: &str,
        overrides: HeaderOverrides,
    ) -> Result<Self> {
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| Error::InvalidHeader(format!("user-agent: {e}")))?;
        Ok(Self { generator, user_agent, overrides })
    }

    pub fn random(user_agent: &str) -> Result<Self> {
        Self::new(Arc::new(RandomHeaders::new()), user_agent, HeaderOverrides::default())
    }

    /// User-Agent, fresh spoofed values, then overrides.
    pub fn build(&self) -> HeaderMap {
        self.build_with(HeaderMap::new())
    }

    /// Like [`build`](Self::build), with request-specific `defaults` added
    /// before the overrides so callers can still replace them.
    pub fn build_with(&self, defaults: HeaderMap) -> HeaderMap {
        let spoofed = self.generator.generate();
        let mut map = defaults;
        map.insert(USER_AGENT, self.user_agent.clone());
        for (name, value) in [
            (FORWARDED_FOR, spoofed.forwarded_for),
            (API_GATEWAY_ID, spoofed.api_id),
            (TRACE_ID, spoofed.trace_id),
        ] {
            // generated values are ASCII by construction
            if let Ok(v) = HeaderValue::from_str(&value) {
                map.insert(HeaderName::from_static(name), v);
            }
        }
        self.overrides.apply(&mut map);
        map
    }
}

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

use super::challenge::ChallengeMessage;
use crate::error::{Error, Result};
use super::negotiate::NEGOTIATE_FLAGS;
use super::{utf16le, NEGOTIATE_OEM, NEGOTIATE_UNICODE, NEGOTIATE_VERSION, SCHEME, SIGNATURE};

type HmacMd5 = Hmac<Md5>;

const AUTHENTICATE_TYPE: u32 = 3;
/// Fixed part of a Type-3 message: signature, type, six security buffers,
/// flags, version.
const HEADER_LEN: usize = 72;
const VERSION: [u8; 8] = [6, 1, 0xb1, 0x1d, 0, 0, 0, 0x0f];
/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

/// Username, password and the domain they belong to.
#[derive(Clone)]
pub struct NtlmCredentials {
    pub domain: String,
    pub username: String,
    password: String,
}

impl NtlmCredentials {
    /// `DOMAIN\user` is split into domain and user; anything else (including
    /// `user@domain`) is used whole as the user with an empty domain.
    pub fn new(username: &str, password: &str) -> Self {
        let (domain, user) = match username.split_once('\\') {
            Some((d, u)) => (d, u),
            None => ("", username),
        };
        Self {
            domain: domain.to_string(),
            username: user.to_string(),
            password: password.to_string(),
        }
    }

    /// NTOWFv2 / LMOWFv2.
    fn response_key(&self) -> [u8; 16] {
        let nt_hash = nt_hash(&self.password);
        let identity = format!("{}{}", self.username.to_uppercase(), self.domain);
        hmac_md5(&nt_hash, &[utf16le(&identity).as_slice()])
    }
}

impl fmt::Debug for NtlmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtlmCredentials")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Encoded Type-3 message.
#[derive(Debug, Clone)]
pub struct AuthenticateMessage {
    bytes: Vec<u8>,
}

impl AuthenticateMessage {
    /// Answer `challenge` with a random client challenge.
    pub fn respond(challenge: &ChallengeMessage, creds: &NtlmCredentials) -> Result<Self> {
        let client_challenge: [u8; 8] = rand::random();
        let timestamp = challenge
            .target_info
            .timestamp()
            .unwrap_or_else(filetime_now);
        Self::build(challenge, creds, client_challenge, timestamp)
    }

    /// Deterministic NTLMv2 response. Fails when a field does not fit the
    /// 16-bit length of its security buffer.
    pub fn build(
        challenge: &ChallengeMessage,
        creds: &NtlmCredentials,
        client_challenge: [u8; 8],
        timestamp: u64,
    ) -> Result<Self> {
        let key = creds.response_key();
        let server_challenge = &challenge.server_challenge;

        let mut blob = Vec::with_capacity(32 + challenge.target_info.raw().len());
        blob.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0, 0]);
        blob.extend_from_slice(&timestamp.to_le_bytes());
        blob.extend_from_slice(&client_challenge);
        blob.extend_from_slice(&[0; 4]);
        blob.extend_from_slice(challenge.target_info.raw());
        blob.extend_from_slice(&[0; 4]);

        let nt_proof = hmac_md5(&key, &[server_challenge.as_slice(), blob.as_slice()]);
        let nt_response = [nt_proof.as_slice(), blob.as_slice()].concat();

        // A server timestamp means the server expects no LMv2 response
        let lm_response = if challenge.target_info.timestamp().is_some() {
            vec![0u8; 24]
        } else {
            let lm_proof = hmac_md5(&key, &[server_challenge.as_slice(), client_challenge.as_slice()]);
            [lm_proof.as_slice(), client_challenge.as_slice()].concat()
        };

        let mut flags = challenge.flags & NEGOTIATE_FLAGS;
        if flags & NEGOTIATE_UNICODE != 0 {
            flags &= !NEGOTIATE_OEM;
        }
        let encode = |s: &str| {
            if flags & NEGOTIATE_UNICODE != 0 {
                utf16le(s)
            } else {
                s.as_bytes().to_vec()
            }
        };
        let domain = encode(&creds.domain);
        let user = encode(&creds.username);
        let workstation: Vec<u8> = Vec::new();
        let session_key: Vec<u8> = Vec::new();

        // Payload order: domain, user, workstation, LM, NT, session key
        let payloads: [&[u8]; 6] = [&domain, &user, &workstation, &lm_response, &nt_response, &session_key];
        let mut offsets = [0u32; 6];
        let mut next = HEADER_LEN;
        for (slot, payload) in offsets.iter_mut().zip(payloads.iter()) {
            *slot = next as u32;
            next += payload.len();
        }

        let mut bytes = Vec::with_capacity(next);
        bytes.extend_from_slice(SIGNATURE);
        bytes.extend_from_slice(&AUTHENTICATE_TYPE.to_le_bytes());
        // Header order: LM, NT, domain, user, workstation, session key
        for i in [3, 4, 0, 1, 2, 5] {
            bytes.extend_from_slice(&security_buffer(payloads[i].len(), offsets[i])?);
        }
        bytes.extend_from_slice(&flags.to_le_bytes());
        let version = if flags & NEGOTIATE_VERSION != 0 { VERSION } else { [0; 8] };
        bytes.extend_from_slice(&version);
        for payload in payloads {
            bytes.extend_from_slice(payload);
        }

        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `Authorization` header value.
    pub fn header_value(&self) -> String {
        format!(
            "{SCHEME} {}",
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

fn security_buffer(len: usize, offset: u32) -> Result<[u8; 8]> {
    let len = u16::try_from(len).map_err(|_| {
        Error::MalformedNtlmMessage(format!("{len}-byte field does not fit an authenticate message"))
    })?;
    let mut out = [0u8; 8];
    out[0..2].copy_from_slice(&len.to_le_bytes());
    out[2..4].copy_from_slice(&len.to_le_bytes());
    out[4..8].copy_from_slice(&offset.to_le_bytes());
    Ok(out)
}

fn nt_hash(password: &str) -> [u8; 16] {
    Md4::digest(utf16le(password)).into()
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

fn filetime_now() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_secs() + FILETIME_EPOCH_OFFSET) * 10_000_000
        + u64::from(since_epoch.subsec_nanos() / 100)
}

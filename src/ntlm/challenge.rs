use std::collections::BTreeMap;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use super::{NEGOTIATE_UNICODE, NEGOTIATE_VERSION, SCHEME, SIGNATURE};
use crate::error::{Error, Result};

/// Some servers strip base64 padding from the challenge.
const LENIENT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const CHALLENGE_TYPE: u32 = 2;
/// Signature, type, target name fields, flags, server challenge.
const MIN_HEADER_LEN: usize = 32;
/// Adds reserved bytes and target info fields.
const TARGET_INFO_HEADER_LEN: usize = 48;
const VERSION_LEN: usize = 8;

/// AV_PAIR identifiers that carry something worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AvId {
    NbComputerName,
    NbDomainName,
    DnsComputerName,
    DnsDomainName,
    DnsTreeName,
    Timestamp,
}

impl AvId {
    const EOL: u16 = 0;

    fn from_u16(id: u16) -> Option<Self> {
        match id {
            1 => Some(Self::NbComputerName),
            2 => Some(Self::NbDomainName),
            3 => Some(Self::DnsComputerName),
            4 => Some(Self::DnsDomainName),
            5 => Some(Self::DnsTreeName),
            7 => Some(Self::Timestamp),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NbComputerName => "NetBIOS_Computer_Name",
            Self::NbDomainName => "NetBIOS_Domain_Name",
            Self::DnsComputerName => "DNS_Computer_Name",
            Self::DnsDomainName => "DNS_Domain_Name",
            Self::DnsTreeName => "DNS_Tree_Name",
            Self::Timestamp => "Timestamp",
        }
    }
}

/// Decoded target-information block of a challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetInfo {
    names: BTreeMap<AvId, String>,
    timestamp: Option<u64>,
    raw: Vec<u8>,
}

impl TargetInfo {
    /// Parse an AV_PAIR list. Unknown ids and timestamps that are not 8 bytes
    /// long are skipped; the first occurrence of a known id wins.
    pub fn parse(block: &[u8]) -> Result<Self> {
        let mut info = TargetInfo {
            raw: block.to_vec(),
            ..Default::default()
        };
        let mut cursor = Cursor::new(block);

        while !cursor.is_empty() {
            let id = cursor.read_u16("AV_PAIR id")?;
            let len = cursor.read_u16("AV_PAIR length")? as usize;
            if id == AvId::EOL {
                break;
            }
            let value = cursor.take(len, "AV_PAIR value")?;

            match AvId::from_u16(id) {
                Some(AvId::Timestamp) => match <[u8; 8]>::try_from(value) {
                    Ok(bytes) => {
                        info.timestamp.get_or_insert(u64::from_le_bytes(bytes));
                    }
                    // skipped like an unknown id; the names around it still count
                    Err(_) => tracing::debug!(len, "ignoring timestamp AV_PAIR with bad length"),
                },
                Some(av) => {
                    if !info.names.contains_key(&av) {
                        info.names.insert(av, decode_utf16le(value, av.name())?);
                    }
                }
                None => {}
            }
        }

        Ok(info)
    }

    pub fn get(&self, id: AvId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn netbios_domain(&self) -> Option<&str> {
        self.get(AvId::NbDomainName)
    }

    /// Server time as a Windows FILETIME (100ns ticks since 1601-01-01).
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// The block exactly as received; echoed back inside an NTLMv2 response.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.timestamp.is_none()
    }

    /// Field name to value, timestamp rendered in decimal.
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        let mut map: BTreeMap<&'static str, String> =
            self.names.iter().map(|(k, v)| (k.name(), v.clone())).collect();
        if let Some(ts) = self.timestamp {
            map.insert(AvId::Timestamp.name(), ts.to_string());
        }
        map
    }
}

/// Decoded Type-2 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_name: Option<String>,
    pub target_info: TargetInfo,
    pub version: Option<[u8; 8]>,
}

impl ChallengeMessage {
    pub fn netbios_domain(&self) -> Option<&str> {
        self.target_info.netbios_domain()
    }
}

/// Decode a challenge header value such as `NTLM TlRMTVNTUAACAAAA...`.
///
/// Comma-joined scheme lists (`Negotiate, NTLM <token>`) are searched for
/// the NTLM token. A bare base64 token without a scheme is accepted too.
pub fn decode_challenge(header_value: &str) -> Result<ChallengeMessage> {
    let token = ntlm_token(header_value)
        .or_else(|| bare_token(header_value))
        .ok_or_else(|| malformed("header does not carry an NTLM token"))?;
    let raw = LENIENT_B64
        .decode(token)
        .map_err(|e| malformed(format!("invalid base64: {e}")))?;
    decode_challenge_bytes(&raw)
}

/// Decode a raw Type-2 message.
pub fn decode_challenge_bytes(raw: &[u8]) -> Result<ChallengeMessage> {
    if raw.len() < MIN_HEADER_LEN {
        return Err(malformed(format!(
            "{} bytes is shorter than the {MIN_HEADER_LEN}-byte header",
            raw.len()
        )));
    }

    let mut cursor = Cursor::new(raw);
    if cursor.take(8, "signature")? != SIGNATURE {
        return Err(malformed("bad signature"));
    }
    let message_type = cursor.read_u32("message type")?;
    if message_type != CHALLENGE_TYPE {
        return Err(malformed(format!("expected message type 2, got {message_type}")));
    }

    let target_name_field = cursor.read_field("target name")?;
    let flags = cursor.read_u32("flags")?;
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(cursor.take(8, "server challenge")?);

    let target_name = match target_name_field.slice(raw, "target name")? {
        [] => None,
        bytes if flags & NEGOTIATE_UNICODE != 0 => Some(decode_utf16le(bytes, "target name")?),
        bytes => Some(String::from_utf8_lossy(bytes).into_owned()),
    };

    let mut target_info = TargetInfo::default();
    let mut version = None;
    if raw.len() >= TARGET_INFO_HEADER_LEN {
        cursor.take(8, "reserved")?;
        let info_field = cursor.read_field("target info")?;
        target_info = TargetInfo::parse(info_field.slice(raw, "target info")?)?;

        if flags & NEGOTIATE_VERSION != 0 && cursor.remaining() >= VERSION_LEN {
            let mut v = [0u8; VERSION_LEN];
            v.copy_from_slice(cursor.take(VERSION_LEN, "version")?);
            version = Some(v);
        }
    }

    Ok(ChallengeMessage {
        flags,
        server_challenge,
        target_name,
        target_info,
        version,
    })
}

/// Token following the NTLM scheme in a (possibly comma-joined) header.
pub(crate) fn ntlm_token(header_value: &str) -> Option<&str> {
    header_value.split(',').find_map(|part| {
        let (scheme, token) = part.trim().split_once(char::is_whitespace)?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case(SCHEME) && !token.is_empty()).then_some(token)
    })
}

fn bare_token(value: &str) -> Option<&str> {
    let value = value.trim();
    let is_bare = !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == ',');
    is_bare.then_some(value)
}

fn decode_utf16le(bytes: &[u8], what: &str) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(malformed(format!("{what} has odd UTF-16 length {}", bytes.len())));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedNtlmMessage(reason.into())
}

/// (length, max length, offset) security buffer descriptor.
#[derive(Debug, Clone, Copy)]
struct Field {
    len: usize,
    offset: usize,
}

impl Field {
    fn slice<'a>(&self, raw: &'a [u8], what: &str) -> Result<&'a [u8]> {
        if self.len == 0 {
            return Ok(&[]);
        }
        self.offset
            .checked_add(self.len)
            .and_then(|end| raw.get(self.offset..end))
            .ok_or_else(|| {
                malformed(format!(
                    "{what} ({} bytes at offset {}) runs past the {}-byte message",
                    self.len,
                    self.offset,
                    raw.len()
                ))
            })
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(malformed(format!(
                "{what} needs {n} bytes, {} left",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u16(&mut self, what: &str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_field(&mut self, what: &str) -> Result<Field> {
        let len = self.read_u16(what)? as usize;
        let _max_len = self.read_u16(what)?;
        let offset = self.read_u32(what)? as usize;
        Ok(Field { len, offset })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    const NONCE: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    #[test]
    fn test_decode_netbios_domain() {
        let raw = challenge(NONCE, &[av_str(2, "CORP"), eol()].concat());
        let msg = decode_challenge(&header(&raw)).unwrap();

        let map = msg.target_info.to_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map["NetBIOS_Domain_Name"], "CORP");
        assert_eq!(msg.server_challenge, NONCE);
        assert_eq!(msg.target_name.as_deref(), Some("CORP"));
        assert_eq!(msg.version, Some([6, 1, 0xb1, 0x1d, 0, 0, 0, 0x0f]));
    }

    #[test]
    fn test_decode_all_known_fields() {
        let msg = decode_challenge_bytes(&challenge(NONCE, &corp_target_info())).unwrap();
        let info = &msg.target_info;
        assert_eq!(info.get(AvId::NbComputerName), Some("EXCH01"));
        assert_eq!(info.get(AvId::DnsDomainName), Some("corp.local"));
        assert_eq!(info.get(AvId::DnsComputerName), Some("exch01.corp.local"));
        assert_eq!(info.get(AvId::DnsTreeName), Some("corp.local"));
        assert_eq!(info.timestamp(), Some(0x01d9_8f3c_2a1b_0000));
        assert_eq!(info.raw(), corp_target_info().as_slice());
    }

    #[test]
    fn test_end_marker_only_is_empty() {
        let msg = decode_challenge_bytes(&challenge(NONCE, &eol())).unwrap();
        assert!(msg.target_info.is_empty());
        assert!(msg.target_info.to_map().is_empty());
        assert!(msg.netbios_domain().is_none());
    }

    #[test]
    fn test_unknown_ids_are_skipped() {
        let info = [av_pair(6, &[2, 0, 0, 0]), av_pair(0x42, b"zz"), av_str(2, "CORP"), eol()].concat();
        let msg = decode_challenge_bytes(&challenge(NONCE, &info)).unwrap();
        assert_eq!(msg.netbios_domain(), Some("CORP"));
    }

    #[test]
    fn test_first_occurrence_wins() {
        let info = [av_str(2, "FIRST"), av_str(2, "SECOND"), eol()].concat();
        let msg = decode_challenge_bytes(&challenge(NONCE, &info)).unwrap();
        assert_eq!(msg.netbios_domain(), Some("FIRST"));
    }

    #[test]
    fn test_bad_signature() {
        let mut raw = challenge(NONCE, &eol());
        raw[0] = b'X';
        assert!(matches!(
            decode_challenge_bytes(&raw),
            Err(Error::MalformedNtlmMessage(_))
        ));
    }

    #[test]
    fn test_wrong_message_type() {
        let mut raw = challenge(NONCE, &eol());
        raw[8] = 3;
        assert!(matches!(
            decode_challenge_bytes(&raw),
            Err(Error::MalformedNtlmMessage(_))
        ));
    }

    #[test]
    fn test_target_info_past_end() {
        let mut raw = challenge(NONCE, &[av_str(2, "CORP"), eol()].concat());
        // declare a target info block longer than the message
        raw[40..42].copy_from_slice(&0x0400u16.to_le_bytes());
        assert!(matches!(
            decode_challenge_bytes(&raw),
            Err(Error::MalformedNtlmMessage(_))
        ));
    }

    #[test]
    fn test_av_pair_length_past_end() {
        let mut info = av_str(2, "CORP");
        info[2..4].copy_from_slice(&200u16.to_le_bytes());
        let raw = challenge(NONCE, &info);
        assert!(matches!(
            decode_challenge_bytes(&raw),
            Err(Error::MalformedNtlmMessage(_))
        ));
    }

    #[test]
    fn test_dangling_av_header_bytes() {
        let info = [av_str(2, "CORP"), vec![0x02]].concat();
        assert!(decode_challenge_bytes(&challenge(NONCE, &info)).is_err());
    }

    #[test]
    fn test_bad_length_timestamp_is_skipped() {
        let info = [av_pair(7, &[1, 2, 3]), av_str(2, "CORP"), eol()].concat();
        let msg = decode_challenge_bytes(&challenge(NONCE, &info)).unwrap();
        assert_eq!(msg.netbios_domain(), Some("CORP"));
        assert_eq!(msg.target_info.timestamp(), None);
    }

    #[test]
    fn test_odd_utf16_length() {
        let info = [av_pair(2, b"abc"), eol()].concat();
        assert!(decode_challenge_bytes(&challenge(NONCE, &info)).is_err());
    }

    #[test]
    fn test_short_message() {
        assert!(decode_challenge_bytes(b"NTLMSSP\0\x02\0\0\0").is_err());
        assert!(decode_challenge_bytes(&[]).is_err());
    }

    #[test]
    fn test_header_forms() {
        let raw = challenge(NONCE, &[av_str(2, "CORP"), eol()].concat());
        let plain = header(&raw);
        let token = plain.trim_start_matches("NTLM ");

        let lower = format!("ntlm {token}");
        let joined = format!("Negotiate, NTLM {token}");
        let unpadded = format!("NTLM {}", token.trim_end_matches('='));
        let bare = token.to_string();
        for value in [&plain, &lower, &joined, &unpadded, &bare] {
            assert_eq!(decode_challenge(value).unwrap().netbios_domain(), Some("CORP"));
        }

        assert!(decode_challenge("Negotiate").is_err());
        assert!(decode_challenge("NTLM").is_err());
        assert!(decode_challenge("NTLM !!!notbase64").is_err());
    }
}

//! NTLM message codec: the fixed negotiate (Type-1) blob, a bounds-checked
//! challenge (Type-2) decoder and an NTLMv2 authenticate (Type-3) builder.

pub mod authenticate;
pub mod challenge;
pub mod negotiate;

pub use authenticate::{AuthenticateMessage, NtlmCredentials};
pub use challenge::{decode_challenge, decode_challenge_bytes, AvId, ChallengeMessage, TargetInfo};
pub use negotiate::{negotiate_header, NEGOTIATE_MESSAGE_B64};

pub(crate) const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

pub(crate) const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub(crate) const NEGOTIATE_OEM: u32 = 0x0000_0002;
pub(crate) const NEGOTIATE_VERSION: u32 = 0x0200_0000;

/// Header scheme prefix shared by all three message types.
pub const SCHEME: &str = "NTLM";

pub(crate) fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

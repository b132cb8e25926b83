use super::SCHEME;

/// Type-1 negotiate message sent to provoke a challenge. No domain or
/// workstation is supplied, version 6.1.7601.
pub const NEGOTIATE_MESSAGE_B64: &str = "TlRMTVNTUAABAAAAB4IIogAAAAAAAAAAAAAAAAAAAAAGAbEdAAAADw==";

/// Flags carried by [`NEGOTIATE_MESSAGE_B64`]: UNICODE, OEM, REQUEST_TARGET,
/// NTLM, ALWAYS_SIGN, EXTENDED_SESSIONSECURITY, VERSION, 128, 56.
pub const NEGOTIATE_FLAGS: u32 = 0xa208_8207;

/// `Authorization` header value for the negotiate step.
pub fn negotiate_header() -> String {
    format!("{SCHEME} {NEGOTIATE_MESSAGE_B64}")
}

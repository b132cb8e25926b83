//! NTLM challenge decoding must reject malformed messages without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use owa_probe::ntlm::{decode_challenge, decode_challenge_bytes};

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = decode_challenge_bytes(data) {
        let _ = msg.target_info.to_map();
    }
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = decode_challenge(s);
    }
});

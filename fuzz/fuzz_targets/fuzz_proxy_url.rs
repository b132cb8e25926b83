#![no_main]

use libfuzzer_sys::fuzz_target;
use owa_probe::ProxyConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(cfg) = ProxyConfig::parse(s) {
            assert!(cfg.port != 0);
            let _ = cfg.to_string();
        }
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use ssh_zone_ca::signing_engine::fingerprint::{parse_fingerprint, parse_visual_fingerprint};

fuzz_target!(|data: &[u8]| {
    if let Ok(output) = std::str::from_utf8(data) {
        if let Some(fingerprint) = parse_fingerprint(output) {
            assert!(!fingerprint.is_empty());
            assert!(!fingerprint.contains(char::is_whitespace));
        }
        if let Some(image) = parse_visual_fingerprint(output) {
            assert_eq!(image.split('\n').count(), 9);
        }
    }
});

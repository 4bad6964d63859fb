#![no_main]

use libfuzzer_sys::fuzz_target;
use ssh_zone_ca::model::CertificateRequest;
use ssh_zone_ca::signing_engine::config::SigningConfig;
use ssh_zone_ca::validation::validate_request;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // signing section of the configuration file
        let _ = toml::from_str::<SigningConfig>(s);

        // stored requests must never make validation panic
        if let Ok(request) = toml::from_str::<CertificateRequest>(s) {
            let _ = validate_request(&request);
        }
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use ssh_zone_ca::signing_engine::CertificateOptions;
use ssh_zone_ca::signing_engine::arguments::Arguments;

fuzz_target!(|options: CertificateOptions| {
    let directives = options.to_directives();
    assert!(directives.len() <= 7);
    assert_eq!(directives, options.clone().to_directives());

    for directive in &directives {
        // every whitespace character must be escaped
        let mut previous = None;
        for c in directive.chars() {
            if c.is_whitespace() {
                assert_eq!(previous, Some('\\'), "unescaped whitespace in {:?}", directive);
            }
            previous = Some(c);
        }
    }

    // each directive becomes exactly one `-O <directive>` pair
    let args = Arguments::new().flag("-O", directives.clone()).build();
    assert_eq!(args.len(), directives.len() * 2);
});

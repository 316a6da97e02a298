#![no_main]

use libfuzzer_sys::fuzz_target;
use telemux::PersistenceKey;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(key) = raw.parse::<PersistenceKey>() {
        let rendered = key.to_string();
        let reparsed: PersistenceKey = rendered.parse().expect("rendered key parses");
        assert_eq!(reparsed, key);
    }
});

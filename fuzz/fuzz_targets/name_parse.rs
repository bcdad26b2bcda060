#![no_main]

use libfuzzer_sys::fuzz_target;
use ferrous_lifecycle::ServiceName;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // Any accepted name must survive a round trip through its canonical form
    if let Ok(name) = ServiceName::parse(input) {
        let canonical = name.canonical_name();
        let reparsed = ServiceName::parse(&canonical).expect("canonical form must parse");
        assert_eq!(reparsed, name);
        assert_eq!(reparsed.canonical_name(), canonical);
        assert_eq!(name.segments().len(), name.size());
    }
});

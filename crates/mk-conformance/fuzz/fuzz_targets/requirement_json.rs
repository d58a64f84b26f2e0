#![no_main]

mod common;

use mk_core::UnitTestCaseRequirement;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(requirement) = UnitTestCaseRequirement::from_json_str(text) {
        let snapshot = requirement.to_json_snapshot();
        let reparsed = UnitTestCaseRequirement::from_json_str(&snapshot);
        assert_eq!(reparsed.as_ref(), Ok(&requirement));
    }
});

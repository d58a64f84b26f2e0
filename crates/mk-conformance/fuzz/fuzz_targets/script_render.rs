#![no_main]

mod common;

use mk_core::Program;
use mk_codegen::{CodegenError, EagerGenerator, NumpyGenerator, ScriptGenerator};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(program) = serde_json::from_slice::<Program>(data) else {
        return;
    };
    let eager = EagerGenerator::new("paddle").render_program(&program);
    let reference = NumpyGenerator::new("numpy").render_program(&program);
    assert_eq!(eager.is_ok(), reference.is_ok());
    // A valid program only fails to render when a ramp length overflows.
    match (&eager, program.validate_well_formed()) {
        (Ok(_), valid) => assert!(valid.is_ok()),
        (Err(err), Ok(())) => {
            assert!(matches!(err, CodegenError::ElementCountOverflow { .. }), "{err}");
        }
        (Err(_), Err(_)) => {}
    }
    if let (Ok(eager), Ok(reference)) = (eager, reference) {
        assert_eq!(
            eager.file_content.lines().count(),
            reference.file_content.lines().count()
        );
    }
    let _ = program.canonical_fingerprint();
});

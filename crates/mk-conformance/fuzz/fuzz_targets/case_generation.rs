#![no_main]

mod common;

use common::{ByteCursor, sample_requirement};
use mk_case::{
    generate_random_unit_test_case_spec, generate_random_unit_test_case_spec_around,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut cursor = ByteCursor::new(data);
    let requirement = sample_requirement(&mut cursor);
    let seed = cursor.take_u64();

    let Ok(spec) = generate_random_unit_test_case_spec(&requirement, seed) else {
        return;
    };
    assert!(spec.dag.validate().is_ok());
    assert!(spec.program.validate_well_formed().is_ok());

    let len = spec.program.len();
    let bottom_up = cursor.take_i64_size(len + 1);
    let component = cursor.take_i64_size(len + 1);
    if let Ok(ablated) = spec.ablated(bottom_up, component) {
        assert!(ablated.program.validate_well_formed().is_ok());
        assert_eq!(
            ablated.program.final_instruction().map(|instr| &instr.output),
            spec.program.final_instruction().map(|instr| &instr.output)
        );
        let again = ablated
            .ablated(bottom_up, component)
            .map(|spec| spec.program);
        assert_eq!(again.as_ref(), Ok(&ablated.program));
    }

    let core = &spec.dag_gen_instructions;
    let grown = generate_random_unit_test_case_spec_around(&requirement, core, cursor.take_u64());
    if let Ok(grown) = grown {
        assert_eq!(grown.dag_gen_instructions[..core.len()], core[..]);
        assert!(grown.program.validate_well_formed().is_ok());
    }
});

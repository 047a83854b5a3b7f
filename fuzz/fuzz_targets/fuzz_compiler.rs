#![no_main]

use libfuzzer_sys::fuzz_target;
use luna_compiler::compile;
use luna_vm::binary_chunk::{dump, undump};

fuzz_target!(|data: &[u8]| {
    // Any input either compiles or yields a CompileError.
    let Ok(proto) = compile(data, "=fuzz") else {
        return;
    };
    // Whatever compiles must survive the verifier of its own dump.
    let bytes = dump(&proto, false);
    let reloaded = undump(&bytes, "=fuzz").expect("compiled chunk failed to reload");
    assert_eq!(reloaded.code, proto.code);
});

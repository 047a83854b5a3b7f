#![no_main]

use libfuzzer_sys::fuzz_target;
use luna_vm::binary_chunk::undump;

fuzz_target!(|data: &[u8]| {
    let _ = undump(data, "=fuzz");
});

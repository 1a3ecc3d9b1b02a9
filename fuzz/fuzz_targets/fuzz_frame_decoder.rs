#![no_main]
use libfuzzer_sys::fuzz_target;
use plate_core::decoder::{FRAME_BITS, decode_frame};

fuzz_target!(|data: [bool; FRAME_BITS]| {
    let mm = decode_frame(&data);
    assert!(mm.is_finite());
    assert!(mm.abs() <= f64::from(0x000F_FFFF_u32) / 100.0);
});

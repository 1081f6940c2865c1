#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipatch::io::{PatchOptions, apply_to_vec};

fuzz_target!(|data: &[u8]| {
    // Small blocks and a tiny cache so arbitrary COPYs hit eviction.
    let opts = PatchOptions {
        block_size: 64,
        cache_blocks: 2,
        window_size: 1 << 16,
        ..Default::default()
    };

    // The decoder must never panic, only return errors.
    let _ = apply_to_vec(&[], data, &opts);

    // Also fuzz with a non-empty source.
    if data.len() >= 2 {
        let split = data.len() / 2;
        let (source, patch) = data.split_at(split);
        let _ = apply_to_vec(source, patch, &opts);
    }
});

#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipatch::vcdiff::{FileHeader, WindowHeader};

fuzz_target!(|data: &[u8]| {
    let mut cursor = std::io::Cursor::new(data);
    if FileHeader::decode(&mut cursor).is_err() {
        return;
    }
    // Walk the window headers, skipping section contents.
    for _ in 0..64 {
        let Ok(Some(wh)) = WindowHeader::decode(&mut cursor) else {
            break;
        };
        let Some(len) = wh.sections_len() else {
            break;
        };
        cursor.set_position(cursor.position().saturating_add(len));
    }
});

#![no_main]

use encryption::tamper::{canonicalize, detect_tamper, integrity_hash, RecordFields};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let split = text
        .char_indices()
        .nth(text.chars().count() / 2)
        .map_or(text.len(), |(i, _)| i);
    let (a, b) = text.split_at(split);

    // A value can never impersonate a field boundary
    let record = RecordFields::new().field("A", a).field("B", b);
    let merged = RecordFields::new().field("A", format!("{a}|B={b}"));
    assert_ne!(canonicalize(&record), canonicalize(&merged));

    assert!(!detect_tamper(&integrity_hash(&record), &record));
});

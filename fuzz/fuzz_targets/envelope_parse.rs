#![no_main]

use encryption::envelope::{is_multi_block, parse, EnvelopeLayout, MULTI_MARKER};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    match parse(text) {
        Ok(EnvelopeLayout::Single(block)) => {
            assert!(!block.is_empty());
            assert!(!is_multi_block(text));
        }
        Ok(EnvelopeLayout::Multi(blocks)) => {
            assert!(is_multi_block(text));
            assert!(blocks.iter().all(|b| !b.is_empty() && !b.contains('|')));
            let rejoined = format!("{MULTI_MARKER}{}", blocks.join("|"));
            assert_eq!(rejoined, text.trim());
        }
        Err(_) => {}
    }
});

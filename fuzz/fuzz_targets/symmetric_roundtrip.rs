#![no_main]

use encryption::symmetric::{decrypt_bytes, encrypt_bytes, KEY_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < KEY_SIZE {
        return;
    }

    let (key, payload) = data.split_at(KEY_SIZE);

    let envelope = match encrypt_bytes(payload, key) {
        Ok(envelope) => envelope,
        Err(_) => return,
    };
    let plaintext = decrypt_bytes(&envelope, key).expect("own envelope must decrypt");
    assert_eq!(payload, plaintext.as_slice());

    // Arbitrary bytes as an envelope: errors are fine, panics are not
    let _ = decrypt_bytes(payload, key);
});

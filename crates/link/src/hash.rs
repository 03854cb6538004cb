//! The import name hash shared with the runtime stub.

/// Hashes a symbol name the way the stub's import resolver does: fold each byte in with xor,
/// rotate left by five, and rotate once more at the end. The stub walks the dynamic string
/// tables at runtime and compares hashes instead of names, so this exact function is part of the
/// ABI with the stub templates.
///
/// ```
/// use elfpress_link::import_hash;
///
/// assert_eq!(import_hash(""), 0);
/// assert_ne!(import_hash("glClear"), import_hash("glClearColor"));
/// ```
#[must_use]
pub fn import_hash(name: &str) -> u32 {
    let mut value: u32 = 0;
    for &byte in name.as_bytes() {
        value = (value ^ u32::from(byte)).rotate_left(5);
    }
    value.rotate_left(5)
}

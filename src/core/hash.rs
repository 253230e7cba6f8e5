//! Identifier Hashing
//!
//! 32-bit FNV-1a over UTF-8 bytes. Both the controller and peripheral
//! firmware derive command and name identifiers this way, so names never
//! travel over the bus.

/// FNV-1a offset basis.
pub const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;

/// FNV-1a prime.
pub const FNV_PRIME: u32 = 0x01000193;

/// Hash output type.
pub type IdHash = u32;

/// Hash a string into a 32-bit identifier.
///
/// `const` so handler ids can be declared as constants.
pub const fn str_hash(value: &str) -> IdHash {
    let bytes = value.as_bytes();
    let mut hval = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hval ^= bytes[i] as u32;
        hval = hval.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hval
}

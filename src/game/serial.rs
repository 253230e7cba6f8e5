//! Serial Numbers
//!
//! Six characters. Generated serials draw from letters without `O` (a second
//! `E` takes its place, keeping the vowel ratio) and without `Y`, plus
//! digits, and always end in a digit.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::core::rng::DeterministicRng;

/// Serial length.
pub const SERIAL_LENGTH: usize = 6;

/// Character pool for generated serials.
pub const SERIAL_CHARS: [char; 35] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'E', 'P', 'Q', 'R', 'S', 'T', 'U', 'V',
    'W', 'X', 'Z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

const VOWELS: [char; 5] = ['A', 'E', 'I', 'O', 'U'];

bitflags! {
    /// Facts about the serial that puzzles depend on.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SerialFlags: u16 {
        /// Some character is a vowel.
        const CONTAINS_VOWEL = 1;
        /// Last character is an even digit.
        const LAST_DIGIT_EVEN = 2;
        /// Last character is not an even digit.
        const LAST_DIGIT_ODD = 4;
    }
}

/// Compute the serial flags. Exactly one of the last-digit bits is set.
pub fn calc_serial_flags(serial: &str) -> SerialFlags {
    let mut flags = SerialFlags::empty();
    if serial.chars().any(|c| VOWELS.contains(&c)) {
        flags |= SerialFlags::CONTAINS_VOWEL;
    }
    match serial.chars().last() {
        Some('0' | '2' | '4' | '6' | '8') => flags |= SerialFlags::LAST_DIGIT_EVEN,
        _ => flags |= SerialFlags::LAST_DIGIT_ODD,
    }
    flags
}

/// Whether `serial` is six uppercase ASCII letters or digits.
pub fn is_valid_serial(serial: &str) -> bool {
    serial.len() == SERIAL_LENGTH
        && serial
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Generate a serial ending in a digit.
pub fn generate_serial(rng: &mut DeterministicRng) -> String {
    let mut serial: String = (0..SERIAL_LENGTH - 1)
        .map(|_| SERIAL_CHARS[rng.next_int(SERIAL_CHARS.len() as u32) as usize])
        .collect();
    let digit = rng.next_int(10) as u8;
    serial.push((b'0' + digit) as char);
    serial
}

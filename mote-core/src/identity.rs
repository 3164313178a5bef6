//! Device identity: human-readable default names derived from the radio serial.

const NAME_LEN: usize = 5;

// Alternating consonant/vowel rows, indexed by base-5 digits of the serial.
const CODEBOOK: [[char; 5]; NAME_LEN] = [
    ['z', 'v', 'g', 'p', 't'],
    ['u', 'o', 'i', 'e', 'a'],
    ['z', 'v', 'g', 'p', 't'],
    ['u', 'o', 'i', 'e', 'a'],
    ['z', 'v', 'g', 'p', 't'],
];

/// Five-letter pronounceable name for a serial, e.g. `zuzuz` for 0.
/// Digit `i` (least significant first) picks from row `i` and fills position `4 - i`.
pub fn default_device_name(serial: u32) -> String {
    let mut name = [' '; NAME_LEN];
    let mut n = serial;
    for (i, row) in CODEBOOK.iter().enumerate() {
        name[NAME_LEN - 1 - i] = row[(n % 5) as usize];
        n /= 5;
    }
    name.iter().collect()
}

/// Random serial for hosts without radio hardware.
pub fn random_serial() -> u32 {
    rand::random()
}

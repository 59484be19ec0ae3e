//! Flow key generation.
//!
//! Keys are 16 characters of lowercase alphanumerics, first character a
//! letter so keys are usable as identifiers everywhere, drawn from the OS
//! random source. Uniqueness against the store is enforced by the caller
//! (generate, check, retry) under a fixed attempt budget.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::types::FlowKey;

/// Fixed key length
pub const KEY_LENGTH: usize = 16;

/// Attempt budget for generate-and-check loops. The key space is 26 * 36^15,
/// so exhausting this means something else is wrong.
pub const MAX_KEY_ATTEMPTS: u32 = 16;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Stateless flow-key generator backed by a cryptographically strong source
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyGenerator;

impl KeyGenerator {
    /// Create a generator
    pub fn new() -> Self {
        Self
    }

    /// Draw one candidate key
    pub fn generate(&self) -> FlowKey {
        let mut bytes = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);

        let mut key = String::with_capacity(KEY_LENGTH);
        key.push(LETTERS[bytes[0] as usize % LETTERS.len()] as char);
        for byte in &bytes[1..] {
            key.push(ALPHABET[*byte as usize % ALPHABET.len()] as char);
        }

        FlowKey(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_shape() {
        let key = KeyGenerator::new().generate();

        assert_eq!(key.as_str().len(), KEY_LENGTH);
        assert!(key.as_str().chars().next().unwrap().is_ascii_lowercase());
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_ten_thousand_draws_unique_and_letter_first() {
        let generator = KeyGenerator::new();
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            let key = generator.generate();
            assert!(
                key.as_str().chars().next().unwrap().is_ascii_alphabetic(),
                "key must start with a letter: {}",
                key
            );
            assert!(seen.insert(key.0), "duplicate key drawn");
        }
    }
}

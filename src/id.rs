//! Token id generation.
//!
//! Ids are built without server coordination: two rounds of
//! `base36(now_millis) + base36(random)`, cut to exactly [`TOKEN_ID_LEN`]
//! characters. Uniqueness is best-effort; a colliding write overwrites.

use chrono::Utc;
use rand::Rng;

/// Fixed width of every token id.
pub const TOKEN_ID_LEN: usize = 20;

const RANDOM_DIGITS: usize = 11;
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Encode a non-negative integer in lowercase base 36.
pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

fn random_base36<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Generate a new 20-character token id.
pub fn generate_token_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(2 * (9 + RANDOM_DIGITS));
    for _ in 0..2 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        id.push_str(&to_base36(now));
        id.push_str(&random_base36(&mut rng, RANDOM_DIGITS));
    }
    id.truncate(TOKEN_ID_LEN);
    id
}

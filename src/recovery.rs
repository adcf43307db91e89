//! Single-use backup codes for when the authenticator device is lost.
//!
//! Codes look like `XK2P9Q-7MWRT4`: two groups of six characters from a
//! 35-letter alphabet that deliberately omits `L` (too close to `I` and `1`
//! on a printout). Only the bcrypt hashes are meant to be stored; consuming
//! a code removes its hash from the stored set.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
  error::{Result, TwoFactorError},
  rng,
};

const ALPHABET: &[u8] = b"ABCDEFGHIJKMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 12;
const CODE_COUNT: usize = 10;
const BCRYPT_COST: u32 = 10;

static CODE_FORMAT: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^[0-9A-Z]{6}-[0-9A-Z]{6}$").expect("recovery code pattern"));

/// Returns true if `code` has the `XXXXXX-XXXXXX` recovery code shape.
pub fn valid_recovery_code(code: &str) -> bool { CODE_FORMAT.is_match(code) }

/// Generates 10 fresh recovery codes.
///
/// Each character is picked as `byte % 35` over the alphabet. The modulo is
/// slightly biased (35 does not divide 256) but kept for compatibility with
/// existing code sets; at 12 characters of a 35-letter pool the entropy loss
/// is irrelevant.
pub fn generate_recovery_codes() -> Result<Vec<String>> {
  let mut bytes = [0u8; CODE_COUNT * CODE_LENGTH];
  rng::try_fill_bytes(&mut bytes).map_err(|_| TwoFactorError::KeyGeneration)?;

  let mut codes = Vec::with_capacity(CODE_COUNT);
  for chunk in bytes.chunks(CODE_LENGTH) {
    let mut code = String::with_capacity(CODE_LENGTH + 1);
    for (position, byte) in chunk.iter().enumerate() {
      if position == CODE_LENGTH / 2 {
        code.push('-');
      }
      code.push(ALPHABET[usize::from(byte % ALPHABET.len() as u8)] as char);
    }
    codes.push(code);
  }

  Ok(codes)
}

/// Hashes each code with bcrypt at cost 10, preserving order.
///
/// The hashes are computed in parallel, one thread per code; the first
/// failure wins and fails the whole call.
pub fn bcrypt_recovery_codes(codes: &[String]) -> Result<Vec<String>> {
  std::thread::scope(|scope| {
    let workers: Vec<_> =
      codes.iter().map(|code| scope.spawn(move || bcrypt::hash(code, BCRYPT_COST))).collect();

    workers
      .into_iter()
      .map(|worker| worker.join().expect("bcrypt worker panicked").map_err(Into::into))
      .collect()
  })
}

/// Consumes a recovery code: compares `input` against every stored hash and
/// removes the first match.
///
/// Returns the remaining hashes (order preserved) on a match, `None` when no
/// stored hash matches.
pub fn use_recovery_code(hashed_codes: &[String], input: &str) -> Option<Vec<String>> {
  let used = hashed_codes.iter().position(|hash| bcrypt::verify(input, hash).unwrap_or(false))?;

  let mut remaining = Vec::with_capacity(hashed_codes.len() - 1);
  remaining.extend_from_slice(&hashed_codes[..used]);
  remaining.extend_from_slice(&hashed_codes[used + 1..]);
  Some(remaining)
}

/// Joins codes with commas for single-column storage.
pub fn encode_recovery_codes(codes: &[String]) -> String { codes.join(",") }

/// Splits a comma-joined code list back apart.
pub fn decode_recovery_codes(encoded: &str) -> Vec<String> {
  encoded.split(',').map(str::to_string).collect()
}

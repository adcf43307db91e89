//! Deterministic nonce derivation.
//!
//! Every sealed envelope gets a fresh 24-byte nonce from HKDF-SHA256 over the
//! per-context nonce key and salt, with the engine's counter value mixed into
//! the info string. Uniqueness therefore rests entirely on the counter: one
//! value is consumed per encryption, and two processes must never share the
//! same key material.

use std::sync::Mutex;

use hkdf::Hkdf;
use sha2::Sha256;

use super::message::{KEY_SIZE, NONCE_SIZE};

/// Derives the nonce for one encryption.
///
/// IKM is the nonce key, the salt seeds the extract step and the info string
/// is `context ‖ counter` (counter in decimal). If the hash function ever
/// changes, the salt length must change with it.
pub(crate) fn derive_nonce(
  nonce_key: &[u8; KEY_SIZE],
  salt: &[u8; KEY_SIZE],
  context: &str,
  counter: &str,
) -> [u8; NONCE_SIZE] {
  let hk = Hkdf::<Sha256>::new(Some(salt), nonce_key);
  let info = format!("{context}{counter}");
  let mut nonce = [0u8; NONCE_SIZE];
  hk.expand(info.as_bytes(), &mut nonce).expect("24 bytes is a valid HKDF output length");
  nonce
}

/// Monotonic counter feeding [`derive_nonce`].
///
/// Starts at zero for every engine instance and hands out each value exactly
/// once. At `u64::MAX` it wraps back to zero, which would repeat nonces; no
/// process is expected to come near 2^64 encryptions, so the wrap is logged
/// loudly instead of silently reusing values.
pub(crate) struct NonceCounter(Mutex<u64>);

impl NonceCounter {
  pub(crate) fn new() -> NonceCounter { NonceCounter(Mutex::new(0)) }

  /// Returns the current value as its decimal string and increments.
  pub(crate) fn fetch_and_increment(&self) -> String {
    let mut counter = self.0.lock().expect("nonce counter lock poisoned");

    if *counter == u64::MAX {
      log::error!("nonce derivation counter wrapped to zero; nonce uniqueness is no longer guaranteed for this engine");
      *counter = 0;
    }

    let current = counter.to_string();
    *counter += 1;
    current
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn derivation_is_deterministic() {
    let nonce_key = [1u8; KEY_SIZE];
    let salt = [2u8; KEY_SIZE];

    let a = derive_nonce(&nonce_key, &salt, "sec51", "0");
    let b = derive_nonce(&nonce_key, &salt, "sec51", "0");
    assert_eq!(a, b);
  }

  #[test]
  fn counter_and_context_change_the_nonce() {
    let nonce_key = [1u8; KEY_SIZE];
    let salt = [2u8; KEY_SIZE];

    let base = derive_nonce(&nonce_key, &salt, "sec51", "0");
    assert_ne!(derive_nonce(&nonce_key, &salt, "sec51", "1"), base);
    assert_ne!(derive_nonce(&nonce_key, &salt, "other", "0"), base);
  }

  #[test]
  fn counter_hands_out_distinct_values() {
    let counter = NonceCounter::new();
    assert_eq!(counter.fetch_and_increment(), "0");
    assert_eq!(counter.fetch_and_increment(), "1");
    assert_eq!(counter.fetch_and_increment(), "2");
  }

  #[test]
  fn counter_values_are_unique_across_threads() {
    use std::collections::HashSet;

    let counter = NonceCounter::new();
    let values: Vec<String> = std::thread::scope(|s| {
      let handles: Vec<_> = (0..8).map(|_| s.spawn(|| {
        (0..100).map(|_| counter.fetch_and_increment()).collect::<Vec<_>>()
      })).collect();
      handles.into_iter().flat_map(|h| h.join().expect("counter thread")).collect()
    });

    let unique: HashSet<_> = values.iter().collect();
    assert_eq!(unique.len(), 800);
  }
}

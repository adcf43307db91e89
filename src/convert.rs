//! Fixed-width integer codecs for the two wire formats.
//!
//! The TOTP state layout is big-endian while the crypto engine's envelope is
//! little-endian, so both codecs are kept side by side. The [`round`] helper
//! implements half-away-from-zero rounding, which the time-step computation
//! depends on.

pub mod bigendian {
  pub fn to_uint64(n: u64) -> [u8; 8] { n.to_be_bytes() }

  pub fn from_uint64(data: [u8; 8]) -> u64 { u64::from_be_bytes(data) }

  pub fn to_int(n: i32) -> [u8; 4] { n.to_be_bytes() }

  pub fn from_int(data: [u8; 4]) -> i32 { i32::from_be_bytes(data) }
}

pub mod smallendian {
  pub fn to_uint64(n: u64) -> [u8; 8] { n.to_le_bytes() }

  pub fn from_uint64(data: [u8; 8]) -> u64 { u64::from_le_bytes(data) }

  pub fn to_int(n: i32) -> [u8; 4] { n.to_le_bytes() }

  pub fn from_int(data: [u8; 4]) -> i32 { i32::from_le_bytes(data) }
}

/// Rounds to the nearest integer, with halves away from zero.
///
/// Not banker's rounding: `round(3.5) == 4`. The RFC 6238 test vectors rely
/// on this exact behavior at the half-integer boundary.
pub fn round(n: f64) -> u64 {
  if n < 0.0 {
    (n - 0.5).ceil() as u64
  } else {
    (n + 0.5).floor() as u64
  }
}

/// Computes the time step `T` for a UNIX timestamp and step period.
///
/// The division happens on integers before the rounding, matching the
/// reference behavior: `time_step(1438601387, 30) == 47953379`.
pub fn time_step(ts: i64, step_size: i64) -> u64 { round((ts / step_size) as f64) }

//! CSPRNG facade used by every random-material call site.
//!
//! [`GlobalRng`] wraps the `rand` crate's [`rand::rngs::OsRng`] so the key
//! store, the TOTP constructor and the recovery-code generator all draw from
//! the same source, and so the fallible path stays visible at the call sites
//! that must report entropy failures.

use rand::{rngs::OsRng, CryptoRng, RngCore};

pub(crate) struct GlobalRng;

impl RngCore for GlobalRng {
  fn next_u32(&mut self) -> u32 { OsRng.next_u32() }

  fn next_u64(&mut self) -> u64 { OsRng.next_u64() }

  fn fill_bytes(&mut self, dest: &mut [u8]) { OsRng.fill_bytes(dest) }

  fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
    OsRng.try_fill_bytes(dest)
  }
}

impl CryptoRng for GlobalRng {}

/// Fills `dst` with random bytes, reporting CSPRNG failures to the caller.
pub(crate) fn try_fill_bytes(dst: &mut [u8]) -> Result<(), rand::Error> {
  GlobalRng.try_fill_bytes(dst)
}

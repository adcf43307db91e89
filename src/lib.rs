//! RFC 6238 time-based one-time passwords with encrypted state persistence.
//!
//! The crate covers the whole server-side 2FA flow: enrolling a user with
//! [`Totp::new`], handing the secret to an authenticator app through the
//! `otpauth://` URL or the base32 secret, validating submitted tokens with
//! clock-drift resynchronization and failure lockout, persisting the mutable
//! verification state as a tamper-evident encrypted blob, and issuing
//! single-use recovery codes for lost devices.
//!
//! Supported HMAC constructions: SHA1, SHA256 and SHA512.
//!
//! ```no_run
//! use twofactor::{HashAlgorithm, Totp};
//!
//! let mut otp = Totp::new("info@sec51.com", "Sec51", HashAlgorithm::Sha1, 6)?;
//! let url = otp.url()?; // encode this as a QR code during enrollment
//!
//! // later, when the user submits a token:
//! match otp.validate("123456") {
//!   Ok(()) => { /* authenticated */ },
//!   Err(twofactor::TwoFactorError::LockedDown) => { /* tell them to wait */ },
//!   Err(_) => { /* wrong code */ },
//! }
//! # Ok::<(), twofactor::TwoFactorError>(())
//! ```
#![warn(unused_extern_crates, unreachable_pub, nonstandard_style)]

pub mod convert;
pub mod crypto;
pub mod error;
pub mod otpauth;
pub mod recovery;
mod rng;
pub mod totp;

pub use crate::{
  crypto::{CryptoEngine, EncryptedMessage, Message},
  error::{Result, TwoFactorError},
  otpauth::HashAlgorithm,
  recovery::{
    bcrypt_recovery_codes, decode_recovery_codes, encode_recovery_codes,
    generate_recovery_codes, use_recovery_code, valid_recovery_code,
  },
  totp::Totp,
};

//! HMAC token truncation and `otpauth://` provisioning URL assembly,
//! compatible with Google Authenticator and other OTP authenticators.

use std::fmt;

use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

/// The hash function driving the HMAC construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
  /// HMAC-SHA1 (the authenticator-app default)
  #[default]
  Sha1,
  /// HMAC-SHA256
  Sha256,
  /// HMAC-SHA512
  Sha512,
}

impl HashAlgorithm {
  /// Output size of the hash, which is also the TOTP secret key length.
  pub fn key_size(self) -> usize {
    match self {
      HashAlgorithm::Sha1 => 20,
      HashAlgorithm::Sha256 => 32,
      HashAlgorithm::Sha512 => 64,
    }
  }

  /// Serialized tag: 0 = SHA1, 1 = SHA256, 2 = SHA512.
  pub(crate) fn wire_tag(self) -> i32 {
    match self {
      HashAlgorithm::Sha1 => 0,
      HashAlgorithm::Sha256 => 1,
      HashAlgorithm::Sha512 => 2,
    }
  }

  /// Unknown tags fall back to SHA1, matching the serialized form's default.
  pub(crate) fn from_wire_tag(tag: i32) -> HashAlgorithm {
    match tag {
      1 => HashAlgorithm::Sha256,
      2 => HashAlgorithm::Sha512,
      _ => HashAlgorithm::Sha1,
    }
  }
}

impl fmt::Display for HashAlgorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", match self {
      HashAlgorithm::Sha1 => "SHA1",
      HashAlgorithm::Sha256 => "SHA256",
      HashAlgorithm::Sha512 => "SHA512",
    })
  }
}

/// Generate a token from the counter bytes with the given hash and length.
///
/// This is the RFC 4226 dynamic truncation: take the low nibble of the last
/// HMAC byte as an offset, read 4 bytes there, mask the sign bit, reduce mod
/// `10^digits` and left-pad with zeros.
pub(crate) fn generate_token(key: &[u8], counter: &[u8], hash: HashAlgorithm, digits: i32) -> String {
  let digest = match hash {
    HashAlgorithm::Sha1 => {
      let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take a key of any size");
      mac.update(counter);
      mac.finalize().into_bytes().to_vec()
    },
    HashAlgorithm::Sha256 => {
      let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take a key of any size");
      mac.update(counter);
      mac.finalize().into_bytes().to_vec()
    },
    HashAlgorithm::Sha512 => {
      let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("HMAC can take a key of any size");
      mac.update(counter);
      mac.finalize().into_bytes().to_vec()
    },
  };

  let offset = (digest[digest.len() - 1] & 0x0f) as usize;
  let code = u32::from_be_bytes([
    digest[offset] & 0x7f,
    digest[offset + 1],
    digest[offset + 2],
    digest[offset + 3],
  ]);

  let code = code % 10u32.pow(digits as u32);
  format!("{code:0width$}", width = digits as usize)
}

// Query components escape everything outside the RFC 3986 unreserved set.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

pub(crate) fn query_escape(s: &str) -> String { utf8_percent_encode(s, QUERY_ESCAPE).to_string() }

/// The provisioning label, `issuerEscaped:account`.
pub(crate) fn label(issuer: &str, account: &str) -> String {
  format!("{}:{}", query_escape(issuer), account)
}

/// Assembles the `otpauth://totp/...` URL consumed by authenticator apps and
/// QR renderers.
pub(crate) fn provisioning_url(
  secret: &str,
  issuer: &str,
  account: &str,
  counter: u64,
  digits: i32,
  period: i32,
  algorithm: HashAlgorithm,
) -> String {
  format!(
    "otpauth://totp/{label}?secret={secret}&counter={counter}&issuer={issuer}&digits={digits}&period={period}&algorithm={algorithm}",
    label = label(issuer, account),
    secret = query_escape(secret),
    issuer = query_escape(issuer),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sha1_vector_at_t59() {
    // RFC 6238 appendix B: T = 1 at ts = 59 with a 30 second step
    let key = hex::decode("3132333435363738393031323334353637383930").unwrap();
    let counter = 1u64.to_be_bytes();
    assert_eq!(generate_token(&key, &counter, HashAlgorithm::Sha1, 8), "94287082");
  }

  #[test]
  fn token_is_zero_padded() {
    let token = generate_token(b"12345678901234567890", &42u64.to_be_bytes(), HashAlgorithm::Sha1, 8);
    assert_eq!(token.len(), 8);
    assert!(token.chars().all(|c| c.is_ascii_digit()));

    let again = generate_token(b"12345678901234567890", &42u64.to_be_bytes(), HashAlgorithm::Sha1, 8);
    assert_eq!(token, again);
  }

  #[test]
  fn key_sizes_match_hash_output() {
    assert_eq!(HashAlgorithm::Sha1.key_size(), 20);
    assert_eq!(HashAlgorithm::Sha256.key_size(), 32);
    assert_eq!(HashAlgorithm::Sha512.key_size(), 64);
  }

  #[test]
  fn wire_tags_round_trip() {
    for hash in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
      assert_eq!(HashAlgorithm::from_wire_tag(hash.wire_tag()), hash);
    }
    assert_eq!(HashAlgorithm::from_wire_tag(99), HashAlgorithm::Sha1);
  }

  #[test]
  fn label_escapes_the_issuer() {
    assert_eq!(label("Sec51", "info@sec51.com"), "Sec51:info@sec51.com");
    assert_eq!(label("Acme Corp", "a@b.com"), "Acme%20Corp:a@b.com");
  }

  #[test]
  fn url_shape() {
    let url = provisioning_url("JBSWY3DPEHPK3PXP", "Sec51", "info@sec51.com", 7, 6, 30, HashAlgorithm::Sha256);
    assert_eq!(
      url,
      "otpauth://totp/Sec51:info@sec51.com?secret=JBSWY3DPEHPK3PXP&counter=7&issuer=Sec51&digits=6&period=30&algorithm=SHA256"
    );
  }
}

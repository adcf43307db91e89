//! Inner message and encrypted envelope codecs.
//!
//! Envelope layout (little-endian):
//!
//! ```text
//! [0..8)   length (u64 LE) = len(data) + 24 + 8
//! [8..32)  nonce  (24 bytes)
//! [32..N)  ciphertext + authentication tag
//! ```
//!
//! Inner message layout, serialized before sealing:
//!
//! ```text
//! [0..4)   version (i32 LE)
//! [4..8)   type    (i32 LE)
//! [8..N)   text    (arbitrary payload bytes)
//! ```

use crate::{
  convert::smallendian,
  error::{Result, TwoFactorError},
};

pub(crate) const NONCE_SIZE: usize = 24;
pub(crate) const KEY_SIZE: usize = 32;

/// Current version written into every inner message.
const MESSAGE_VERSION: i32 = 0;

/// The plaintext unit the engine seals: a version, an opaque type tag and the
/// payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  pub version:      i32,
  pub message_type: i32,
  pub text:         Vec<u8>,
}

impl Message {
  /// Creates a message at the current version. Empty payloads are refused
  /// since sealing them would produce an envelope with nothing to protect.
  pub fn new(text: Vec<u8>, message_type: i32) -> Result<Message> {
    if text.is_empty() {
      return Err(TwoFactorError::MessageEmpty);
    }
    Ok(Message { version: MESSAGE_VERSION, message_type, text })
  }

  pub(crate) fn to_bytes(&self) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(8 + self.text.len());
    buffer.extend_from_slice(&smallendian::to_int(self.version));
    buffer.extend_from_slice(&smallendian::to_int(self.message_type));
    buffer.extend_from_slice(&self.text);
    buffer
  }

  pub(crate) fn from_bytes(data: &[u8]) -> Result<Message> {
    if data.len() < 4 + 4 + 1 {
      return Err(TwoFactorError::MessageParsing);
    }

    let version = smallendian::from_int(data[0..4].try_into().expect("4-byte slice"));
    let message_type = smallendian::from_int(data[4..8].try_into().expect("4-byte slice"));
    Ok(Message { version, message_type, text: data[8..].to_vec() })
  }
}

/// The sealed envelope, safe to persist or send as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
  pub(crate) length: u64,
  pub(crate) nonce:  [u8; NONCE_SIZE],
  pub(crate) data:   Vec<u8>,
}

impl EncryptedMessage {
  pub fn to_bytes(&self) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(8 + NONCE_SIZE + self.data.len());
    buffer.extend_from_slice(&smallendian::to_uint64(self.length));
    buffer.extend_from_slice(&self.nonce);
    buffer.extend_from_slice(&self.data);
    buffer
  }

  pub(crate) fn from_bytes(data: &[u8]) -> Result<EncryptedMessage> {
    if data.len() < 8 + NONCE_SIZE + 1 {
      return Err(TwoFactorError::MessageParsing);
    }

    let length = smallendian::from_uint64(data[0..8].try_into().expect("8-byte slice"));
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&data[8..8 + NONCE_SIZE]);
    Ok(EncryptedMessage { length, nonce, data: data[8 + NONCE_SIZE..].to_vec() })
  }
}

//! Per-context authenticated encryption.
//!
//! A [`CryptoEngine`] owns the key material for one sanitized context string:
//! a symmetric secret key, a Curve25519 keypair, a salt and a nonce key, all
//! loaded from (or created in) the on-disk [`KeyStore`]. It seals inner
//! [`Message`]s into [`EncryptedMessage`] envelopes with NaCl secretbox, or
//! with NaCl box when a peer public key is involved. Nonces come from HKDF
//! over a per-instance monotonic counter, so every seal consumes exactly one
//! counter value.
//!
//! The engine is thread-safe: the per-peer precomputed box cache and the
//! nonce counter sit behind their own mutexes, and encryption always runs
//! outside the cache lock.

mod keystore;
mod message;
mod nonce;

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::{Arc, Mutex},
};

use crypto_box::{
  aead::{Aead, KeyInit},
  PublicKey, SalsaBox, SecretKey,
};
use crypto_secretbox::{Key, XSalsa20Poly1305};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use sha2::{Digest, Sha224};

use crate::error::{Result, TwoFactorError};

pub use keystore::{default_key_path, KeySlot, KeyStore, KEY_PATH_ENV};
pub use message::{EncryptedMessage, Message};

pub(crate) use message::{KEY_SIZE, NONCE_SIZE};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s").expect("whitespace pattern"));

/// Normalizes a context string into a key-file prefix: URL-unescape, trim,
/// lowercase, replace every whitespace character with `_`.
///
/// Path separators survive that pipeline, and a context is used verbatim as a
/// filename prefix, so they are rejected outright.
fn sanitize_context(context: &str) -> Result<String> {
  let unescaped = percent_decode_str(&context.replace('+', " ")).decode_utf8_lossy().into_owned();
  let lowered = unescaped.trim().to_lowercase();
  let cleaned = WHITESPACE.replace_all(&lowered, "_").into_owned();

  if cleaned.contains('/') || cleaned.contains('\\') {
    return Err(TwoFactorError::KeyNotValid);
  }
  Ok(cleaned)
}

/// Symmetric and public-key authenticated encryption bound to one context.
pub struct CryptoEngine {
  context:      String,
  public_key:   PublicKey,
  private_key:  SecretKey,
  secret_key:   [u8; KEY_SIZE],
  salt:         [u8; KEY_SIZE],
  nonce_key:    [u8; KEY_SIZE],
  shared_boxes: Mutex<HashMap<String, Arc<SalsaBox>>>,
  counter:      nonce::NonceCounter,
}

impl CryptoEngine {
  /// Initializes an engine for `context` using the default key directory
  /// (`SEC51_KEYPATH`, else `keys/`).
  pub fn init(context: &str) -> Result<CryptoEngine> {
    CryptoEngine::with_key_path(context, default_key_path())
  }

  /// Initializes an engine with an explicit key directory. Key material is
  /// loaded from disk when present and generated and persisted otherwise.
  pub fn with_key_path(context: &str, root: impl Into<PathBuf>) -> Result<CryptoEngine> {
    let context = sanitize_context(context)?;
    let store = KeyStore::open(root)?;

    let salt = store.load_or_create(&context, KeySlot::Salt)?;
    let (public_key, private_key) = store.load_or_create_keypair(&context)?;
    let secret_key = store.load_or_create(&context, KeySlot::Secret)?;
    let nonce_key = store.load_or_create(&context, KeySlot::Nonce)?;

    Ok(CryptoEngine {
      context,
      public_key: PublicKey::from(public_key),
      private_key: SecretKey::from(private_key),
      secret_key,
      salt,
      nonce_key,
      shared_boxes: Mutex::new(HashMap::new()),
      counter: nonce::NonceCounter::new(),
    })
  }

  /// The engine's Curve25519 public key, to hand to peers.
  pub fn public_key(&self) -> [u8; KEY_SIZE] { *self.public_key.as_bytes() }

  fn next_nonce(&self) -> [u8; NONCE_SIZE] {
    nonce::derive_nonce(
      &self.nonce_key,
      &self.salt,
      &self.context,
      &self.counter.fetch_and_increment(),
    )
  }

  /// Seals a message with the context's symmetric secret key.
  pub fn new_encrypted_message(&self, message: &Message) -> Result<EncryptedMessage> {
    let nonce = self.next_nonce();

    let cipher = XSalsa20Poly1305::new(Key::from_slice(&self.secret_key));
    let data = cipher
      .encrypt(&nonce.into(), message.to_bytes().as_slice())
      .expect("secretbox seal is infallible for in-memory plaintext");

    let length = (data.len() + NONCE_SIZE + 8) as u64;
    Ok(EncryptedMessage { length, nonce, data })
  }

  /// Seals a message for a peer with NaCl box.
  ///
  /// The per-peer precomputed box is cached under `hex(SHA224(peer key))`;
  /// the cache lock covers only the lookup and, on a miss, the precompute and
  /// insert. Sealing itself never holds the lock.
  pub fn new_encrypted_message_with_pubkey(
    &self,
    message: &Message,
    peer_public_key: &[u8],
  ) -> Result<EncryptedMessage> {
    let peer = peer_key(peer_public_key)?;
    if *peer.as_bytes() == [0u8; KEY_SIZE] {
      return Err(TwoFactorError::KeyNotValid);
    }

    let nonce = self.next_nonce();

    let shared = {
      let mut cache = self.shared_boxes.lock().expect("shared box cache lock poisoned");
      cache
        .entry(cache_key(&peer))
        .or_insert_with(|| Arc::new(SalsaBox::new(&peer, &self.private_key)))
        .clone()
    };

    let data = shared
      .encrypt(&nonce.into(), message.to_bytes().as_slice())
      .expect("box seal is infallible for in-memory plaintext");

    let length = (data.len() + NONCE_SIZE + 8) as u64;
    Ok(EncryptedMessage { length, nonce, data })
  }

  /// Opens a symmetric envelope produced by [`Self::new_encrypted_message`].
  pub fn decrypt(&self, encrypted_bytes: &[u8]) -> Result<Message> {
    let envelope = EncryptedMessage::from_bytes(encrypted_bytes)?;

    let cipher = XSalsa20Poly1305::new(Key::from_slice(&self.secret_key));
    let plaintext = cipher
      .decrypt(&envelope.nonce.into(), envelope.data.as_slice())
      .map_err(|_| TwoFactorError::MessageDecryption)?;

    Message::from_bytes(&plaintext)
  }

  /// Opens a box envelope sealed by `peer_public_key`'s owner for us.
  ///
  /// Uses the precomputed box if the peer is already cached; otherwise opens
  /// with a one-shot box without populating the cache.
  pub fn decrypt_with_public_key(
    &self,
    encrypted_bytes: &[u8],
    peer_public_key: &[u8],
  ) -> Result<Message> {
    let envelope = EncryptedMessage::from_bytes(encrypted_bytes)?;
    let peer = peer_key(peer_public_key)?;

    let cached = {
      let cache = self.shared_boxes.lock().expect("shared box cache lock poisoned");
      cache.get(&cache_key(&peer)).cloned()
    };
    let shared =
      cached.unwrap_or_else(|| Arc::new(SalsaBox::new(&peer, &self.private_key)));

    let plaintext = shared
      .decrypt(&envelope.nonce.into(), envelope.data.as_slice())
      .map_err(|_| TwoFactorError::MessageDecryption)?;

    Message::from_bytes(&plaintext)
  }
}

fn peer_key(bytes: &[u8]) -> Result<PublicKey> {
  let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| TwoFactorError::KeyNotValid)?;
  Ok(PublicKey::from(key))
}

fn cache_key(peer: &PublicKey) -> String { hex::encode(Sha224::digest(peer.as_bytes())) }

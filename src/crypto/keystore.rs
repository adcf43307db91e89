//! On-disk key material, one directory per deployment.
//!
//! Each context owns five files named `<context>_<slot>.key`, every one a
//! 32-byte key hex-encoded to 64 ASCII characters. Files are written exactly
//! once with an exclusive create at mode `0400`; the directory is created at
//! mode `0700`. A missing file is generated from the OS CSPRNG, an existing
//! one is decoded and returned, so repeated engine initializations converge
//! on the same material.

use std::{
  fs,
  io::Write,
  path::{Path, PathBuf},
};

use crate::{
  error::{Result, TwoFactorError},
  rng,
};

use super::message::KEY_SIZE;

/// Environment variable overriding the default key directory.
pub const KEY_PATH_ENV: &str = "SEC51_KEYPATH";

/// Resolves the key directory: `SEC51_KEYPATH` if set, else `keys/`.
pub fn default_key_path() -> PathBuf {
  std::env::var_os(KEY_PATH_ENV).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("keys"))
}

/// The five per-context key files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySlot {
  Salt,
  Secret,
  Public,
  Private,
  Nonce,
}

impl KeySlot {
  fn suffix(self) -> &'static str {
    match self {
      KeySlot::Salt => "salt",
      KeySlot::Secret => "secret",
      KeySlot::Public => "public",
      KeySlot::Private => "private",
      KeySlot::Nonce => "nonce",
    }
  }

  fn generation_error(self) -> TwoFactorError {
    match self {
      KeySlot::Salt => TwoFactorError::SaltGeneration,
      _ => TwoFactorError::KeyGeneration,
    }
  }
}

/// Key directory handle. Construct one explicitly with the root you want;
/// [`default_key_path`] supplies the conventional root at engine init.
pub struct KeyStore {
  root: PathBuf,
}

impl KeyStore {
  /// Opens the store, creating the directory at mode `0700` if missing.
  pub fn open(root: impl Into<PathBuf>) -> Result<KeyStore> {
    let root = root.into();
    if !root.exists() {
      let mut builder = fs::DirBuilder::new();
      builder.recursive(true);
      #[cfg(unix)]
      {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
      }
      builder.create(&root)?;
    }
    Ok(KeyStore { root })
  }

  fn slot_path(&self, context: &str, slot: KeySlot) -> PathBuf {
    self.root.join(format!("{context}_{}.key", slot.suffix()))
  }

  /// Whether the slot file exists for this context.
  pub fn contains(&self, context: &str, slot: KeySlot) -> bool {
    self.slot_path(context, slot).exists()
  }

  /// Reads and decodes a slot file.
  pub fn read(&self, context: &str, slot: KeySlot) -> Result<[u8; KEY_SIZE]> {
    read_key(&self.slot_path(context, slot))
  }

  /// Writes a slot file. Fails if the file already exists.
  pub fn write(&self, context: &str, slot: KeySlot, key: &[u8; KEY_SIZE]) -> Result<()> {
    write_key(&self.slot_path(context, slot), key)
  }

  /// Deletes a slot file if present.
  pub fn delete(&self, context: &str, slot: KeySlot) -> Result<()> {
    let path = self.slot_path(context, slot);
    if path.exists() {
      fs::remove_file(path)?;
    }
    Ok(())
  }

  /// Loads the slot file, generating and persisting fresh random bytes if it
  /// does not exist yet.
  pub fn load_or_create(&self, context: &str, slot: KeySlot) -> Result<[u8; KEY_SIZE]> {
    let path = self.slot_path(context, slot);
    if path.exists() {
      return read_key(&path);
    }

    let mut key = [0u8; KEY_SIZE];
    rng::try_fill_bytes(&mut key).map_err(|_| slot.generation_error())?;
    write_key(&path, &key)?;
    Ok(key)
  }

  /// Loads the Curve25519 keypair, generating one if either half is missing.
  ///
  /// The public key is written first. If the private key write then fails the
  /// public key is rolled back; if that rollback fails too, both files are in
  /// an unrecoverable half-written state and must be deleted manually, so a
  /// breadcrumb is logged before the error surfaces.
  pub fn load_or_create_keypair(&self, context: &str) -> Result<([u8; KEY_SIZE], [u8; KEY_SIZE])> {
    let public_path = self.slot_path(context, KeySlot::Public);
    let private_path = self.slot_path(context, KeySlot::Private);

    if public_path.exists() && private_path.exists() {
      return Ok((read_key(&public_path)?, read_key(&private_path)?));
    }

    let secret = crypto_box::SecretKey::generate(&mut rng::GlobalRng);
    let public = *secret.public_key().as_bytes();
    let private = secret.to_bytes();

    write_key(&public_path, &public)?;
    if let Err(err) = write_key(&private_path, &private) {
      if let Err(cleanup) = fs::remove_file(&public_path) {
        log::error!(
          "failed to persist the private key {} and the cleanup of the public key {} failed as well ({cleanup}); delete both files manually",
          private_path.display(),
          public_path.display(),
        );
      }
      return Err(err);
    }

    Ok((public, private))
  }
}

fn read_key(path: &Path) -> Result<[u8; KEY_SIZE]> {
  let encoded = fs::read_to_string(path)?;
  let decoded = hex::decode(encoded.trim()).map_err(|_| TwoFactorError::KeySize(KEY_SIZE))?;
  let key: [u8; KEY_SIZE] =
    decoded.try_into().map_err(|_| TwoFactorError::KeySize(KEY_SIZE))?;
  Ok(key)
}

fn write_key(path: &Path, key: &[u8; KEY_SIZE]) -> Result<()> {
  let mut options = fs::OpenOptions::new();
  options.write(true).create_new(true);
  #[cfg(unix)]
  {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o400);
  }

  let mut file = options.open(path)?;
  file.write_all(hex::encode(key).as_bytes())?;
  Ok(())
}

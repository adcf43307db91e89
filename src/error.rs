pub type Result<T> = std::result::Result<T, TwoFactorError>;

#[derive(thiserror::Error, Debug)]
pub enum TwoFactorError {
  #[error("TOTP has not been initialized correctly")]
  InitializationFailed,

  #[error("the verification is locked down, because of too many trials")]
  LockedDown,

  #[error("tokens mismatch")]
  TokenMismatch,

  #[error("user-provided token is empty")]
  EmptyToken,

  #[error("the provisioned key size is not {0} bytes")]
  KeySize(usize),

  #[error("the provisioned public key is not valid")]
  KeyNotValid,

  #[error("could not generate random salt")]
  SaltGeneration,

  #[error("could not generate random key")]
  KeyGeneration,

  #[error("could not parse the message from bytes")]
  MessageParsing,

  #[error("could not verify the message, it has been tampered with")]
  MessageDecryption,

  #[error("cannot encrypt an empty message")]
  MessageEmpty,

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Bcrypt(#[from] bcrypt::BcryptError),
}

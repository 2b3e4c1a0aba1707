//! Aliases for buffers that hold secret material.
use zeroize::Zeroizing;

/// Secret byte buffer zeroed when dropped.
pub type SecretVec = Zeroizing<Vec<u8>>;

pub use secrecy::{ExposeSecret, SecretString};

pub fn secret_string(s: impl Into<String>) -> SecretString {
    SecretString::new(s.into())
}

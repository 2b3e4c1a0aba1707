// src/security/mod.rs
//! Secret buffer aliases and log redaction.

pub mod redaction;
pub mod secret;

pub use redaction::{redact_body, redact_hex_bytes};
pub use secret::{secret_string, ExposeSecret, SecretString, SecretVec};

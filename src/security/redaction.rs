// Helpers that keep secret material out of logs and Debug output.
use std::env;

fn dev_print_enabled() -> bool {
    env::var("KEYSTORE_DEV_PRINT_SECRETS").ok().as_deref() == Some("1")
}

/// Redact a text body unless KEYSTORE_DEV_PRINT_SECRETS=1 is set.
pub fn redact_body(s: &str) -> String {
    if dev_print_enabled() {
        return s.to_string();
    }
    format!("<redacted len={}>", s.len())
}

/// Redact hex-serializable bytes unless KEYSTORE_DEV_PRINT_SECRETS=1 is set.
pub fn redact_hex_bytes(bytes: &[u8]) -> String {
    if dev_print_enabled() {
        return format!("0x{}", hex::encode(bytes));
    }
    format!("<redacted hex len={}>", bytes.len())
}

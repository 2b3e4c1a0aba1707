//! Outbound notifications: state changes, action status, surfaced errors,
//! and secret reveals destined for the host UI.

use tokio::sync::{broadcast, mpsc};

use super::action_guard::{Action, ActionStatus};
use super::types::{KeyType, RevealedSeed};
use crate::core::errors::{ErrorLevel, KeystoreError};
use crate::security::SecretString;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotification {
    pub level: ErrorLevel,
    pub code: &'static str,
    pub message: String,
    pub error: KeystoreError,
}

impl ErrorNotification {
    pub fn from_error(error: &KeystoreError) -> Self {
        Self {
            level: error.level(),
            code: error.code(),
            message: error.user_message().to_string(),
            error: error.clone(),
        }
    }

    /// Wraps an error with a caller-chosen message and level.
    pub fn with_message(error: &KeystoreError, level: ErrorLevel, message: impl Into<String>) -> Self {
        Self { level, code: error.code(), message: message.into(), error: error.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeystoreEvent {
    /// Observable state changed; re-read the getters.
    Updated,
    StatusChanged { action: Action, status: ActionStatus },
    Error(ErrorNotification),
}

/// Secret material pushed to a UI that asked to reveal it.
#[derive(Debug)]
pub enum UiMessage {
    PrivateKey { addr: String, key_type: KeyType, private_key: SecretString },
    Seed { id: String, seed: RevealedSeed },
}

pub type UiNotifier = mpsc::UnboundedSender<UiMessage>;

pub(crate) fn channel() -> broadcast::Sender<KeystoreEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Lagging or absent subscribers never block the keystore.
pub(crate) fn emit(events: &broadcast::Sender<KeystoreEvent>, event: KeystoreEvent) {
    let _ = events.send(event);
}

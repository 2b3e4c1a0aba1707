//! Per-action status tracking with at-most-one-running enforcement.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::events::{emit, KeystoreEvent};
use crate::core::errors::{KeystoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    UnlockWithSecret,
    AddSecret,
    RemoveSecret,
    ChangeSecret,
    AddKeys,
    AddKeysExternallyStored,
    RemoveKey,
    UpdateKeyPreferences,
    AddSeed,
    UpdateSeed,
    DeleteSeed,
    AddTempSeed,
    PersistTempSeed,
    DeleteTempSeed,
    ImportKey,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::UnlockWithSecret => "unlockWithSecret",
            Action::AddSecret => "addSecret",
            Action::RemoveSecret => "removeSecret",
            Action::ChangeSecret => "changeSecret",
            Action::AddKeys => "addKeys",
            Action::AddKeysExternallyStored => "addKeysExternallyStored",
            Action::RemoveKey => "removeKey",
            Action::UpdateKeyPreferences => "updateKeyPreferences",
            Action::AddSeed => "addSeed",
            Action::UpdateSeed => "updateSeed",
            Action::DeleteSeed => "deleteSeed",
            Action::AddTempSeed => "addTempSeed",
            Action::PersistTempSeed => "persistTempSeed",
            Action::DeleteTempSeed => "deleteTempSeed",
            Action::ImportKey => "importKeyWithPublicKeyEncryption",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionStatus {
    #[default]
    Initial,
    Loading,
    Success,
    Error,
}

pub struct ActionGuard {
    statuses: Mutex<HashMap<Action, ActionStatus>>,
    events: broadcast::Sender<KeystoreEvent>,
}

impl ActionGuard {
    pub fn new(events: broadcast::Sender<KeystoreEvent>) -> Self {
        Self { statuses: Mutex::new(HashMap::new()), events }
    }

    pub fn status(&self, action: Action) -> ActionStatus {
        self.statuses.lock().get(&action).copied().unwrap_or_default()
    }

    /// Name of an action currently in `Loading`, if any.
    pub fn busy_action(&self) -> Option<Action> {
        self.statuses
            .lock()
            .iter()
            .find(|(_, status)| **status == ActionStatus::Loading)
            .map(|(action, _)| *action)
    }

    /// Runs `body` as `action`. Unless `allow_concurrent` is set, a call made
    /// while any action is `Loading` is rejected without polling `body`.
    pub async fn run<T, F>(&self, action: Action, allow_concurrent: bool, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut ticket = self.admit(action, allow_concurrent)?;
        let result = body.await;
        ticket.finish(result.is_ok());
        result
    }

    fn admit(&self, action: Action, allow_concurrent: bool) -> Result<Ticket<'_>> {
        {
            let mut statuses = self.statuses.lock();
            let running = statuses
                .iter()
                .find(|(a, status)| **status == ActionStatus::Loading && (!allow_concurrent || **a == action))
                .map(|(a, _)| *a);
            if let Some(running) = running {
                debug!(requested = %action, running = %running, "action rejected");
                return Err(KeystoreError::ActionInProgress(running.to_string()));
            }
            statuses.insert(action, ActionStatus::Loading);
        }
        self.publish(action, ActionStatus::Loading);
        Ok(Ticket { guard: self, action, finished: false })
    }

    fn set(&self, action: Action, status: ActionStatus) {
        self.statuses.lock().insert(action, status);
        self.publish(action, status);
    }

    fn publish(&self, action: Action, status: ActionStatus) {
        emit(&self.events, KeystoreEvent::StatusChanged { action, status });
    }
}

/// Returns the action to `Initial` even if the running future is dropped.
struct Ticket<'a> {
    guard: &'a ActionGuard,
    action: Action,
    finished: bool,
}

impl Ticket<'_> {
    fn finish(&mut self, ok: bool) {
        self.guard.set(self.action, if ok { ActionStatus::Success } else { ActionStatus::Error });
        self.guard.set(self.action, ActionStatus::Initial);
        self.finished = true;
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.guard.set(self.action, ActionStatus::Initial);
        }
    }
}

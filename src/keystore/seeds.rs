//! Recovery phrases: the saved seed list and the single in-memory temp seed
//! offered during an import flow.

use bip39::Mnemonic;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::events::UiMessage;
use super::types::{MasterKey, RevealedSeed, SeedInfo, SeedInput, SeedUpdate, StoredSeed, TempSeed};
use super::{Action, Keystore};
use crate::core::errors::{KeystoreError, Result};
use crate::security::{ExposeSecret, SecretString};
use crate::storage::STORED_SEEDS_KEY;

/// Canonical form of a BIP-39 phrase: lowercase words joined by single spaces.
fn normalize_mnemonic(phrase: &str) -> Result<Zeroizing<String>> {
    let lowered = Zeroizing::new(phrase.trim().to_lowercase());
    let mnemonic = Mnemonic::parse_normalized(&lowered).map_err(|_| KeystoreError::InvalidSeedPhrase)?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

fn non_empty(secret: Option<&SecretString>) -> Option<&str> {
    secret.map(|s| s.expose_secret().as_str()).filter(|s| !s.is_empty())
}

fn decrypt_text(master: &MasterKey, ciphertext_hex: &str) -> Result<SecretString> {
    let plaintext = master.decrypt(&hex::decode(ciphertext_hex)?)?;
    let text = String::from_utf8(plaintext.to_vec())
        .map_err(|_| KeystoreError::Crypto("stored seed is not valid text".to_string()))?;
    Ok(SecretString::new(text))
}

impl Keystore {
    /// Saves a seed phrase. Saving the same phrase and passphrase again
    /// returns the existing entry.
    pub async fn add_seed(&self, input: SeedInput) -> Result<SeedInfo> {
        self.guarded(Action::AddSeed, self.store_seed(input)).await
    }

    async fn store_seed(&self, input: SeedInput) -> Result<SeedInfo> {
        let master = self.master_key_copy()?;
        let phrase = normalize_mnemonic(input.seed.expose_secret())?;
        let seed = hex::encode(master.encrypt(phrase.as_bytes())?);
        let seed_passphrase = match non_empty(input.passphrase.as_ref()) {
            Some(p) => Some(hex::encode(master.encrypt(p.as_bytes())?)),
            None => None,
        };

        let existing = self.state.read().seeds.clone();
        if let Some(dup) = existing.iter().find(|s| s.seed == seed && s.seed_passphrase == seed_passphrase) {
            debug!(seed_id = %dup.id, "seed already saved");
            return Ok(dup.to_info());
        }

        let stored = StoredSeed {
            id: Uuid::new_v4().to_string(),
            label: input.label.unwrap_or_else(|| format!("Recovery Phrase {}", existing.len() + 1)),
            seed,
            seed_passphrase,
            hd_path_template: input.hd_path_template,
        };
        let info = stored.to_info();
        let mut seeds = existing;
        seeds.push(stored);
        self.persist(STORED_SEEDS_KEY, &seeds).await?;
        self.state.write().seeds = seeds;
        info!(seed_id = %info.id, "seed saved");
        Ok(info)
    }

    pub async fn update_seed(&self, id: &str, update: SeedUpdate) -> Result<SeedInfo> {
        self.guarded(Action::UpdateSeed, async move {
            let mut seeds = self.state.read().seeds.clone();
            let seed = seeds
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| KeystoreError::NotFound(format!("seed {}", id)))?;
            if let Some(label) = update.label {
                seed.label = label;
            }
            if let Some(template) = update.hd_path_template {
                seed.hd_path_template = template;
            }
            let info = seed.to_info();
            self.persist(STORED_SEEDS_KEY, &seeds).await?;
            self.state.write().seeds = seeds;
            Ok(info)
        })
        .await
    }

    pub async fn delete_seed(&self, id: &str) -> Result<()> {
        self.guarded(Action::DeleteSeed, async move {
            let seeds: Vec<StoredSeed> = {
                let state = self.state.read();
                if !state.seeds.iter().any(|s| s.id == id) {
                    return Err(KeystoreError::NotFound(format!("seed {}", id)));
                }
                state.seeds.iter().filter(|s| s.id != id).cloned().collect()
            };
            self.persist(STORED_SEEDS_KEY, &seeds).await?;
            self.state.write().seeds = seeds;
            info!(seed_id = %id, "seed deleted");
            Ok(())
        })
        .await
    }

    /// Decrypts a saved seed. Requires the store to be unlocked.
    pub async fn get_saved_seed(&self, id: &str) -> Result<RevealedSeed> {
        self.reported(async move { self.reveal_seed(id) }).await
    }

    fn reveal_seed(&self, id: &str) -> Result<RevealedSeed> {
        let stored = self
            .state
            .read()
            .seeds
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| KeystoreError::NotFound(format!("seed {}", id)))?;
        let master = self.master_key_copy()?;
        Ok(RevealedSeed {
            seed: decrypt_text(&master, &stored.seed)?,
            passphrase: stored
                .seed_passphrase
                .as_deref()
                .map(|p| decrypt_text(&master, p))
                .transpose()?,
            hd_path_template: stored.hd_path_template,
        })
    }

    pub async fn send_seed_to_ui(&self, id: &str) -> Result<()> {
        self.reported(async move {
            let ui = self
                .ui
                .as_ref()
                .ok_or_else(|| KeystoreError::InvalidInput("no ui notifier attached".to_string()))?;
            let seed = self.reveal_seed(id)?;
            ui.send(UiMessage::Seed { id: id.to_string(), seed })
                .map_err(|_| KeystoreError::InvalidInput("ui notifier closed".to_string()))
        })
        .await
    }

    /// Holds a validated seed in memory until it is persisted, deleted, or the store locks.
    pub async fn add_temp_seed(&self, input: SeedInput) -> Result<()> {
        self.run_action(Action::AddTempSeed, true, async move {
            let phrase = normalize_mnemonic(input.seed.expose_secret())?;
            let passphrase = non_empty(input.passphrase.as_ref()).map(|p| SecretString::new(p.to_string()));
            *self.temp_seed.lock() = Some(TempSeed {
                seed: SecretString::new(phrase.to_string()),
                passphrase,
                hd_path_template: input.hd_path_template,
            });
            debug!("temp seed set");
            Ok(())
        })
        .await
    }

    pub async fn persist_temp_seed(&self) -> Result<SeedInfo> {
        self.guarded(Action::PersistTempSeed, async move {
            let input = {
                let temp = self.temp_seed.lock();
                let temp = temp.as_ref().ok_or_else(|| KeystoreError::NotFound("temp seed".to_string()))?;
                SeedInput {
                    seed: SecretString::new(temp.seed.expose_secret().clone()),
                    passphrase: temp.passphrase.as_ref().map(|p| SecretString::new(p.expose_secret().clone())),
                    hd_path_template: temp.hd_path_template,
                    label: None,
                }
            };
            let info = self.store_seed(input).await?;
            *self.temp_seed.lock() = None;
            Ok(info)
        })
        .await
    }

    pub async fn delete_temp_seed(&self) -> Result<()> {
        self.run_action(Action::DeleteTempSeed, true, async move {
            *self.temp_seed.lock() = None;
            Ok(())
        })
        .await
    }
}

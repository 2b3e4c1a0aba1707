//! Secret envelopes: adding, removing, unlocking with, and rotating the user
//! secrets that each wrap the same master key.

use tracing::{info, warn};
use zeroize::Zeroizing;

use super::types::{AddSecretOptions, CipherEnvelope, MasterKey, SecretEnvelope};
use super::{Action, Keystore};
use crate::core::errors::{KeystoreError, Result};
use crate::crypto::cipher::{aes_128_ctr, keystore_mac, mac_matches, CIPHER_AES_128_CTR, IV_LENGTH};
use crate::crypto::kdf::{derive_off_thread, KdfParams, SALT_LENGTH};
use crate::storage::{to_record, SECRETS_KEY, STORE_UID_KEY};

pub(crate) const PASSWORD_SECRET_ID: &str = "password";

impl Keystore {
    /// Adds an envelope for `id`. The first secret of an empty store creates
    /// the master key; any other addition requires the store to be unlocked.
    pub async fn add_secret(&self, id: &str, secret: &str, options: AddSecretOptions) -> Result<()> {
        self.guarded(Action::AddSecret, self.add_secret_inner(id, secret, options)).await
    }

    async fn add_secret_inner(&self, id: &str, secret: &str, options: AddSecretOptions) -> Result<()> {
        let (exists, is_first) = {
            let state = self.state.read();
            let vault_empty = state.keys.is_empty() && state.seeds.is_empty();
            (state.secrets.iter().any(|s| s.id == id), state.secrets.is_empty() && vault_empty)
        };
        if exists {
            return Err(KeystoreError::DuplicateSecret(id.to_string()));
        }

        let resident = self.master_key_copy().ok();
        let was_resident = resident.is_some();
        let master = match resident {
            Some(key) => key,
            None if is_first => MasterKey::generate(self.entropy.as_ref(), &options.extra_entropy)?,
            None => return Err(KeystoreError::MasterKeyRequired),
        };

        let envelope = self.seal_envelope(id, secret, &master).await?;

        let (secrets, new_uid) = {
            let state = self.state.read();
            let mut secrets = state.secrets.clone();
            secrets.push(envelope);
            let uid = match state.store_uid {
                Some(_) if was_resident => None,
                _ => Some(master.uid()),
            };
            (secrets, uid)
        };
        let mut records = vec![to_record(SECRETS_KEY, &secrets)?];
        if let Some(uid) = &new_uid {
            records.push(to_record(STORE_UID_KEY, uid)?);
        }
        self.storage.set_many(records).await?;
        {
            let mut state = self.state.write();
            state.secrets = secrets;
            if new_uid.is_some() {
                state.store_uid = new_uid;
            }
        }
        info!(secret_id = %id, first = is_first, "secret added");

        if !was_resident && options.leave_unlocked {
            self.install_master_key(master.duplicate());
        }

        let pending = self.gate.lock().mark_ready();
        if let Some(pending) = pending.filter(|p| !p.is_empty()) {
            self.flush_pending(&master, pending).await;
        }
        Ok(())
    }

    /// Derives the wrapping keys for `secret` and encrypts `master` under them.
    async fn seal_envelope(&self, id: &str, secret: &str, master: &MasterKey) -> Result<SecretEnvelope> {
        let salt = self.entropy.random_bytes(SALT_LENGTH, &[]);
        let iv = self.entropy.random_bytes(IV_LENGTH, &[]);
        let params = self.config.kdf;

        let derived = derive_off_thread(
            self.kdf.clone(),
            Zeroizing::new(secret.as_bytes().to_vec()),
            salt.to_vec(),
            params,
        )
        .await?;
        let ciphertext = aes_128_ctr(derived.aes_key(), &iv, &master.to_bytes())?;
        let mac = keystore_mac(derived.mac_key(), &ciphertext);

        Ok(SecretEnvelope {
            id: id.to_string(),
            kdf_params: KdfParams::new(&salt, &params),
            cipher: CipherEnvelope {
                cipher_type: CIPHER_AES_128_CTR.to_string(),
                iv: hex::encode(&iv[..]),
                ciphertext: hex::encode(ciphertext),
                mac: hex::encode(mac),
            },
        })
    }

    /// The last envelope cannot be removed while keys or seeds depend on it.
    pub async fn remove_secret(&self, id: &str) -> Result<()> {
        self.guarded(Action::RemoveSecret, async move {
            let secrets: Vec<SecretEnvelope> = {
                let state = self.state.read();
                if !state.secrets.iter().any(|s| s.id == id) {
                    return Err(KeystoreError::NotFound(format!("secret {}", id)));
                }
                if state.secrets.len() == 1 && !(state.keys.is_empty() && state.seeds.is_empty()) {
                    return Err(KeystoreError::InvalidInput(
                        "the last secret cannot be removed while keys or seeds are stored".to_string(),
                    ));
                }
                state.secrets.iter().filter(|s| s.id != id).cloned().collect()
            };
            self.persist(SECRETS_KEY, &secrets).await?;
            self.state.write().secrets = secrets;
            info!(secret_id = %id, "secret removed");
            Ok(())
        })
        .await
    }

    pub async fn unlock_with_secret(&self, id: &str, secret: &str) -> Result<()> {
        self.guarded(Action::UnlockWithSecret, self.unlock_inner(id, secret)).await
    }

    async fn unlock_inner(&self, id: &str, secret: &str) -> Result<()> {
        let envelope = {
            let state = self.state.read();
            if state.secrets.is_empty() {
                return Err(KeystoreError::NotConfigured);
            }
            state
                .secrets
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or_else(|| KeystoreError::NotFound(format!("secret {}", id)))?
        };
        if envelope.cipher.cipher_type != CIPHER_AES_128_CTR {
            return Err(KeystoreError::UnsupportedCipher(envelope.cipher.cipher_type));
        }

        let derived = derive_off_thread(
            self.kdf.clone(),
            Zeroizing::new(secret.as_bytes().to_vec()),
            envelope.kdf_params.salt_bytes()?,
            envelope.kdf_params.to_config(),
        )
        .await?;

        // unreadable ciphertext or mac counts as tampering
        let ciphertext = hex::decode(&envelope.cipher.ciphertext).map_err(|_| KeystoreError::WrongSecret);
        let stored_mac = hex::decode(&envelope.cipher.mac).map_err(|_| KeystoreError::WrongSecret);
        let verified = match (ciphertext, stored_mac) {
            (Ok(ct), Ok(mac)) if mac_matches(&mac, &keystore_mac(derived.mac_key(), &ct)) => Some(ct),
            _ => None,
        };
        let Some(ciphertext) = verified else {
            warn!(secret_id = %id, "unlock rejected");
            *self.error_message.lock() = Some(KeystoreError::WrongSecret.user_message().to_string());
            return Err(KeystoreError::WrongSecret);
        };

        let iv = hex::decode(&envelope.cipher.iv)?;
        let plaintext = Zeroizing::new(aes_128_ctr(derived.aes_key(), &iv, &ciphertext)?);
        let master = MasterKey::from_bytes(&plaintext)?;
        self.install_master_key(master);
        *self.error_message.lock() = None;
        info!(secret_id = %id, "keystore unlocked");
        Ok(())
    }

    /// Re-wraps the master key for `id` under `new_secret`. Keys and seeds are untouched.
    pub async fn change_secret(&self, id: &str, new_secret: &str, old_secret: Option<&str>) -> Result<()> {
        self.guarded(Action::ChangeSecret, async move {
            if let Some(old) = old_secret {
                self.unlock_inner(id, old).await?;
            }
            let master = self.master_key_copy()?;
            if !self.state.read().secrets.iter().any(|s| s.id == id) {
                return Err(KeystoreError::NotFound(format!("secret {}", id)));
            }

            let envelope = self.seal_envelope(id, new_secret, &master).await?;
            let secrets: Vec<SecretEnvelope> = {
                let state = self.state.read();
                let mut secrets: Vec<_> = state.secrets.iter().filter(|s| s.id != id).cloned().collect();
                secrets.push(envelope);
                secrets
            };
            self.persist(SECRETS_KEY, &secrets).await?;
            self.state.write().secrets = secrets;
            info!(secret_id = %id, "secret changed");
            Ok(())
        })
        .await
    }

    pub async fn change_password(&self, new_password: &str, old_password: Option<&str>) -> Result<()> {
        self.change_secret(PASSWORD_SECRET_ID, new_password, old_password).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::types::InternalKeyInput;
    use super::*;
    use crate::signer::KeySigner;
    use crate::storage::STORED_KEYS_KEY;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_first_secret_creates_uid_and_envelope() {
        let (ks, storage) = store();
        ks.add_secret("password", "hunter2", AddSecretOptions::default()).await.unwrap();

        assert!(!ks.is_unlocked());
        assert!(ks.has_password_secret());
        assert!(ks.is_ready_to_store_keys());
        let uid = ks.store_uid().unwrap();

        let dump = storage.dump().await;
        assert_eq!(dump[STORE_UID_KEY], serde_json::json!(uid));
        let envelope = &dump[SECRETS_KEY][0];
        assert_eq!(envelope["id"], "password");
        assert_eq!(envelope["aesEncrypted"]["cipherType"], "aes-128-ctr");
        assert_eq!(envelope["scryptParams"]["N"], 1024);
        assert_eq!(envelope["scryptParams"]["dkLen"], 64);
    }

    #[tokio::test]
    async fn test_duplicate_secret_rejected() {
        let (ks, _) = unlocked_store().await;
        let err = ks.add_secret("password", "other", AddSecretOptions::default()).await.unwrap_err();
        assert_eq!(err, KeystoreError::DuplicateSecret("password".into()));
    }

    #[tokio::test]
    async fn test_second_secret_requires_unlock() {
        let (ks, _) = unlocked_store().await;
        ks.lock();
        let err = ks.add_secret("recovery", "r", AddSecretOptions::default()).await.unwrap_err();
        assert_eq!(err, KeystoreError::MasterKeyRequired);
    }

    #[tokio::test]
    async fn test_unlock_errors() {
        let (ks, _) = store();
        assert_eq!(ks.unlock_with_secret("password", "x").await, Err(KeystoreError::NotConfigured));

        ks.add_secret("password", "hunter2", AddSecretOptions::default()).await.unwrap();
        assert!(matches!(
            ks.unlock_with_secret("recovery", "x").await,
            Err(KeystoreError::NotFound(_))
        ));
        assert_eq!(ks.unlock_with_secret("password", "wrong").await, Err(KeystoreError::WrongSecret));
        assert!(!ks.is_unlocked());
    }

    #[tokio::test]
    async fn test_unsupported_cipher_rejected() {
        let (ks, storage) = unlocked_store().await;
        let mut secrets = storage.dump().await[SECRETS_KEY].clone();
        secrets[0]["aesEncrypted"]["cipherType"] = serde_json::json!("aes-256-cbc");
        crate::storage::Storage::set(&storage, SECRETS_KEY, secrets).await.unwrap();

        let reopened = Keystore::new(std::sync::Arc::new(storage), ks.config().clone());
        let err = reopened.unlock_with_secret("password", "hunter2").await.unwrap_err();
        assert_eq!(err, KeystoreError::UnsupportedCipher("aes-256-cbc".into()));
    }

    #[tokio::test]
    async fn test_remove_secret_keeps_other_envelopes_working() {
        let (ks, _) = unlocked_store().await;
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();
        ks.add_secret("recovery", "backup", AddSecretOptions::default()).await.unwrap();
        ks.remove_secret("password").await.unwrap();
        assert!(!ks.has_password_secret());
        assert!(matches!(ks.remove_secret("password").await, Err(KeystoreError::NotFound(_))));

        ks.lock();
        ks.unlock_with_secret("recovery", "backup").await.unwrap();
        let signer = ks.get_signer(DEV_ADDR, super::super::types::KeyType::Internal).await.unwrap();
        assert_eq!(signer.address(), DEV_ADDR);
    }

    #[tokio::test]
    async fn test_last_secret_kept_while_keys_stored() {
        let (ks, _) = unlocked_store().await;
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();

        let err = ks.remove_secret("password").await.unwrap_err();
        assert!(matches!(err, KeystoreError::InvalidInput(_)));
        assert_eq!(ks.secret_ids(), vec!["password".to_string()]);

        ks.lock();
        ks.unlock_with_secret("password", "hunter2").await.unwrap();
        let signer = ks.get_signer(DEV_ADDR, super::super::types::KeyType::Internal).await.unwrap();
        assert_eq!(signer.address(), DEV_ADDR);
    }

    #[tokio::test]
    async fn test_secret_added_after_removal_reuses_resident_key() {
        let (ks, _) = unlocked_store().await;
        let uid = ks.store_uid();
        ks.remove_secret("password").await.unwrap();
        assert!(ks.secret_ids().is_empty());

        ks.add_secret("password", "second", AddSecretOptions::default()).await.unwrap();
        assert_eq!(ks.store_uid(), uid);
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();
        ks.lock();
        ks.unlock_with_secret("password", "second").await.unwrap();
        assert!(ks.get_signer(DEV_ADDR, super::super::types::KeyType::Internal).await.is_ok());
    }

    #[tokio::test]
    async fn test_fresh_master_key_after_locked_removal_gets_new_uid() {
        let (ks, _) = unlocked_store().await;
        let uid = ks.store_uid();
        ks.remove_secret("password").await.unwrap();
        ks.lock();

        ks.add_secret("password", "fresh", AddSecretOptions::unlocked()).await.unwrap();
        assert!(ks.store_uid().is_some());
        assert_ne!(ks.store_uid(), uid);
    }

    #[tokio::test]
    async fn test_change_secret_keeps_master_key() {
        let (ks, storage) = unlocked_store().await;
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();
        let keys_before = storage.dump().await[STORED_KEYS_KEY].clone();
        ks.lock();

        ks.change_password("correct horse", Some("hunter2")).await.unwrap();
        ks.lock();
        assert_eq!(ks.unlock_with_secret("password", "hunter2").await, Err(KeystoreError::WrongSecret));
        ks.unlock_with_secret("password", "correct horse").await.unwrap();
        assert_eq!(storage.dump().await[STORED_KEYS_KEY], keys_before);
    }

    #[tokio::test]
    async fn test_change_secret_requires_unlock() {
        let (ks, _) = unlocked_store().await;
        ks.lock();
        assert_eq!(
            ks.change_secret("password", "new", None).await,
            Err(KeystoreError::MasterKeyRequired)
        );
        assert_eq!(
            ks.change_secret("password", "new", Some("bad")).await,
            Err(KeystoreError::WrongSecret)
        );
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_state_unchanged() {
        let (ks, storage) = unlocked_store().await;
        storage.fail_writes(true);
        let err = ks.add_secret("recovery", "r", AddSecretOptions::default()).await.unwrap_err();
        assert!(matches!(err, KeystoreError::StorageFailure(_)));
        assert_eq!(ks.secret_ids(), vec!["password".to_string()]);
    }
}

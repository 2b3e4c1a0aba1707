use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::config::KeystoreConfig;
use crate::core::errors::{KeystoreError, Result};
use crate::keystore::{AddSecretOptions, HdPathTemplate, InternalKeyInput, KeyType, Keystore, SeedInput};
use crate::security::secret_string;

/// Keystore CLI (library-facing definitions)
#[derive(Debug, Parser)]
#[command(name = "keystore-cli", about = "Encrypted wallet keystore", version, disable_help_subcommand = true)]
pub struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides `storage.database_url`
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the store with its first password
    Init {
        #[arg(long, env = "KEYSTORE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Check a password against the store
    Unlock {
        #[arg(long, env = "KEYSTORE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    AddKey {
        #[arg(long, env = "KEYSTORE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, env = "KEYSTORE_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,
        #[arg(long)]
        label: Option<String>,
    },
    ListKeys,
    RemoveKey {
        #[arg(long)]
        address: String,
        #[arg(long, default_value = "internal")]
        key_type: KeyType,
        /// Needed for internal keys
        #[arg(long, env = "KEYSTORE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Write a key as password-protected JSON
    ExportKey {
        #[arg(long, env = "KEYSTORE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        address: String,
        #[arg(long, env = "KEYSTORE_EXPORT_PASSCODE", hide_env_values = true)]
        passcode: String,
        /// Prints to stdout when absent
        #[arg(long)]
        output: Option<PathBuf>,
    },
    AddSeed {
        #[arg(long, env = "KEYSTORE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, env = "KEYSTORE_SEED_PHRASE", hide_env_values = true)]
        phrase: String,
        #[arg(long)]
        passphrase: Option<String>,
        #[arg(long, default_value = "m/44'/60'/0'/0/<account>")]
        hd_path: HdPathTemplate,
        #[arg(long)]
        label: Option<String>,
    },
    ListSeeds,
}

impl Cli {
    /// Defaults, then the config file, then env overrides, then `--database-url`.
    pub fn load_config(&self) -> Result<KeystoreConfig> {
        let config = match &self.config {
            Some(path) => KeystoreConfig::from_file(path)?,
            None => KeystoreConfig::default(),
        };
        let mut config = config.apply_env_overrides()?;
        if let Some(url) = &self.database_url {
            config.storage.database_url = url.clone();
        }
        Ok(config)
    }
}

const PASSWORD_ID: &str = "password";

/// Executes one command and returns what should be printed.
pub async fn run(command: Commands, keystore: &Keystore) -> Result<String> {
    keystore.load().await;
    match command {
        Commands::Init { password } => {
            keystore.add_secret(PASSWORD_ID, &password, AddSecretOptions::default()).await?;
            Ok(format!("keystore initialized, uid {}", keystore.store_uid().unwrap_or_default()))
        }
        Commands::Unlock { password } => {
            keystore.unlock_with_secret(PASSWORD_ID, &password).await?;
            Ok("password ok".to_string())
        }
        Commands::AddKey { password, private_key, label } => {
            keystore.unlock_with_secret(PASSWORD_ID, &password).await?;
            let mut input = InternalKeyInput::new(private_key);
            input.label = label;
            let added = keystore.add_keys(vec![input]).await?;
            Ok(match added.first() {
                Some(key) => format!("added {}", key.addr),
                None => "key already stored".to_string(),
            })
        }
        Commands::ListKeys => Ok(keystore
            .keys()
            .iter()
            .map(|k| format!("{}\t{}\t{}", k.addr, k.key_type, k.label))
            .collect::<Vec<_>>()
            .join("\n")),
        Commands::RemoveKey { address, key_type, password } => {
            if let Some(password) = password {
                keystore.unlock_with_secret(PASSWORD_ID, &password).await?;
            }
            keystore.remove_key(&address, key_type).await?;
            Ok(format!("removed {} {}", key_type, address))
        }
        Commands::ExportKey { password, address, passcode, output } => {
            keystore.unlock_with_secret(PASSWORD_ID, &password).await?;
            let wallet = keystore.export_key_with_passcode(&address, KeyType::Internal, &passcode).await?;
            let json = serde_json::to_string_pretty(&wallet)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await.map_err(|e| {
                        KeystoreError::InvalidInput(format!("cannot write {}: {}", path.display(), e))
                    })?;
                    Ok(format!("exported {} to {}", address, path.display()))
                }
                None => Ok(json),
            }
        }
        Commands::AddSeed { password, phrase, passphrase, hd_path, label } => {
            keystore.unlock_with_secret(PASSWORD_ID, &password).await?;
            let info = keystore
                .add_seed(SeedInput {
                    seed: secret_string(phrase),
                    passphrase: passphrase.map(secret_string),
                    hd_path_template: hd_path,
                    label,
                })
                .await?;
            Ok(format!("saved seed {} ({})", info.id, info.label))
        }
        Commands::ListSeeds => Ok(keystore
            .seeds()
            .iter()
            .map(|s| format!("{}\t{}\t{}", s.id, s.label, s.hd_path_template))
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

//! Web3 Secret Storage (version 3) JSON wallets, the password-protected format
//! other Ethereum wallets import.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::cipher::{aes_128_ctr, keystore_mac, mac_matches, CIPHER_AES_128_CTR};
use super::kdf::{DerivedKey, KeyDerivationAdapter};
use crate::core::config::ScryptConfig;
use crate::core::errors::{KeystoreError, Result};
use crate::security::SecretVec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWallet {
    pub version: u8,
    pub id: String,
    /// Lowercase hex address without `0x`
    pub address: String,
    pub crypto: JsonWalletCrypto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWalletCrypto {
    pub cipher: String,
    pub cipherparams: JsonCipherParams,
    pub ciphertext: String,
    pub kdf: String,
    pub kdfparams: JsonScryptParams,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonCipherParams {
    pub iv: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonScryptParams {
    pub dklen: usize,
    pub n: u32,
    pub p: u32,
    pub r: u32,
    pub salt: String,
}

pub fn encrypt_json_wallet(
    private_key: &[u8],
    address: &str,
    passcode: &str,
    params: &ScryptConfig,
    salt: &[u8],
    iv: &[u8],
    kdf: &dyn KeyDerivationAdapter,
) -> Result<JsonWallet> {
    let params = ScryptConfig { dk_len: 32, ..*params };
    let derived = DerivedKey::new(kdf.derive(passcode.as_bytes(), salt, &params)?)?;
    let ciphertext = aes_128_ctr(derived.aes_key(), iv, private_key)?;
    let mac = keystore_mac(derived.mac_key(), &ciphertext);

    Ok(JsonWallet {
        version: 3,
        id: Uuid::new_v4().to_string(),
        address: address.trim_start_matches("0x").to_lowercase(),
        crypto: JsonWalletCrypto {
            cipher: CIPHER_AES_128_CTR.to_string(),
            cipherparams: JsonCipherParams { iv: hex::encode(iv) },
            ciphertext: hex::encode(&ciphertext),
            kdf: "scrypt".to_string(),
            kdfparams: JsonScryptParams {
                dklen: params.dk_len,
                n: params.n,
                p: params.p,
                r: params.r,
                salt: hex::encode(salt),
            },
            mac: hex::encode(mac),
        },
    })
}

pub fn decrypt_json_wallet(
    wallet: &JsonWallet,
    passcode: &str,
    kdf: &dyn KeyDerivationAdapter,
) -> Result<SecretVec> {
    if wallet.version != 3 {
        return Err(KeystoreError::InvalidInput(format!(
            "unsupported json wallet version {}",
            wallet.version
        )));
    }
    let crypto = &wallet.crypto;
    if crypto.cipher != CIPHER_AES_128_CTR {
        return Err(KeystoreError::UnsupportedCipher(crypto.cipher.clone()));
    }
    if crypto.kdf != "scrypt" {
        return Err(KeystoreError::Kdf(format!("unsupported kdf {}", crypto.kdf)));
    }

    let kp = &crypto.kdfparams;
    let params = ScryptConfig { n: kp.n, r: kp.r, p: kp.p, dk_len: kp.dklen };
    let salt = hex::decode(&kp.salt)?;
    let iv = hex::decode(&crypto.cipherparams.iv)?;
    let ciphertext = hex::decode(&crypto.ciphertext)?;
    let expected_mac = hex::decode(&crypto.mac)?;

    let derived = DerivedKey::new(kdf.derive(passcode.as_bytes(), &salt, &params)?)?;
    let mac = keystore_mac(derived.mac_key(), &ciphertext);
    if !mac_matches(&expected_mac, &mac) {
        return Err(KeystoreError::WrongSecret);
    }
    Ok(Zeroizing::new(aes_128_ctr(derived.aes_key(), &iv, &ciphertext)?))
}

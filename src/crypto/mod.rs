pub mod cipher;
pub mod ecies;
pub mod entropy;
pub mod json_wallet;
pub mod kdf;

pub use self::entropy::{EntropyGenerator, EntropySource};
pub use self::json_wallet::{decrypt_json_wallet, JsonWallet};
pub use self::kdf::{KdfParams, KeyDerivationAdapter, ScryptKdf};

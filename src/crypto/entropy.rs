//! Process-wide random byte source.
//!
//! Output is OS randomness mixed with an accumulated pool that callers can feed
//! (e.g. pointer movement collected by a UI). The pool never makes the output
//! weaker than the OS generator alone.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

pub trait EntropySource: Send + Sync {
    fn random_bytes(&self, len: usize, extra_entropy: &[u8]) -> Zeroizing<Vec<u8>>;

    /// Absorbs caller-supplied bytes into the pool.
    fn add_entropy(&self, bytes: &[u8]);
}

static GLOBAL: Lazy<Arc<EntropyGenerator>> = Lazy::new(|| Arc::new(EntropyGenerator::new()));

pub struct EntropyGenerator {
    pool: Mutex<[u8; 32]>,
}

impl EntropyGenerator {
    pub fn new() -> Self {
        let mut pool = [0u8; 32];
        OsRng.fill_bytes(&mut pool);
        Self { pool: Mutex::new(pool) }
    }

    pub fn global() -> &'static EntropyGenerator {
        GLOBAL.as_ref()
    }

    /// Handle to the process-wide generator, the default for every store.
    pub fn shared() -> Arc<EntropyGenerator> {
        Arc::clone(&GLOBAL)
    }
}

impl Default for EntropyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for EntropyGenerator {
    fn random_bytes(&self, len: usize, extra_entropy: &[u8]) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(vec![0u8; len]);
        OsRng.fill_bytes(&mut out);

        let mut os_seed = [0u8; 32];
        OsRng.fill_bytes(&mut os_seed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut seed = {
            let mut pool = self.pool.lock();
            let mut hasher = Sha256::new();
            hasher.update(os_seed);
            hasher.update(*pool);
            hasher.update(extra_entropy);
            hasher.update(nanos.to_le_bytes());
            let seed: [u8; 32] = hasher.finalize().into();

            // ratchet so the next draw never reuses this state
            let mut ratchet = Sha256::new();
            ratchet.update(*pool);
            ratchet.update(seed);
            pool.copy_from_slice(&ratchet.finalize());
            seed
        };

        for (i, chunk) in out.chunks_mut(32).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update((i as u64).to_be_bytes());
            let block = hasher.finalize();
            for (b, k) in chunk.iter_mut().zip(block.iter()) {
                *b ^= k;
            }
        }

        seed.zeroize();
        os_seed.zeroize();
        out
    }

    fn add_entropy(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut pool = self.pool.lock();
        let mut hasher = Sha256::new();
        hasher.update(*pool);
        hasher.update(bytes);
        pool.copy_from_slice(&hasher.finalize());
    }
}

//! In-memory protection for credential material
//!
//! A [`ProtectedSecret`] never holds its plaintext at rest. The bytes are
//! XOR-masked with a SHA-256 keystream derived from a per-instance random
//! seed, and both buffers are zeroed on drop. Plaintext only exists inside
//! the closure passed to [`ProtectedSecret::expose`], in a buffer that is
//! zeroed again before `expose` returns.

use secrecy::zeroize::{Zeroize, Zeroizing};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use std::fmt;

pub struct ProtectedSecret {
    masked: Secret<Vec<u8>>,
    seed: Secret<[u8; 32]>,
}

impl ProtectedSecret {
    pub fn new(plain: impl Into<String>) -> Self {
        let mut plain = plain.into();
        let seed = fresh_seed();
        let mut masked = plain.as_bytes().to_vec();
        apply_keystream(&seed, &mut masked);
        plain.zeroize();

        Self {
            masked: Secret::new(masked),
            seed: Secret::new(seed),
        }
    }

    /// Run `f` with the plaintext. The temporary copy is wiped afterwards.
    pub fn expose<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        let plain = self.unmask();
        match std::str::from_utf8(&plain) {
            Ok(text) => f(text),
            // Construction only accepts `String`, so this arm is unreachable in practice.
            Err(_) => f(""),
        }
    }

    /// Run `f` with the raw plaintext bytes
    pub fn expose_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let plain = self.unmask();
        f(&plain)
    }

    pub fn len(&self) -> usize {
        self.masked.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unmask(&self) -> Zeroizing<Vec<u8>> {
        let mut plain = Zeroizing::new(self.masked.expose_secret().clone());
        apply_keystream(self.seed.expose_secret(), &mut plain);
        plain
    }
}

impl Clone for ProtectedSecret {
    fn clone(&self) -> Self {
        // Re-mask under a fresh seed so copies never share a keystream
        self.expose_bytes(|bytes| {
            let mut copy = bytes.to_vec();
            let seed = fresh_seed();
            apply_keystream(&seed, &mut copy);
            Self {
                masked: Secret::new(copy),
                seed: Secret::new(seed),
            }
        })
    }
}

impl fmt::Debug for ProtectedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProtectedSecret([REDACTED])")
    }
}

fn fresh_seed() -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(nanoid::nanoid!(32).as_bytes());
    hasher.update(crate::timing::nanos().to_le_bytes());
    hasher.finalize().into()
}

fn apply_keystream(seed: &[u8; 32], data: &mut [u8]) {
    for (block_index, chunk) in data.chunks_mut(32).enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update((block_index as u64).to_le_bytes());
        let mut block: [u8; 32] = hasher.finalize().into();
        for (byte, key) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= key;
        }
        block.zeroize();
    }
}

use sha2::{Digest, Sha256};

/// Builds the stable 64-bit identity of a monitored item from its immutable
/// configuration fields.
///
/// Every field is length-prefixed, so `("ab", "c")` and `("a", "bc")` hash
/// differently.
#[derive(Debug, Clone, Default)]
pub struct IdentityHasher {
    digest: Sha256,
}

impl IdentityHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, value: impl AsRef<[u8]>) -> Self {
        let value = value.as_ref();
        self.digest.update((value.len() as u64).to_le_bytes());
        self.digest.update(value);
        self
    }

    pub fn finish(self) -> u64 {
        let hash = self.digest.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash[..8]);
        u64::from_le_bytes(bytes)
    }
}

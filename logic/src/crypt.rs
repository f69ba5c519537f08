//! Boundary to the application's cryptography.
//!
//! The DHT moves opaque byte strings; sealing and unsealing them is the
//! application's business. This trait is the only shape the core assumes
//! of it, so message-box style applications can plug their primitives in
//! without the routing layer knowing.

/// Ciphertext plus the symmetric key wrapped for each side of the
/// exchange, so either party can later unwrap and decrypt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedMessage {
    pub ciphertext: Vec<u8>,
    pub wrap_sender: Vec<u8>,
    pub wrap_receiver: Vec<u8>,
}

/// Asymmetric wrapping primitive implemented by the application layer.
pub trait KeyWrapping: Send + Sync {
    /// The local public key, as advertised to remote peers.
    fn public_key(&self) -> Vec<u8>;

    /// Encrypt `plaintext` under a fresh symmetric key and wrap that key
    /// for both the local keypair and `remote_public_key`.
    fn encrypt_with_wrapping(&self, plaintext: &[u8], remote_public_key: &[u8]) -> SealedMessage;

    /// Recover the plaintext using whichever wrap matches the local
    /// keypair. `None` when the wrap is not ours or the data is mangled.
    fn decrypt_with_wrapping(&self, ciphertext: &[u8], wrap: &[u8]) -> Option<Vec<u8>>;
}

//! Sign committee messages and seal endpoint records for a single recipient.
//!
//! # Overview
//!
//! Committee members are identified by a secp256r1 [PublicKey]. The [Address] of a member (its
//! "coinbase") is derived from that key, so holding the key is enough to check that a claimed
//! address is genuine.
//!
//! Keys and signatures are the commonware secp256r1 types, extended by [PublicKeyExt]. Two
//! primitives are used on top of them:
//! - Namespaced signatures ([Signer::sign], [Verifier::verify]) used for votes and hand-off
//!   messages.
//! - Per-recipient hybrid encryption ([seal], [open]) used to hand a member's network endpoint to
//!   each member of the next committee without revealing it to anyone else.
//!
//! # Example
//!
//! ```rust
//! use fastchain_crypto::{open, seal, PrivateKey, PrivateKeyExt, Signer, Verifier};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let alice = PrivateKey::from_rng(&mut rng);
//! let bob = PrivateKey::from_rng(&mut rng);
//!
//! // Sign a message
//! let namespace = Some(&b"demo"[..]);
//! let signature = alice.sign(namespace, b"hello");
//! assert!(alice.public_key().verify(namespace, b"hello", &signature));
//!
//! // Seal a message for bob
//! let sealed = seal(&mut rng, &bob.public_key(), b"demo", b"endpoint").unwrap();
//! assert_eq!(open(&bob, b"demo", &sealed).unwrap(), b"endpoint");
//! assert!(open(&alice, b"demo", &sealed).is_err());
//! ```

use thiserror::Error;

mod address;
pub use address::{Address, ADDRESS_LENGTH};
mod seal;
pub use seal::{open, seal, SEAL_OVERHEAD};
pub mod secp256r1;
pub use commonware_cryptography::{PrivateKeyExt, Signer, Verifier};
pub use secp256r1::{
    public_key, read_public_key, PrivateKey, PublicKey, PublicKeyExt, Signature, PUBLIC_KEY_LENGTH,
};

/// Errors that can occur when handling keys, signatures, or sealed payloads.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid length: expected {0}, found {1}")]
    InvalidLength(usize, usize),
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed")]
    Decryption,
}

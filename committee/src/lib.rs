//! Describe fast-chain committees, their transitions, and the votes they cast.
//!
//! # Overview
//!
//! Fast blocks are attested by a rotating committee of validators that is elected on the
//! proof-of-work anchor chain. This crate contains the data model those committees operate over:
//!
//! - [CommitteeInfo]: who is in committee `N` (and in what order) and from which height it is
//!   authoritative. [validate] checks a snapshot before it is installed.
//! - [SwitchInfos]: the members appended to or removed from a running committee.
//!   [switch::apply_delta] computes the next membership deterministically.
//! - [EncryptNodeMessage]: the signed bundle carrying a member's network endpoint, sealed once per
//!   member of the incoming committee ([handoff]).
//! - [PbftSign]: a single vote on a fast block ([attestation]).
//!
//! # Canonical Hashing
//!
//! Every structure is encoded with [commonware_codec] (fields in declaration order, integers as
//! varints, sequences length-prefixed) and hashed with SHA-256. Structures that carry a signature
//! also expose the digest of the unsigned fields, which is the exact pre-image that gets signed.

use commonware_codec::Encode;
use commonware_cryptography::{sha256::Digest, Hasher, Sha256};
use fastchain_crypto::{Address, PublicKey};
use thiserror::Error;

pub mod attestation;
pub use attestation::{PbftSign, VoteResult};
pub mod genesis;
pub mod handoff;
pub use handoff::{EncryptNodeMessage, EncryptedNode};
mod member;
pub use member::{validate, CommitteeInfo, CommitteeMember, MemberFlag};
mod node;
pub use node::CommitteeNode;
pub mod switch;
pub use switch::{SwitchEnter, SwitchFlag, SwitchInfos};

/// Errors that can occur when interacting with committee structures.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    // Validation Errors
    /// The member's key is not compressed or its coinbase is not derived from the key
    #[error("invalid member: {0}")]
    InvalidMember(Address),
    /// The coinbase appears more than once in the active members
    #[error("duplicate member: {0}")]
    DuplicateMember(Address),
    /// The committee id does not exceed the previously accepted id
    #[error("committee id {0} does not exceed accepted id {1}")]
    NonMonotonicId(u64, u64),
    /// A delta removes a key that is not a member
    #[error("unknown remove target: {0}")]
    UnknownRemoveTarget(PublicKey),
    /// A delta appends a key that is already a member
    #[error("duplicate append: {0}")]
    DuplicateAppend(PublicKey),
    /// A delta names the same key more than once
    #[error("duplicate switch key: {0}")]
    DuplicateSwitchKey(PublicKey),
    /// A delta targets a different committee
    #[error("delta for committee {1} applied to committee {0}")]
    CommitteeMismatch(u64, u64),
    /// The flag is not a known tag
    #[error("invalid flag: {0:#x}")]
    InvalidFlag(u8),
    /// The vote result is neither against nor agree
    #[error("invalid vote result: {0}")]
    InvalidResult(u32),

    // Signature Errors
    /// The signature does not verify against the expected key
    #[error("bad signature")]
    BadSignature,
    /// The message was created too long ago
    #[error("stale message: created at {0}, now {1}")]
    Stale(u64, u64),
    /// The message is dated further ahead than clocks can drift
    #[error("message from the future: created at {0}, now {1}")]
    Future(u64, u64),

    // Other Errors
    /// The genesis description could not be parsed
    #[error("invalid genesis: {0}")]
    Genesis(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] fastchain_crypto::Error),
}

/// Hash the canonical encoding of `value`.
pub fn hash<T: Encode>(value: &T) -> Digest {
    hash_bytes(&value.encode())
}

/// Hash an already encoded pre-image.
pub(crate) fn hash_bytes(encoded: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(encoded);
    hasher.finalize()
}

/// Returns a seed and the compact (`0x05`) encoding of its key, for a key whose compact form
/// names the same point.
#[cfg(test)]
pub(crate) fn compact_alias() -> (u64, PublicKey) {
    use commonware_codec::DecodeExt;
    use fastchain_crypto::{PrivateKey, PrivateKeyExt, PublicKeyExt, Signer};

    (0..32)
        .find_map(|seed| {
            let key = PrivateKey::from_seed(seed).public_key();
            let mut raw = key.to_vec();
            raw[0] = 0x05;
            PublicKey::decode(raw.as_slice())
                .ok()
                .filter(|alias| alias.address() == key.address())
                .map(|alias| (seed, alias))
        })
        .expect("no key with a compact alias")
}

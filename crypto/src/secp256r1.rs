//! Committee extensions over secp256r1 keys.
//!
//! Keys and signatures are the [commonware_cryptography::secp256r1] types. This module adds what
//! a committee needs on top of them: the [Address] a key controls, and strict parsing that only
//! admits the compressed SEC1 form (tag `0x02` or `0x03`). A point has exactly one compressed
//! encoding, so two keys that parse here are equal iff they name the same point.

use crate::{Address, Error};
use bytes::Buf;
use commonware_codec::{Error as CodecError, ReadExt};
use p256::{
    ecdsa::{SigningKey, VerifyingKey},
    AffinePoint, NonZeroScalar,
};

pub use commonware_cryptography::secp256r1::{PrivateKey, PublicKey, Signature};

const CURVE_NAME: &str = "secp256r1";

/// Length of an encoded [PublicKey] (`Y-Parity || X`).
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Length of an uncompressed public key (`0x04 || X || Y`).
pub const UNCOMPRESSED_PUBLIC_KEY_LENGTH: usize = 65;

/// SEC1 tags of a compressed point.
const COMPRESSED_TAGS: [u8; 2] = [0x02, 0x03];

/// Committee-specific operations on a [PublicKey].
pub trait PublicKeyExt {
    /// Returns the [Address] derived from this key.
    fn address(&self) -> Address;

    /// Returns the uncompressed SEC1 encoding of this key.
    fn to_uncompressed(&self) -> [u8; UNCOMPRESSED_PUBLIC_KEY_LENGTH];

    /// Returns true if the key is held in compressed SEC1 form.
    fn is_canonical(&self) -> bool;
}

impl PublicKeyExt for PublicKey {
    fn address(&self) -> Address {
        Address::from_public_key(self)
    }

    fn to_uncompressed(&self) -> [u8; UNCOMPRESSED_PUBLIC_KEY_LENGTH] {
        let point = verifying_key(self).to_encoded_point(false);
        let mut uncompressed = [0u8; UNCOMPRESSED_PUBLIC_KEY_LENGTH];
        uncompressed.copy_from_slice(point.as_bytes());
        uncompressed
    }

    fn is_canonical(&self) -> bool {
        COMPRESSED_TAGS.contains(&self[0])
    }
}

/// Parse a compressed [PublicKey], rejecting every other encoding of the point.
pub fn public_key(raw: &[u8]) -> Result<PublicKey, Error> {
    if raw.len() != PUBLIC_KEY_LENGTH {
        return Err(Error::InvalidLength(PUBLIC_KEY_LENGTH, raw.len()));
    }
    if !COMPRESSED_TAGS.contains(&raw[0]) {
        return Err(Error::InvalidPublicKey);
    }
    let key = VerifyingKey::from_sec1_bytes(raw).map_err(|_| Error::InvalidPublicKey)?;
    Ok(PublicKey::from(key))
}

/// Read a compressed [PublicKey] from `buf`.
///
/// Use this instead of `PublicKey::read` wherever a key is decoded from the wire.
pub fn read_public_key(buf: &mut impl Buf) -> Result<PublicKey, CodecError> {
    let raw = <[u8; PUBLIC_KEY_LENGTH]>::read(buf)?;
    public_key(&raw).map_err(|_| CodecError::Invalid(CURVE_NAME, "invalid public key"))
}

/// Rebuild the verifying key of a [PublicKey].
fn verifying_key(public_key: &PublicKey) -> VerifyingKey {
    // Every PublicKey is curve-checked on construction.
    VerifyingKey::from_sec1_bytes(public_key).expect("public key is a valid point")
}

/// Scalar used to perform a key agreement with `private_key`.
pub(crate) fn scalar(private_key: &PrivateKey) -> Result<NonZeroScalar, Error> {
    let key = SigningKey::from_slice(private_key).map_err(|_| Error::InvalidPrivateKey)?;
    Ok(*key.as_nonzero_scalar())
}

/// Point used to perform a key agreement with `public_key`.
pub(crate) fn point(public_key: &PublicKey) -> AffinePoint {
    *verifying_key(public_key).as_affine()
}

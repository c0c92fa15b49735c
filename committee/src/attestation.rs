//! Votes cast by committee members on fast blocks.
//!
//! A [PbftSign] is hashed two ways. [PbftSign::hash_with_no_sign] covers only the vote itself
//! (`fast_height`, `fast_hash`, `result`) and is the pre-image that gets signed, so it does not
//! change when the signature does. [PbftSign::hash] covers every field and identifies a signed
//! vote.

use crate::{hash, hash_bytes, Error};
use bytes::{Buf, BufMut};
use commonware_codec::{varint::UInt, EncodeSize, Error as CodecError, Read, ReadExt, Write};
use commonware_cryptography::sha256::Digest;
use commonware_utils::union;
use fastchain_crypto::{PrivateKey, PublicKey, Signature, Signer, Verifier};
use std::fmt::Display;

/// Suffix appended to the application namespace for vote signatures.
pub const NAMESPACE_SUFFIX: &[u8] = b"_PBFT_SIGN";

/// Outcome of a vote.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum VoteResult {
    Against = 0,
    Agree = 1,
}

impl TryFrom<u32> for VoteResult {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Against),
            1 => Ok(Self::Agree),
            other => Err(Error::InvalidResult(other)),
        }
    }
}

impl Write for VoteResult {
    fn write(&self, buf: &mut impl BufMut) {
        UInt(*self as u32).write(buf);
    }
}

impl EncodeSize for VoteResult {
    fn encode_size(&self) -> usize {
        UInt(*self as u32).encode_size()
    }
}

impl Read for VoteResult {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let value: u32 = UInt::read(buf)?.into();
        Self::try_from(value).map_err(|_| CodecError::Invalid("VoteResult", "unknown result"))
    }
}

/// One member's vote on one fast block.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PbftSign {
    pub fast_height: u64,
    pub fast_hash: Digest,
    pub result: VoteResult,
    /// Signature over [PbftSign::hash_with_no_sign].
    pub sign: Signature,
}

/// Encode the signed fields of a vote.
fn pre_image(fast_height: u64, fast_hash: &Digest, result: VoteResult) -> Vec<u8> {
    let height = UInt(fast_height);
    let mut buf =
        Vec::with_capacity(height.encode_size() + fast_hash.encode_size() + result.encode_size());
    height.write(&mut buf);
    fast_hash.write(&mut buf);
    result.write(&mut buf);
    buf
}

impl PbftSign {
    /// Vote on the block at `fast_height` with digest `fast_hash`.
    pub fn sign(
        signer: &PrivateKey,
        namespace: &[u8],
        fast_height: u64,
        fast_hash: Digest,
        result: VoteResult,
    ) -> Self {
        let digest = hash_bytes(&pre_image(fast_height, &fast_hash, result));
        let namespace = union(namespace, NAMESPACE_SUFFIX);
        let sign = signer.sign(Some(&namespace), digest.as_ref());
        Self {
            fast_height,
            fast_hash,
            result,
            sign,
        }
    }

    /// Check that `public_key` signed this vote.
    ///
    /// The pre-image is recomputed from the vote's own fields, so any change to `fast_height`,
    /// `fast_hash` or `result` after signing is detected.
    pub fn verify(&self, namespace: &[u8], public_key: &PublicKey) -> Result<(), Error> {
        let digest = self.hash_with_no_sign();
        let namespace = union(namespace, NAMESPACE_SUFFIX);
        if !public_key.verify(Some(&namespace), digest.as_ref(), &self.sign) {
            return Err(Error::BadSignature);
        }
        Ok(())
    }

    /// Digest of the signed fields.
    pub fn hash_with_no_sign(&self) -> Digest {
        hash_bytes(&pre_image(self.fast_height, &self.fast_hash, self.result))
    }

    /// Digest of the signed vote.
    pub fn hash(&self) -> Digest {
        hash(self)
    }
}

impl Write for PbftSign {
    fn write(&self, buf: &mut impl BufMut) {
        UInt(self.fast_height).write(buf);
        self.fast_hash.write(buf);
        self.result.write(buf);
        self.sign.write(buf);
    }
}

impl EncodeSize for PbftSign {
    fn encode_size(&self) -> usize {
        UInt(self.fast_height).encode_size()
            + self.fast_hash.encode_size()
            + self.result.encode_size()
            + self.sign.encode_size()
    }
}

impl Read for PbftSign {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let fast_height = UInt::read(buf)?.into();
        let fast_hash = Digest::read(buf)?;
        let result = VoteResult::read(buf)?;
        let sign = Signature::read(buf)?;
        Ok(Self {
            fast_height,
            fast_hash,
            result,
            sign,
        })
    }
}

impl Display for PbftSign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PbftSign{{H:{},B:{},R:{:?}}}",
            self.fast_height, self.fast_hash, self.result
        )
    }
}

/// Vote with an untyped result.
///
/// The result is checked before anything is hashed or signed, so a value other than `0` or `1`
/// fails with [Error::InvalidResult] without touching the key.
pub fn sign(
    signer: &PrivateKey,
    namespace: &[u8],
    fast_height: u64,
    fast_hash: Digest,
    result: u32,
) -> Result<PbftSign, Error> {
    let result = VoteResult::try_from(result)?;
    Ok(PbftSign::sign(
        signer,
        namespace,
        fast_height,
        fast_hash,
        result,
    ))
}

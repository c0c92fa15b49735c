//! Distribute a member's network endpoint to the incoming committee.
//!
//! Before a committee hands over, each member seals its [CommitteeNode] once for every recipient
//! (so only that recipient can read it) and signs the resulting bundle. The signature covers the
//! sealed blobs and the committee id, authenticating the sender without revealing any endpoint.
//!
//! # Example
//!
//! ```rust
//! use fastchain_committee::{handoff, CommitteeNode};
//! use fastchain_crypto::{PrivateKey, PrivateKeyExt, Signer};
//! use rand::{rngs::StdRng, SeedableRng};
//! use std::{net::Ipv4Addr, time::Duration};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let sender = PrivateKey::from_seed(0);
//! let recipient = PrivateKey::from_seed(1);
//! let node = CommitteeNode::new(Ipv4Addr::LOCALHOST.into(), 30310, 30311, sender.public_key());
//!
//! let msg = handoff::build(&mut rng, &sender, b"fastchain", &node, &[recipient.public_key()], 6, 1_000)
//!     .expect("sealing failed");
//! let (freshness, synchrony_bound) = (Duration::from_secs(60), Duration::from_secs(5));
//! handoff::verify(b"fastchain", &msg, &sender.public_key(), 2_000, freshness, synchrony_bound)
//!     .expect("invalid hand-off");
//! assert_eq!(msg.open(&recipient, b"fastchain"), Some(node));
//! ```

use crate::{hash, hash_bytes, CommitteeNode, Error};
use bytes::{Buf, BufMut};
use commonware_codec::{
    varint::UInt, DecodeExt, Encode, EncodeSize, Error as CodecError, Read, ReadExt, ReadRangeExt,
    Write,
};
use commonware_cryptography::sha256::Digest;
use commonware_utils::union;
use fastchain_crypto::{open, seal, PrivateKey, PublicKey, Signature, Signer, Verifier};
use rand::{CryptoRng, Rng};
use std::time::Duration;
use tracing::debug;

/// Suffix appended to the application namespace for hand-off signatures.
pub const SIGN_SUFFIX: &[u8] = b"_HANDOFF";

/// Suffix appended to the application namespace when sealing endpoints.
pub const SEAL_SUFFIX: &[u8] = b"_NODES";

/// Maximum size of a sealed endpoint.
pub const MAX_ENCRYPTED_NODE: usize = 256;

/// An endpoint sealed for a single recipient.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct EncryptedNode(Vec<u8>);

impl EncryptedNode {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for EncryptedNode {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for EncryptedNode {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Write for EncryptedNode {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for EncryptedNode {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

impl Read for EncryptedNode {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self(Vec::<u8>::read_range(buf, ..=MAX_ENCRYPTED_NODE)?))
    }
}

/// Signed bundle of sealed endpoints for committee `committee_id`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptNodeMessage {
    /// Creation time (milliseconds since the UNIX epoch).
    pub created_at: u64,
    pub committee_id: u64,
    pub nodes: Vec<EncryptedNode>,
    /// Signature over [EncryptNodeMessage::hash_without_sign].
    pub sign: Signature,
}

impl EncryptNodeMessage {
    /// Digest of the signed fields (`nodes`, then `committee_id`).
    ///
    /// `created_at` is not covered: freshness is checked against the receiver's clock only.
    pub fn hash_without_sign(&self) -> Digest {
        pre_image(&self.nodes, self.committee_id)
    }

    /// Digest of the whole message.
    pub fn hash(&self) -> Digest {
        hash(self)
    }

    /// Find the endpoint sealed for `recipient`.
    ///
    /// Blobs sealed for other members are skipped, so a recipient that is not addressed by this
    /// message gets [None] rather than an error.
    pub fn open(&self, recipient: &PrivateKey, namespace: &[u8]) -> Option<CommitteeNode> {
        let namespace = union(namespace, SEAL_SUFFIX);
        for (index, blob) in self.nodes.iter().enumerate() {
            let Ok(plaintext) = open(recipient, &namespace, blob.as_ref()) else {
                continue;
            };
            match CommitteeNode::decode(plaintext.as_slice()) {
                Ok(node) => return Some(node),
                Err(err) => {
                    debug!(index, ?err, "opened malformed endpoint");
                }
            }
        }
        None
    }
}

#[allow(clippy::ptr_arg)]
fn pre_image(nodes: &Vec<EncryptedNode>, committee_id: u64) -> Digest {
    let id = UInt(committee_id);
    let mut buf = Vec::with_capacity(nodes.encode_size() + id.encode_size());
    nodes.write(&mut buf);
    id.write(&mut buf);
    hash_bytes(&buf)
}

impl Write for EncryptNodeMessage {
    fn write(&self, buf: &mut impl BufMut) {
        UInt(self.created_at).write(buf);
        UInt(self.committee_id).write(buf);
        self.nodes.write(buf);
        self.sign.write(buf);
    }
}

impl EncodeSize for EncryptNodeMessage {
    fn encode_size(&self) -> usize {
        UInt(self.created_at).encode_size()
            + UInt(self.committee_id).encode_size()
            + self.nodes.encode_size()
            + self.sign.encode_size()
    }
}

impl Read for EncryptNodeMessage {
    /// Maximum number of sealed endpoints.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_nodes: &usize) -> Result<Self, CodecError> {
        let created_at = UInt::read(buf)?.into();
        let committee_id = UInt::read(buf)?.into();
        let nodes = Vec::<EncryptedNode>::read_range(buf, ..=*max_nodes)?;
        let sign = Signature::read(buf)?;
        Ok(Self {
            created_at,
            committee_id,
            nodes,
            sign,
        })
    }
}

/// Seal `node` for each of `recipients` and sign the bundle with `sender`.
pub fn build<R: Rng + CryptoRng>(
    rng: &mut R,
    sender: &PrivateKey,
    namespace: &[u8],
    node: &CommitteeNode,
    recipients: &[PublicKey],
    committee_id: u64,
    created_at: u64,
) -> Result<EncryptNodeMessage, Error> {
    let plaintext = node.encode();
    let seal_namespace = union(namespace, SEAL_SUFFIX);
    let nodes = recipients
        .iter()
        .map(|recipient| {
            seal(rng, recipient, &seal_namespace, &plaintext).map(EncryptedNode::from)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let digest = pre_image(&nodes, committee_id);
    let sign = sender.sign(Some(&union(namespace, SIGN_SUFFIX)), digest.as_ref());
    Ok(EncryptNodeMessage {
        created_at,
        committee_id,
        nodes,
        sign,
    })
}

/// Check that `sender` signed `msg` and that it was created recently at `now` (milliseconds since
/// the UNIX epoch).
///
/// A message older than `freshness` fails with [Error::Stale]. `created_at` is not covered by the
/// signature, so a message dated more than `synchrony_bound` ahead of `now` fails with
/// [Error::Future] rather than being treated as fresh.
///
/// The signature is checked first: a forged message is reported as [Error::BadSignature] even if
/// its timestamp is also out of range.
pub fn verify(
    namespace: &[u8],
    msg: &EncryptNodeMessage,
    sender: &PublicKey,
    now: u64,
    freshness: Duration,
    synchrony_bound: Duration,
) -> Result<(), Error> {
    let digest = msg.hash_without_sign();
    if !sender.verify(Some(&union(namespace, SIGN_SUFFIX)), digest.as_ref(), &msg.sign) {
        return Err(Error::BadSignature);
    }
    if msg.created_at.saturating_add(millis(freshness)) < now {
        return Err(Error::Stale(msg.created_at, now));
    }
    if msg.created_at > now.saturating_add(millis(synchrony_bound)) {
        return Err(Error::Future(msg.created_at, now));
    }
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::Decode;
    use fastchain_crypto::PrivateKeyExt;
    use rand::{rngs::StdRng, SeedableRng};
    use std::net::Ipv4Addr;

    const NAMESPACE: &[u8] = b"test";
    const FRESHNESS: Duration = Duration::from_secs(30);
    const SYNCHRONY_BOUND: Duration = Duration::from_secs(5);

    fn node(sender: &PrivateKey) -> CommitteeNode {
        CommitteeNode::new(Ipv4Addr::new(10, 0, 0, 7).into(), 30310, 30311, sender.public_key())
    }

    fn recipients(count: u64) -> Vec<PrivateKey> {
        (10..10 + count).map(PrivateKey::from_seed).collect()
    }

    fn message(sender: &PrivateKey, recipients: &[PrivateKey]) -> EncryptNodeMessage {
        let mut rng = StdRng::seed_from_u64(0);
        let keys: Vec<_> = recipients.iter().map(PrivateKey::public_key).collect();
        build(&mut rng, sender, NAMESPACE, &node(sender), &keys, 6, 10_000).unwrap()
    }

    #[test]
    fn test_build_verify_open() {
        let sender = PrivateKey::from_seed(0);
        let recipients = recipients(4);
        let msg = message(&sender, &recipients);
        assert_eq!(msg.nodes.len(), 4);
        assert_eq!(
            verify(NAMESPACE, &msg, &sender.public_key(), 10_500, FRESHNESS, SYNCHRONY_BOUND),
            Ok(())
        );
        for recipient in &recipients {
            assert_eq!(msg.open(recipient, NAMESPACE), Some(node(&sender)));
        }
    }

    #[test]
    fn test_open_not_addressed() {
        let sender = PrivateKey::from_seed(0);
        let msg = message(&sender, &recipients(3));
        assert_eq!(msg.open(&PrivateKey::from_seed(99), NAMESPACE), None);
        assert_eq!(msg.open(&recipients(1)[0], b"other"), None);
    }

    #[test]
    fn test_wrong_sender() {
        let sender = PrivateKey::from_seed(0);
        let msg = message(&sender, &recipients(2));
        let impostor = PrivateKey::from_seed(1).public_key();
        assert_eq!(
            verify(NAMESPACE, &msg, &impostor, 10_500, FRESHNESS, SYNCHRONY_BOUND),
            Err(Error::BadSignature)
        );
    }

    #[test]
    fn test_tampered() {
        let sender = PrivateKey::from_seed(0);
        let public_key = sender.public_key();

        let mut msg = message(&sender, &recipients(2));
        msg.committee_id = 7;
        assert_eq!(
            verify(NAMESPACE, &msg, &public_key, 10_500, FRESHNESS, SYNCHRONY_BOUND),
            Err(Error::BadSignature)
        );

        let mut msg = message(&sender, &recipients(2));
        msg.nodes.pop();
        assert_eq!(
            verify(NAMESPACE, &msg, &public_key, 10_500, FRESHNESS, SYNCHRONY_BOUND),
            Err(Error::BadSignature)
        );
    }

    #[test]
    fn test_stale() {
        let sender = PrivateKey::from_seed(0);
        let msg = message(&sender, &recipients(2));
        let public_key = sender.public_key();
        assert_eq!(
            verify(NAMESPACE, &msg, &public_key, 40_000, FRESHNESS, SYNCHRONY_BOUND),
            Ok(())
        );
        assert_eq!(
            verify(NAMESPACE, &msg, &public_key, 40_001, FRESHNESS, SYNCHRONY_BOUND),
            Err(Error::Stale(10_000, 40_001))
        );

        // A clock behind the sender's by less than the synchrony bound is not stale
        assert_eq!(
            verify(NAMESPACE, &msg, &public_key, 5_000, FRESHNESS, SYNCHRONY_BOUND),
            Ok(())
        );
    }

    #[test]
    fn test_future() {
        let sender = PrivateKey::from_seed(0);
        let public_key = sender.public_key();
        let msg = message(&sender, &recipients(2));
        assert_eq!(
            verify(NAMESPACE, &msg, &public_key, 4_999, FRESHNESS, SYNCHRONY_BOUND),
            Err(Error::Future(10_000, 4_999))
        );

        // Pushing the timestamp of an old message forward does not make it fresh again
        let now = 10_000_000;
        let mut replayed = msg;
        assert_eq!(
            verify(NAMESPACE, &replayed, &public_key, now, FRESHNESS, SYNCHRONY_BOUND),
            Err(Error::Stale(10_000, now))
        );
        replayed.created_at = u64::MAX;
        assert_eq!(
            verify(NAMESPACE, &replayed, &public_key, now, FRESHNESS, SYNCHRONY_BOUND),
            Err(Error::Future(u64::MAX, now))
        );

        // The most a relay can gain is the synchrony bound
        replayed.created_at = now + 5_000;
        assert_eq!(
            verify(NAMESPACE, &replayed, &public_key, now, FRESHNESS, SYNCHRONY_BOUND),
            Ok(())
        );
        assert_eq!(
            verify(NAMESPACE, &replayed, &public_key, now + 35_001, FRESHNESS, SYNCHRONY_BOUND),
            Err(Error::Stale(now + 5_000, now + 35_001))
        );
    }

    #[test]
    fn test_created_at_not_signed() {
        let sender = PrivateKey::from_seed(0);
        let mut msg = message(&sender, &recipients(2));
        let digest = msg.hash_without_sign();
        let full = msg.hash();
        msg.created_at += 1;
        assert_eq!(msg.hash_without_sign(), digest);
        assert_ne!(msg.hash(), full);
    }

    #[test]
    fn test_codec() {
        let sender = PrivateKey::from_seed(0);
        let msg = message(&sender, &recipients(3));
        let encoded = msg.encode();
        assert_eq!(encoded.len(), msg.encode_size());
        let decoded = EncryptNodeMessage::decode_cfg(encoded.clone(), &3).unwrap();
        assert_eq!(decoded, msg);
        assert!(EncryptNodeMessage::decode_cfg(encoded, &2).is_err());
    }
}

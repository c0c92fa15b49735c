//! Membership deltas applied when a committee hands over to its successor.

use crate::{CommitteeInfo, CommitteeMember, Error, MemberFlag};
use bytes::{Buf, BufMut};
use commonware_codec::{
    varint::UInt, EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, ReadRangeExt, Write,
};
use fastchain_crypto::{read_public_key, Address, PublicKey, PublicKeyExt};
use std::{collections::HashSet, fmt::Display};
use tracing::debug;

/// Direction of a [SwitchEnter].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum SwitchFlag {
    Append = 0xEE,
    Remove = 0xAA,
}

impl TryFrom<u8> for SwitchFlag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xEE => Ok(Self::Append),
            0xAA => Ok(Self::Remove),
            other => Err(Error::InvalidFlag(other)),
        }
    }
}

impl Write for SwitchFlag {
    fn write(&self, buf: &mut impl BufMut) {
        (*self as u8).write(buf);
    }
}

impl Read for SwitchFlag {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let tag = u8::read(buf)?;
        Self::try_from(tag).map_err(|_| CodecError::InvalidEnum(tag))
    }
}

impl FixedSize for SwitchFlag {
    const SIZE: usize = u8::SIZE;
}

/// A single key entering or leaving the committee.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SwitchEnter {
    pub public_key: PublicKey,
    pub flag: SwitchFlag,
}

impl SwitchEnter {
    pub fn append(public_key: PublicKey) -> Self {
        Self {
            public_key,
            flag: SwitchFlag::Append,
        }
    }

    pub fn remove(public_key: PublicKey) -> Self {
        Self {
            public_key,
            flag: SwitchFlag::Remove,
        }
    }
}

impl Write for SwitchEnter {
    fn write(&self, buf: &mut impl BufMut) {
        self.public_key.write(buf);
        self.flag.write(buf);
    }
}

impl Read for SwitchEnter {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let public_key = read_public_key(buf)?;
        let flag = SwitchFlag::read(buf)?;
        Ok(Self { public_key, flag })
    }
}

impl FixedSize for SwitchEnter {
    const SIZE: usize = PublicKey::SIZE + SwitchFlag::SIZE;
}

impl Display for SwitchEnter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p:{},s:{:#x}", self.public_key, self.flag as u8)
    }
}

/// The delta that turns committee `cid` into its successor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SwitchInfos {
    /// Committee this delta targets.
    pub cid: u64,
    pub vals: Vec<SwitchEnter>,
}

impl SwitchInfos {
    pub fn new(cid: u64, vals: Vec<SwitchEnter>) -> Self {
        Self { cid, vals }
    }
}

impl Write for SwitchInfos {
    fn write(&self, buf: &mut impl BufMut) {
        UInt(self.cid).write(buf);
        self.vals.write(buf);
    }
}

impl EncodeSize for SwitchInfos {
    fn encode_size(&self) -> usize {
        UInt(self.cid).encode_size() + self.vals.encode_size()
    }
}

impl Read for SwitchInfos {
    /// Maximum number of entries in a delta.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_switches: &usize) -> Result<Self, CodecError> {
        let cid = UInt::read(buf)?.into();
        let vals = Vec::<SwitchEnter>::read_range(buf, ..=*max_switches)?;
        Ok(Self { cid, vals })
    }
}

impl Display for SwitchInfos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let vals = self
            .vals
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "SwitchInfos{{CID:{},Vals:{{{}}}}}", self.cid, vals)
    }
}

/// Compute the membership that results from applying `infos` to `members`.
///
/// Every member whose key is tagged [SwitchFlag::Remove] is dropped and every key tagged
/// [SwitchFlag::Append] is added at the end, in the order it appears in `infos`, with its coinbase
/// derived from the key and its flag set to [MemberFlag::Add]. The result depends only on the
/// inputs, so replaying a delta against the same base always yields the same sequence.
///
/// Nothing is returned unless the whole delta applies: a key listed twice fails with
/// [Error::DuplicateSwitchKey], removing a non-member fails with [Error::UnknownRemoveTarget] and
/// appending a current member fails with [Error::DuplicateAppend].
///
/// Keys are compared by the address they control, so two encodings of one point are the same key.
pub fn apply_delta(
    members: &[CommitteeMember],
    infos: &SwitchInfos,
) -> Result<Vec<CommitteeMember>, Error> {
    let mut seen = HashSet::with_capacity(infos.vals.len());
    let mut entries = Vec::with_capacity(infos.vals.len());
    for enter in &infos.vals {
        let address = enter.public_key.address();
        if !seen.insert(address) {
            return Err(Error::DuplicateSwitchKey(enter.public_key.clone()));
        }
        entries.push((address, enter));
    }

    let current: HashSet<Address> = members
        .iter()
        .map(|member| member.public_key.address())
        .collect();
    let mut removed = HashSet::new();
    let mut appended = Vec::new();
    for (address, enter) in entries {
        let present = current.contains(&address);
        match enter.flag {
            SwitchFlag::Remove if !present => {
                return Err(Error::UnknownRemoveTarget(enter.public_key.clone()));
            }
            SwitchFlag::Remove => {
                removed.insert(address);
            }
            SwitchFlag::Append if present => {
                return Err(Error::DuplicateAppend(enter.public_key.clone()));
            }
            SwitchFlag::Append => {
                appended.push(CommitteeMember::new(
                    enter.public_key.clone(),
                    MemberFlag::Add,
                ));
            }
        }
    }

    let mut next: Vec<CommitteeMember> = members
        .iter()
        .filter(|member| !removed.contains(&member.public_key.address()))
        .cloned()
        .collect();
    debug!(
        cid = infos.cid,
        removed = removed.len(),
        appended = appended.len(),
        "applied delta"
    );
    next.extend(appended);
    Ok(next)
}

impl CommitteeInfo {
    /// Apply a delta to this snapshot.
    ///
    /// Fails with [Error::CommitteeMismatch] if `infos` targets another committee. Standbys promoted
    /// by the delta are removed from `back_members`. The snapshot is left untouched on failure.
    pub fn apply(&self, infos: &SwitchInfos) -> Result<CommitteeInfo, Error> {
        if infos.cid != self.id {
            return Err(Error::CommitteeMismatch(self.id, infos.cid));
        }
        let members = apply_delta(&self.members, infos)?;
        let promoted: HashSet<Address> = infos
            .vals
            .iter()
            .filter(|enter| enter.flag == SwitchFlag::Append)
            .map(|enter| enter.public_key.address())
            .collect();
        let back_members = self
            .back_members
            .iter()
            .filter(|member| !promoted.contains(&member.public_key.address()))
            .cloned()
            .collect();
        Ok(CommitteeInfo {
            id: self.id,
            start_height: self.start_height,
            members,
            back_members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{Decode, DecodeExt, Encode};
    use fastchain_crypto::{PrivateKey, PrivateKeyExt, Signer};

    fn key(seed: u64) -> PublicKey {
        PrivateKey::from_seed(seed).public_key()
    }

    fn members(seeds: impl IntoIterator<Item = u64>) -> Vec<CommitteeMember> {
        seeds
            .into_iter()
            .map(|seed| CommitteeMember::new(key(seed), MemberFlag::Used))
            .collect()
    }

    #[test]
    fn test_apply_delta() {
        let base = members(0..4);
        let infos = SwitchInfos::new(
            5,
            vec![
                SwitchEnter::append(key(10)),
                SwitchEnter::remove(key(1)),
                SwitchEnter::append(key(11)),
            ],
        );
        let next = apply_delta(&base, &infos).unwrap();
        let keys: Vec<_> = next.iter().map(|m| m.public_key.clone()).collect();
        assert_eq!(keys, vec![key(0), key(2), key(3), key(10), key(11)]);
        assert_eq!(next[3].flag, MemberFlag::Add);
        assert_eq!(next[3].coinbase, key(10).address());
        assert_eq!(next[0].flag, MemberFlag::Used);
    }

    #[test]
    fn test_apply_delta_deterministic() {
        let base = members(0..4);
        let infos = SwitchInfos::new(
            5,
            vec![SwitchEnter::remove(key(0)), SwitchEnter::append(key(7))],
        );
        let first = apply_delta(&base, &infos).unwrap();
        let second = apply_delta(&base, &infos).unwrap();
        assert_eq!(first, second);

        // The base is not modified
        assert_eq!(base, members(0..4));
    }

    #[test]
    fn test_unknown_remove_target() {
        let base = members(0..4);
        let infos = SwitchInfos::new(5, vec![SwitchEnter::remove(key(9))]);
        assert_eq!(
            apply_delta(&base, &infos),
            Err(Error::UnknownRemoveTarget(key(9)))
        );
    }

    #[test]
    fn test_duplicate_append() {
        let base = members(0..4);
        let infos = SwitchInfos::new(
            5,
            vec![SwitchEnter::append(key(8)), SwitchEnter::append(key(2))],
        );
        assert_eq!(
            apply_delta(&base, &infos),
            Err(Error::DuplicateAppend(key(2)))
        );
    }

    #[test]
    fn test_aliased_append() {
        // The compact encoding of a member's key names the member's point
        let (seed, alias) = crate::compact_alias();
        assert_ne!(alias, key(seed));
        let base = members([seed, 40, 41, 42]);
        let infos = SwitchInfos::new(5, vec![SwitchEnter::append(alias.clone())]);
        assert_eq!(
            apply_delta(&base, &infos),
            Err(Error::DuplicateAppend(alias.clone()))
        );

        // Removing through the alias drops the member
        let infos = SwitchInfos::new(5, vec![SwitchEnter::remove(alias.clone())]);
        let next = apply_delta(&base, &infos).unwrap();
        assert_eq!(next, members([40, 41, 42]));

        // Naming one point twice is a duplicate entry
        let infos = SwitchInfos::new(
            5,
            vec![SwitchEnter::remove(key(seed)), SwitchEnter::append(alias.clone())],
        );
        assert_eq!(
            apply_delta(&base, &infos),
            Err(Error::DuplicateSwitchKey(alias))
        );

        // The compact encoding never decodes
        let mut entry = SwitchEnter::append(key(seed)).encode().to_vec();
        entry[0] = 0x05;
        assert!(SwitchEnter::decode(&entry[..]).is_err());
    }

    #[test]
    fn test_duplicate_switch_key() {
        let base = members(0..4);
        let infos = SwitchInfos::new(
            5,
            vec![SwitchEnter::remove(key(1)), SwitchEnter::append(key(1))],
        );
        assert_eq!(
            apply_delta(&base, &infos),
            Err(Error::DuplicateSwitchKey(key(1)))
        );
    }

    #[test]
    fn test_empty_delta() {
        let base = members(0..4);
        let next = apply_delta(&base, &SwitchInfos::new(5, vec![])).unwrap();
        assert_eq!(next, base);
    }

    #[test]
    fn test_committee_apply() {
        let info = CommitteeInfo::new(5, 100, members(0..4), members(20..22));
        let infos = SwitchInfos::new(5, vec![SwitchEnter::append(key(20))]);
        let next = info.apply(&infos).unwrap();
        assert_eq!(next.id, 5);
        assert_eq!(next.members.len(), 5);
        assert_eq!(next.back_members, members(21..22));

        let wrong = SwitchInfos::new(6, vec![]);
        assert_eq!(info.apply(&wrong), Err(Error::CommitteeMismatch(5, 6)));
    }

    #[test]
    fn test_codec() {
        let infos = SwitchInfos::new(
            3,
            vec![SwitchEnter::append(key(1)), SwitchEnter::remove(key(2))],
        );
        let encoded = infos.encode();
        assert_eq!(SwitchInfos::decode_cfg(encoded.clone(), &2).unwrap(), infos);
        assert!(SwitchInfos::decode_cfg(encoded, &1).is_err());

        let mut entry = SwitchEnter::append(key(1)).encode().to_vec();
        let last = entry.len() - 1;
        entry[last] = 0xAB;
        assert!(SwitchEnter::decode(&entry[..]).is_err());
    }

    #[test]
    fn test_display() {
        let infos = SwitchInfos::new(3, vec![SwitchEnter::remove(key(2))]);
        let formatted = infos.to_string();
        assert!(formatted.starts_with(&format!("SwitchInfos{{CID:3,Vals:{{p:{}", key(2))));
        assert!(formatted.ends_with(",s:0xaa}}"));
    }
}

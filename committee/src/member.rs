use crate::Error;
use bytes::{Buf, BufMut};
use commonware_codec::{
    varint::UInt, EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, ReadRangeExt, Write,
};
use fastchain_crypto::{read_public_key, Address, PublicKey, PublicKeyExt};
use std::{collections::HashSet, fmt::Display};

/// Lifecycle state of a [CommitteeMember].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum MemberFlag {
    Unused = 0xa0,
    Switching = 0xa1,
    Used = 0xa2,
    Removed = 0xa3,
    Add = 0xa4,
}

impl TryFrom<u8> for MemberFlag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xa0 => Ok(Self::Unused),
            0xa1 => Ok(Self::Switching),
            0xa2 => Ok(Self::Used),
            0xa3 => Ok(Self::Removed),
            0xa4 => Ok(Self::Add),
            other => Err(Error::InvalidFlag(other)),
        }
    }
}

impl Write for MemberFlag {
    fn write(&self, buf: &mut impl BufMut) {
        (*self as u8).write(buf);
    }
}

impl Read for MemberFlag {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let tag = u8::read(buf)?;
        Self::try_from(tag).map_err(|_| CodecError::InvalidEnum(tag))
    }
}

impl FixedSize for MemberFlag {
    const SIZE: usize = u8::SIZE;
}

/// One validator's identity within a committee.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CommitteeMember {
    /// Reward and identity anchor, derived from `public_key`.
    pub coinbase: Address,
    /// Key the member signs votes with.
    pub public_key: PublicKey,
    pub flag: MemberFlag,
}

impl CommitteeMember {
    /// Create a member whose coinbase is derived from `public_key`.
    pub fn new(public_key: PublicKey, flag: MemberFlag) -> Self {
        Self {
            coinbase: public_key.address(),
            public_key,
            flag,
        }
    }

    /// Returns true if `public_key` is compressed and `coinbase` is the address derived from it.
    pub fn verify(&self) -> bool {
        self.public_key.is_canonical() && self.coinbase == self.public_key.address()
    }
}

impl Write for CommitteeMember {
    fn write(&self, buf: &mut impl BufMut) {
        self.coinbase.write(buf);
        self.public_key.write(buf);
        self.flag.write(buf);
    }
}

impl Read for CommitteeMember {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let coinbase = Address::read(buf)?;
        let public_key = read_public_key(buf)?;
        let flag = MemberFlag::read(buf)?;
        Ok(Self {
            coinbase,
            public_key,
            flag,
        })
    }
}

impl FixedSize for CommitteeMember {
    const SIZE: usize = Address::SIZE + PublicKey::SIZE + MemberFlag::SIZE;
}

impl Display for CommitteeMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "F:{:#x},C:{},P:{}",
            self.flag as u8, self.coinbase, self.public_key
        )
    }
}

/// A committee snapshot.
///
/// The order of `members` is significant: the agreement protocol indexes members by position (for
/// example, to rotate leaders). `back_members` are standbys that do not vote until a delta promotes
/// them into `members`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitteeInfo {
    /// Monotonically increasing committee sequence number.
    pub id: u64,
    /// Fast-chain height at which this committee becomes authoritative.
    pub start_height: u64,
    pub members: Vec<CommitteeMember>,
    pub back_members: Vec<CommitteeMember>,
}

impl CommitteeInfo {
    pub fn new(
        id: u64,
        start_height: u64,
        members: Vec<CommitteeMember>,
        back_members: Vec<CommitteeMember>,
    ) -> Self {
        Self {
            id,
            start_height,
            members,
            back_members,
        }
    }

    /// Returns the position of the voting member with the given key.
    ///
    /// Members are matched by the address the key controls, so any encoding of the same point
    /// finds the same member.
    pub fn index(&self, public_key: &PublicKey) -> Option<usize> {
        let coinbase = public_key.address();
        self.members
            .iter()
            .position(|member| member.coinbase == coinbase)
    }

    /// Returns the voting member with the given coinbase.
    pub fn member(&self, coinbase: &Address) -> Option<&CommitteeMember> {
        self.members
            .iter()
            .find(|member| &member.coinbase == coinbase)
    }

    /// Returns the member (voting or standby) with the given coinbase.
    pub fn participant(&self, coinbase: &Address) -> Option<&CommitteeMember> {
        self.member(coinbase).or_else(|| {
            self.back_members
                .iter()
                .find(|member| &member.coinbase == coinbase)
        })
    }

    /// Minimum number of agreeing votes required to finalize a fast block (`2f + 1` for
    /// `n = 3f + 1` voting members).
    pub fn quorum(&self) -> usize {
        let n = self.members.len();
        let f = n.saturating_sub(1) / 3;
        n - f
    }
}

impl Write for CommitteeInfo {
    fn write(&self, buf: &mut impl BufMut) {
        UInt(self.id).write(buf);
        UInt(self.start_height).write(buf);
        self.members.write(buf);
        self.back_members.write(buf);
    }
}

impl EncodeSize for CommitteeInfo {
    fn encode_size(&self) -> usize {
        UInt(self.id).encode_size()
            + UInt(self.start_height).encode_size()
            + self.members.encode_size()
            + self.back_members.encode_size()
    }
}

impl Read for CommitteeInfo {
    /// Maximum number of entries in either member list.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_members: &usize) -> Result<Self, CodecError> {
        let id = UInt::read(buf)?.into();
        let start_height = UInt::read(buf)?.into();
        let members = Vec::<CommitteeMember>::read_range(buf, ..=*max_members)?;
        let back_members = Vec::<CommitteeMember>::read_range(buf, ..=*max_members)?;
        Ok(Self {
            id,
            start_height,
            members,
            back_members,
        })
    }
}

impl Display for CommitteeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.members.is_empty() {
            return write!(f, "CommitteeInfo{{ID:{},SH:{}}}", self.id, self.start_height);
        }
        let members = self
            .members
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n  ");
        write!(
            f,
            "CommitteeInfo{{ID:{},SH:{},M:{{{}}}}}",
            self.id, self.start_height, members
        )
    }
}

/// Check a committee snapshot before it is accepted.
///
/// Fails with [Error::InvalidMember] if any member (voting or standby) holds a key that is not in
/// compressed form or a coinbase that is not derived from its key, with [Error::DuplicateMember] if a coinbase repeats within the
/// voting members, and with [Error::NonMonotonicId] if `info.id` does not exceed `previous` (the id
/// of the last accepted committee, if any).
///
/// Public keys are curve-checked whenever they are parsed, so every [CommitteeMember] already holds
/// a valid point.
pub fn validate(info: &CommitteeInfo, previous: Option<u64>) -> Result<(), Error> {
    for member in info.members.iter().chain(info.back_members.iter()) {
        if !member.verify() {
            return Err(Error::InvalidMember(member.coinbase));
        }
    }
    let mut seen = HashSet::with_capacity(info.members.len());
    for member in &info.members {
        if !seen.insert(member.coinbase) {
            return Err(Error::DuplicateMember(member.coinbase));
        }
    }
    if let Some(previous) = previous {
        if info.id <= previous {
            return Err(Error::NonMonotonicId(info.id, previous));
        }
    }
    Ok(())
}

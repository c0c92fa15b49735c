//! Load the initial committee from JSON.
//!
//! A genesis file lists members as objects of the form
//! `{"address": "0x..", "publickey": "0x..", "flag": 162}`. `address` may be omitted (it is derived
//! from the key) and `flag` defaults to [MemberFlag::Used]. The file is either a list of members or
//! an object with `members` and (optionally) `back_members`.

use crate::{validate, CommitteeInfo, CommitteeMember, Error, MemberFlag};
use commonware_utils::from_hex_formatted;
use fastchain_crypto::{public_key, Address, PublicKeyExt};
use serde::{de, Deserialize, Deserializer};
use tracing::info;

/// Raw member entry as it appears in a genesis file.
#[derive(Deserialize)]
struct Entry {
    address: Option<String>,
    publickey: String,
    flag: Option<u8>,
}

impl TryFrom<Entry> for CommitteeMember {
    type Error = Error;

    fn try_from(entry: Entry) -> Result<Self, Self::Error> {
        let raw = from_hex_formatted(&entry.publickey)
            .ok_or_else(|| Error::Genesis(format!("invalid public key: {}", entry.publickey)))?;
        let public_key = public_key(&raw)?;
        let coinbase = match entry.address {
            Some(address) => address.parse::<Address>()?,
            None => public_key.address(),
        };
        let flag = match entry.flag {
            Some(flag) => MemberFlag::try_from(flag)?,
            None => MemberFlag::Used,
        };
        Ok(Self {
            coinbase,
            public_key,
            flag,
        })
    }
}

impl<'de> Deserialize<'de> for CommitteeMember {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entry = Entry::deserialize(deserializer)?;
        Self::try_from(entry).map_err(de::Error::custom)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Genesis {
    Members(Vec<CommitteeMember>),
    Committee {
        members: Vec<CommitteeMember>,
        #[serde(default)]
        back_members: Vec<CommitteeMember>,
    },
}

/// Build committee `0` (authoritative from height `0`) from a genesis file.
///
/// The committee is validated before it is returned.
pub fn committee(json: &str) -> Result<CommitteeInfo, Error> {
    let genesis: Genesis =
        serde_json::from_str(json).map_err(|err| Error::Genesis(err.to_string()))?;
    let (members, back_members) = match genesis {
        Genesis::Members(members) => (members, Vec::new()),
        Genesis::Committee {
            members,
            back_members,
        } => (members, back_members),
    };
    if members.is_empty() {
        return Err(Error::Genesis("no members".into()));
    }
    let info = CommitteeInfo::new(0, 0, members, back_members);
    validate(&info, None)?;
    info!(
        members = info.members.len(),
        back_members = info.back_members.len(),
        "loaded genesis committee"
    );
    Ok(info)
}

use crate::{Error, PublicKey, PublicKeyExt};
use bytes::{Buf, BufMut};
use commonware_codec::{Error as CodecError, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::{Hasher, Sha256};
use commonware_utils::{from_hex_formatted, hex};
use std::{
    fmt::{Debug, Display},
    ops::Deref,
    str::FromStr,
};

/// Length of an [Address].
pub const ADDRESS_LENGTH: usize = 20;

/// Fixed-width account identifier derived from a [PublicKey].
///
/// The address is the last 20 bytes of the SHA-256 digest of the uncompressed public key
/// (without the SEC1 tag byte).
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Derive the [Address] controlled by `public_key`.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let uncompressed = public_key.to_uncompressed();
        let mut hasher = Sha256::new();
        hasher.update(&uncompressed[1..]);
        let digest = hasher.finalize();
        let digest = digest.as_ref();

        let mut address = [0u8; ADDRESS_LENGTH];
        address.copy_from_slice(&digest[digest.len() - ADDRESS_LENGTH..]);
        Self(address)
    }
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(value: [u8; ADDRESS_LENGTH]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; ADDRESS_LENGTH] = value
            .try_into()
            .map_err(|_| Error::InvalidLength(ADDRESS_LENGTH, value.len()))?;
        Ok(Self(raw))
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parses a hex address, with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = from_hex_formatted(s).ok_or(Error::InvalidHex)?;
        Self::try_from(raw.as_slice())
    }
}

impl Write for Address {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Address {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self(<[u8; ADDRESS_LENGTH]>::read(buf)?))
    }
}

impl FixedSize for Address {
    const SIZE: usize = ADDRESS_LENGTH;
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Address {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

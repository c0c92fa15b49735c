use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, Read, ReadExt, Write};
use fastchain_crypto::{read_public_key, Address, PublicKey, PublicKeyExt};
use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

const IPV4_TAG: u8 = 4;
const IPV6_TAG: u8 = 6;

/// Network endpoint of a committee member.
///
/// Carried (sealed) inside an [crate::EncryptNodeMessage] and registered with the agreement engine
/// once decrypted.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CommitteeNode {
    pub ip: IpAddr,
    /// Port used by the agreement protocol.
    pub port: u16,
    /// Port used for block dissemination.
    pub port2: u16,
    pub coinbase: Address,
    pub public_key: PublicKey,
}

impl CommitteeNode {
    /// Create an endpoint record whose coinbase is derived from `public_key`.
    pub fn new(ip: IpAddr, port: u16, port2: u16, public_key: PublicKey) -> Self {
        Self {
            ip,
            port,
            port2,
            coinbase: public_key.address(),
            public_key,
        }
    }

    /// Returns true if `public_key` is compressed and `coinbase` is the address derived from it.
    pub fn verify(&self) -> bool {
        self.public_key.is_canonical() && self.coinbase == self.public_key.address()
    }

    /// Address of the agreement protocol listener.
    pub fn socket(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl Write for CommitteeNode {
    fn write(&self, buf: &mut impl BufMut) {
        match self.ip {
            IpAddr::V4(ip) => {
                IPV4_TAG.write(buf);
                ip.octets().write(buf);
            }
            IpAddr::V6(ip) => {
                IPV6_TAG.write(buf);
                ip.octets().write(buf);
            }
        }
        self.port.write(buf);
        self.port2.write(buf);
        self.coinbase.write(buf);
        self.public_key.write(buf);
    }
}

impl EncodeSize for CommitteeNode {
    fn encode_size(&self) -> usize {
        let ip = match self.ip {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 16,
        };
        1 + ip
            + self.port.encode_size()
            + self.port2.encode_size()
            + self.coinbase.encode_size()
            + self.public_key.encode_size()
    }
}

impl Read for CommitteeNode {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let ip = match u8::read(buf)? {
            IPV4_TAG => IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::read(buf)?)),
            IPV6_TAG => IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::read(buf)?)),
            tag => return Err(CodecError::InvalidEnum(tag)),
        };
        let port = u16::read(buf)?;
        let port2 = u16::read(buf)?;
        let coinbase = Address::read(buf)?;
        let public_key = read_public_key(buf)?;
        Ok(Self {
            ip,
            port,
            port2,
            coinbase,
            public_key,
        })
    }
}

impl Display for CommitteeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NodeInfo:{{IP:{},P1:{},P2:{},C:{},P:{}}}",
            self.ip, self.port, self.port2, self.coinbase, self.public_key
        )
    }
}

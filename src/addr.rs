use std::{
    error::Error,
    fmt,
    net::{Ipv4Addr, SocketAddrV4},
};

/// Size of the guest's `struct sockaddr_in`.
pub const SOCKADDR_IN_LEN: usize = 16;

/// Guest value of `AF_INET`.
pub const GUEST_AF_INET: u16 = 2;

/// An IPv4 socket address as laid out in guest memory:
///
/// ```text
/// 0..2   sin_family  little-endian (guest native)
/// 2..4   sin_port    big-endian (network order)
/// 4..8   sin_addr    big-endian (network order)
/// 8..16  sin_zero    zero
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockAddrIn {
    pub family: u16,
    pub port: u16,
    pub ip: Ipv4Addr,
}

impl SockAddrIn {
    pub fn decode(bytes: &[u8]) -> Result<Self, AddrError> {
        if bytes.len() < SOCKADDR_IN_LEN {
            return Err(AddrError::Truncated { len: bytes.len() });
        }
        Ok(Self {
            family: u16::from_le_bytes([bytes[0], bytes[1]]),
            port: u16::from_be_bytes([bytes[2], bytes[3]]),
            ip: Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7]),
        })
    }

    pub fn encode(&self) -> [u8; SOCKADDR_IN_LEN] {
        let mut out = [0u8; SOCKADDR_IN_LEN];
        out[0..2].copy_from_slice(&self.family.to_le_bytes());
        out[2..4].copy_from_slice(&self.port.to_be_bytes());
        out[4..8].copy_from_slice(&self.ip.octets());
        out
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }
}

impl From<SocketAddrV4> for SockAddrIn {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            family: GUEST_AF_INET,
            port: addr.port(),
            ip: *addr.ip(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrError {
    Truncated { len: usize },
}

impl fmt::Display for AddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrError::Truncated { len } => {
                write!(f, "sockaddr is {len} bytes, need {SOCKADDR_IN_LEN}")
            }
        }
    }
}

impl Error for AddrError {}

use core::fmt;
use std::net::{IpAddr, SocketAddr};

/// Where a BACnet device can be reached.
///
/// Opaque to the orchestration layer: it is only ever handed back to the
/// protocol engine as an addressing token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceAddress {
    Ip(SocketAddr),
}

impl DeviceAddress {
    pub const BACNET_IP_DEFAULT_PORT: u16 = 47808;

    /// Address of a device listening on the standard BACnet/IP port.
    pub fn bacnet_default(addr: IpAddr) -> Self {
        Self::Ip(SocketAddr::new(addr, Self::BACNET_IP_DEFAULT_PORT))
    }

    pub fn as_socket_addr(self) -> SocketAddr {
        match self {
            Self::Ip(addr) => addr,
        }
    }
}

impl From<SocketAddr> for DeviceAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::Ip(addr)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
        }
    }
}

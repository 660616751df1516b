use std::fmt;

/// Protocol family selector for an acquired packet socket.
///
/// A closed set rather than a raw EtherType, so the privileged side
/// validates against an allowlist instead of passing arbitrary values to
/// the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    /// Every protocol seen on the interface (`ETH_P_ALL`).
    #[default]
    All,
    /// IPv4 frames only (`ETH_P_IP`).
    Ipv4,
    /// ARP frames only (`ETH_P_ARP`).
    Arp,
    /// IPv6 frames only (`ETH_P_IPV6`).
    Ipv6,
}

impl Protocol {
    /// Stable wire code for this selector.
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::All => 0,
            Self::Ipv4 => 1,
            Self::Arp => 2,
            Self::Ipv6 => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::All),
            1 => Some(Self::Ipv4),
            2 => Some(Self::Arp),
            3 => Some(Self::Ipv6),
            _ => None,
        }
    }

    /// EtherType passed to `socket(2)` and `bind(2)`, host byte order.
    pub(crate) fn ethertype(self) -> u16 {
        match self {
            Self::All => libc::ETH_P_ALL as u16,
            Self::Ipv4 => libc::ETH_P_IP as u16,
            Self::Arp => libc::ETH_P_ARP as u16,
            Self::Ipv6 => libc::ETH_P_IPV6 as u16,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::Ipv4 => "ipv4",
            Self::Arp => "arp",
            Self::Ipv6 => "ipv6",
        };
        f.write_str(name)
    }
}

/// One raw-socket acquisition request.
///
/// Immutable once sent; the helper re-validates every field and rejects
/// anything it does not like, so nothing here is trusted client-side.
#[derive(Debug, Clone)]
pub struct SocketRequest {
    pub(crate) interface: String,
    pub(crate) protocol: Protocol,
    pub(crate) promiscuous: bool,
}

impl SocketRequest {
    /// Request a socket bound to `interface`, receiving all protocols,
    /// not promiscuous.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            protocol: Protocol::default(),
            promiscuous: false,
        }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Also receive frames not addressed to the interface.
    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_codes_are_stable() {
        for protocol in [Protocol::All, Protocol::Ipv4, Protocol::Arp, Protocol::Ipv6] {
            assert_eq!(Protocol::from_code(protocol.code()), Some(protocol));
        }
        assert_eq!(Protocol::from_code(7), None);
    }

    #[test]
    fn request_defaults() {
        let request = SocketRequest::new("eth0");
        assert_eq!(request.interface(), "eth0");
        assert_eq!(request.protocol, Protocol::All);
        assert!(!request.promiscuous);

        let request = SocketRequest::new("eth0").protocol(Protocol::Arp).promiscuous(true);
        assert_eq!(request.protocol, Protocol::Arp);
        assert!(request.promiscuous);
    }
}

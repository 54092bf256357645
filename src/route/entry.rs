//! Typed IPv4 routing-table rows

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Whether the next hop is the final destination or another router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteType {
    /// Directly attached network (OS code 3)
    LocalInterface,
    /// Reached through a gateway (OS code 4)
    RemoteInterface,
    Other(u32),
}

impl RouteType {
    pub fn from_code(code: u32) -> Self {
        match code {
            3 => RouteType::LocalInterface,
            4 => RouteType::RemoteInterface,
            other => RouteType::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            RouteType::LocalInterface => 3,
            RouteType::RemoteInterface => 4,
            RouteType::Other(code) => code,
        }
    }
}

/// Origin of the route; governs how the metric is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteProtocol {
    /// Created for a local interface (OS code 2)
    LocalInterface,
    /// Static route from network management (OS code 3)
    Static,
    /// Learned from an EGP gateway (OS code 5)
    EgpGateway,
    Other(u32),
}

impl RouteProtocol {
    pub fn from_code(code: u32) -> Self {
        match code {
            2 => RouteProtocol::LocalInterface,
            3 => RouteProtocol::Static,
            5 => RouteProtocol::EgpGateway,
            other => RouteProtocol::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            RouteProtocol::LocalInterface => 2,
            RouteProtocol::Static => 3,
            RouteProtocol::EgpGateway => 5,
            RouteProtocol::Other(code) => code,
        }
    }
}

/// One routing-table row
///
/// Values are carried exactly as the OS reported them. A row whose mask is
/// not contiguous is still representable; callers decide what to do with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub interface_index: u32,
    pub route_type: RouteType,
    pub protocol: RouteProtocol,
    /// `metrics[0]` is the primary metric, the rest are secondary metrics
    pub metrics: [u32; 5],
    pub age: u32,
    pub policy: u32,
    pub next_hop_as: u32,
}

impl RouteEntry {
    /// Build a static route through `gateway`, or an on-link route when
    /// `gateway` is 0.0.0.0
    ///
    /// Both are `RouteProtocol::Static`: the OS only accepts routes created
    /// through network management. `LocalInterface` comes from the OS alone.
    pub fn new(
        destination: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        interface_index: u32,
        metric: u32,
    ) -> Self {
        let route_type = if gateway.is_unspecified() {
            RouteType::LocalInterface
        } else {
            RouteType::RemoteInterface
        };

        Self {
            destination,
            mask,
            gateway,
            interface_index,
            route_type,
            protocol: RouteProtocol::Static,
            metrics: [metric, 0, 0, 0, 0],
            age: 0,
            policy: 0,
            next_hop_as: 0,
        }
    }

    /// A 0.0.0.0/0 route through `gateway`
    pub fn default_via(gateway: Ipv4Addr, interface_index: u32, metric: u32) -> Self {
        Self::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            gateway,
            interface_index,
            metric,
        )
    }

    pub fn metric(&self) -> u32 {
        self.metrics[0]
    }

    pub fn with_metric(mut self, metric: u32) -> Self {
        self.metrics[0] = metric;
        self
    }

    /// Prefix length, or `None` if the mask bits are not contiguous
    pub fn prefix_len(&self) -> Option<u8> {
        mask_to_prefix(self.mask)
    }

    /// True when the mask is contiguous and no host bits are set in the destination
    pub fn is_valid_network(&self) -> bool {
        self.prefix_len().is_some() && u32::from(self.destination) & !u32::from(self.mask) == 0
    }

    pub fn is_default(&self) -> bool {
        self.destination.is_unspecified() && self.mask.is_unspecified()
    }

    /// Directly connected: no next hop, or flagged as a local-interface route
    pub fn is_on_link(&self) -> bool {
        self.gateway.is_unspecified() || self.route_type == RouteType::LocalInterface
    }

    pub fn is_static(&self) -> bool {
        self.protocol == RouteProtocol::Static
    }

    /// Same destination, mask, next hop and interface; metric and auxiliary
    /// fields are ignored
    pub fn same_route(&self, other: &RouteEntry) -> bool {
        self.destination == other.destination
            && self.mask == other.mask
            && self.gateway == other.gateway
            && self.interface_index == other.interface_index
    }

    /// Bit-packed classification relative to the VPN gateway
    pub fn tag(&self, vpn_gateway: Ipv4Addr) -> RouteTag {
        RouteTag::new(self, vpn_gateway)
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix_len() {
            Some(prefix) => write!(f, "{}/{}", self.destination, prefix)?,
            None => write!(f, "{} mask {}", self.destination, self.mask)?,
        }
        write!(
            f,
            " via {} if {} metric {}",
            self.gateway,
            self.interface_index,
            self.metric()
        )
    }
}

/// Prefix length of a contiguous mask
pub fn mask_to_prefix(mask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(mask);
    let ones = bits.leading_ones();
    if bits.checked_shl(ones).unwrap_or(0) == 0 {
        Some(ones as u8)
    } else {
        None
    }
}

/// Mask for a prefix length; lengths above 32 saturate
pub fn prefix_to_mask(prefix: u8) -> Ipv4Addr {
    let bits = match prefix {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - p),
    };
    Ipv4Addr::from(bits)
}

/// Single-byte route classification used for diagnostics
///
/// Bits 0-5 hold the network prefix length (leading ones of the mask),
/// bit 7 is set when the route's gateway is the VPN gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTag(pub u8);

impl RouteTag {
    const PREFIX_BITS: u8 = 0x3f;
    const VPN_GATEWAY: u8 = 0x80;

    pub fn new(entry: &RouteEntry, vpn_gateway: Ipv4Addr) -> Self {
        let prefix = u32::from(entry.mask).leading_ones() as u8 & Self::PREFIX_BITS;
        let vpn = if entry.gateway == vpn_gateway {
            Self::VPN_GATEWAY
        } else {
            0
        };
        RouteTag(prefix | vpn)
    }

    pub fn prefix_len(self) -> u8 {
        self.0 & Self::PREFIX_BITS
    }

    pub fn is_vpn_gateway(self) -> bool {
        self.0 & Self::VPN_GATEWAY != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_mask_to_prefix() {
        assert_eq!(mask_to_prefix(ip("0.0.0.0")), Some(0));
        assert_eq!(mask_to_prefix(ip("255.0.0.0")), Some(8));
        assert_eq!(mask_to_prefix(ip("255.255.255.0")), Some(24));
        assert_eq!(mask_to_prefix(ip("255.255.255.255")), Some(32));
        assert_eq!(mask_to_prefix(ip("255.0.255.0")), None);
        assert_eq!(mask_to_prefix(ip("0.0.0.255")), None);
    }

    #[test]
    fn test_prefix_to_mask() {
        assert_eq!(prefix_to_mask(0), ip("0.0.0.0"));
        assert_eq!(prefix_to_mask(12), ip("255.240.0.0"));
        assert_eq!(prefix_to_mask(32), ip("255.255.255.255"));
        assert_eq!(prefix_to_mask(40), ip("255.255.255.255"));
    }

    #[test]
    fn test_route_type_codes() {
        assert_eq!(RouteType::from_code(3), RouteType::LocalInterface);
        assert_eq!(RouteType::from_code(4), RouteType::RemoteInterface);
        assert_eq!(RouteType::from_code(7), RouteType::Other(7));
        assert_eq!(RouteType::Other(7).code(), 7);
    }

    #[test]
    fn test_route_protocol_codes() {
        assert_eq!(RouteProtocol::from_code(2), RouteProtocol::LocalInterface);
        assert_eq!(RouteProtocol::from_code(3), RouteProtocol::Static);
        assert_eq!(RouteProtocol::from_code(5), RouteProtocol::EgpGateway);
        assert_eq!(RouteProtocol::from_code(14), RouteProtocol::Other(14));
        assert_eq!(RouteProtocol::EgpGateway.code(), 5);
    }

    #[test]
    fn test_default_route_classification() {
        let route = RouteEntry::default_via(ip("192.168.1.1"), 4, 25);
        assert!(route.is_default());
        assert!(!route.is_on_link());
        assert!(route.is_static());
        assert_eq!(route.prefix_len(), Some(0));
        assert_eq!(route.metric(), 25);
    }

    #[test]
    fn test_on_link_route() {
        let route = RouteEntry::new(ip("10.8.0.0"), ip("255.255.255.0"), ip("0.0.0.0"), 9, 0);
        assert!(route.is_on_link());
        assert_eq!(route.route_type, RouteType::LocalInterface);
        assert_eq!(route.protocol, RouteProtocol::Static);
        assert!(route.is_static());
        assert!(!route.is_default());
    }

    #[test]
    fn test_invalid_mask_passes_through() {
        let route = RouteEntry::new(ip("10.0.0.0"), ip("255.0.255.0"), ip("10.0.0.1"), 1, 5);
        assert_eq!(route.prefix_len(), None);
        assert!(!route.is_valid_network());
        assert!(route.to_string().contains("mask 255.0.255.0"));
    }

    #[test]
    fn test_host_bits_make_network_invalid() {
        let route = RouteEntry::new(ip("10.0.0.7"), ip("255.255.255.0"), ip("10.0.0.1"), 1, 5);
        assert!(!route.is_valid_network());
    }

    #[test]
    fn test_same_route_ignores_metric() {
        let a = RouteEntry::default_via(ip("10.8.0.1"), 7, 93);
        let b = a.clone().with_metric(103);
        let c = RouteEntry::default_via(ip("10.8.0.1"), 8, 93);
        assert!(a.same_route(&b));
        assert!(!a.same_route(&c));
    }

    #[test]
    fn test_route_tag() {
        let vpn_gw = ip("10.8.0.1");
        let override_route = RouteEntry::default_via(vpn_gw, 7, 93);
        let tag = override_route.tag(vpn_gw);
        assert_eq!(tag.0, 0x80);
        assert!(tag.is_vpn_gateway());
        assert_eq!(tag.prefix_len(), 0);

        let subnet = RouteEntry::new(ip("172.16.0.0"), ip("255.240.0.0"), ip("192.168.1.1"), 4, 10);
        let tag = subnet.tag(vpn_gw);
        assert_eq!(tag.0, 12);
        assert!(!tag.is_vpn_gateway());

        let host = RouteEntry::new(ip("1.2.3.4"), ip("255.255.255.255"), vpn_gw, 7, 10);
        assert_eq!(host.tag(vpn_gw).0, 0x80 | 32);
    }

    #[test]
    fn test_display() {
        let route = RouteEntry::default_via(ip("192.168.1.1"), 4, 25);
        assert_eq!(route.to_string(), "0.0.0.0/0 via 192.168.1.1 if 4 metric 25");
    }

    #[test]
    fn test_serializes_to_json() {
        let route = RouteEntry::default_via(ip("192.168.1.1"), 4, 25);
        let json = serde_json::to_string(&route).unwrap();
        assert!(json.contains("\"gateway\":\"192.168.1.1\""));
        assert!(json.contains("\"route_type\":\"remote-interface\""));
        let back: RouteEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, route);
    }
}

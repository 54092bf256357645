//! macOS-specific routing implementation
//!
//! Snapshots are parsed from `netstat -rn -f inet`; mutations use `route -n`.
//! macOS does not expose route metrics, so every row reports metric 0, and
//! only one default route can exist at a time.

use super::{PlatformError, RoutingManager};
use crate::route::{prefix_to_mask, RouteEntry, RouteProtocol, RouteType};
use nix::net::if_::{if_nameindex, if_nametoindex};
use std::net::Ipv4Addr;
use std::process::Command;
use tracing::debug;

pub struct MacRoutingManager;

impl MacRoutingManager {
    pub fn new() -> Self {
        Self
    }

    fn interface_name(&self, index: u32) -> Result<String, PlatformError> {
        let interfaces = if_nameindex()
            .map_err(|e| PlatformError::InterfaceNotFound(format!("index {}: {}", index, e)))?;
        interfaces
            .iter()
            .find(|iface| iface.index() == index)
            .map(|iface| iface.name().to_string_lossy().into_owned())
            .ok_or_else(|| PlatformError::InterfaceNotFound(format!("index {}", index)))
    }

    fn route_args(&self, action: &str, route: &RouteEntry) -> Result<Vec<String>, String> {
        let prefix = route
            .prefix_len()
            .ok_or_else(|| format!("non-contiguous mask {}", route.mask))?;

        let mut args = vec![
            "-n".to_string(),
            action.to_string(),
            "-net".to_string(),
            format!("{}/{}", route.destination, prefix),
        ];
        if route.gateway.is_unspecified() {
            let dev = self
                .interface_name(route.interface_index)
                .map_err(|e| e.to_string())?;
            args.push("-interface".to_string());
            args.push(dev);
        } else {
            args.push(route.gateway.to_string());
        }
        Ok(args)
    }
}

impl Default for MacRoutingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingManager for MacRoutingManager {
    fn fetch_routes(&self) -> Result<Vec<RouteEntry>, PlatformError> {
        let output = Command::new("netstat")
            .args(["-rn", "-f", "inet"])
            .output()
            .map_err(|e| PlatformError::ReadTableError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::ReadTableError(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_netstat(&stdout, |name| if_nametoindex(name).ok()))
    }

    fn add_route(&self, route: &RouteEntry) -> Result<(), PlatformError> {
        let args = self
            .route_args("add", route)
            .map_err(|message| PlatformError::AddRouteError { code: None, message })?;
        debug!("route {}", args.join(" "));

        let output = Command::new("route")
            .args(&args)
            .output()
            .map_err(|e| PlatformError::AddRouteError {
                code: None,
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::AddRouteError {
                code: output.status.code().map(|c| c as u32),
                message: stderr.trim().to_string(),
            });
        }

        Ok(())
    }

    fn delete_route(&self, route: &RouteEntry) -> Result<(), PlatformError> {
        let args = self
            .route_args("delete", route)
            .map_err(PlatformError::DeleteRouteError)?;
        debug!("route {}", args.join(" "));

        let output = Command::new("route")
            .args(&args)
            .output()
            .map_err(|e| PlatformError::DeleteRouteError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::DeleteRouteError(stderr.trim().to_string()));
        }

        Ok(())
    }

    fn interface_index(&self, name: &str) -> Result<u32, PlatformError> {
        if_nametoindex(name)
            .map_err(|e| PlatformError::InterfaceNotFound(format!("{}: {}", name, e)))
    }

    /// `route add default` fails with "File exists" while a default is set
    fn supports_parallel_defaults(&self) -> bool {
        false
    }
}

/// Expand a netstat destination: `default`, `a.b.c.d/n`, or the shorthand
/// `10`, `192.168.1` where missing octets are zero and the prefix covers the
/// octets given
fn parse_destination(dest: &str) -> Option<(Ipv4Addr, u8)> {
    if dest == "default" {
        return Some((Ipv4Addr::UNSPECIFIED, 0));
    }

    let (addr, explicit_prefix) = match dest.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().ok()?)),
        None => (dest, None),
    };

    let mut octets = [0u8; 4];
    let mut count = 0;
    for (slot, part) in octets.iter_mut().zip(addr.split('.')) {
        *slot = part.parse().ok()?;
        count += 1;
    }
    if count == 0 || addr.split('.').count() > 4 {
        return None;
    }

    let prefix = explicit_prefix.unwrap_or(count as u8 * 8);
    if prefix > 32 {
        return None;
    }
    Some((Ipv4Addr::from(octets), prefix))
}

fn parse_netstat<F>(content: &str, resolve_index: F) -> Vec<RouteEntry>
where
    F: Fn(&str) -> Option<u32>,
{
    let mut routes = Vec::new();
    let mut in_table = false;

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() == Some(&"Destination") {
            in_table = true;
            continue;
        }
        if !in_table || fields.len() < 4 {
            continue;
        }

        let (dest, gateway, flags, netif) = (fields[0], fields[1], fields[2], fields[3]);
        let Some((destination, prefix)) = parse_destination(dest) else {
            debug!("Skipping netstat row: {}", line.trim());
            continue;
        };

        let link_index = gateway
            .strip_prefix("link#")
            .and_then(|n| n.parse::<u32>().ok());
        let gateway: Ipv4Addr = gateway.parse().unwrap_or(Ipv4Addr::UNSPECIFIED);

        let route_type = if flags.contains('G') {
            RouteType::RemoteInterface
        } else {
            RouteType::LocalInterface
        };
        let protocol = if flags.contains('D') {
            RouteProtocol::Other(0)
        } else if flags.contains('S') {
            RouteProtocol::Static
        } else {
            RouteProtocol::LocalInterface
        };

        routes.push(RouteEntry {
            destination,
            mask: prefix_to_mask(prefix),
            gateway,
            interface_index: resolve_index(netif).or(link_index).unwrap_or(0),
            route_type,
            protocol,
            metrics: [0; 5],
            age: 0,
            policy: 0,
            next_hop_as: 0,
        });
    }

    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "\
Routing tables

Internet:
Destination        Gateway            Flags               Netif Expire
default            192.168.1.1        UGScg                 en0
10/8               10.8.0.1           UGSc                utun3
127                127.0.0.1          UCS                   lo0
192.168.1          link#6             UCS                   en0      !
192.168.1.1/32     link#6             UCS                   en0      !
fe80::%lo0/64      fe80::1%lo0        UcI                   lo0
";

    fn index(name: &str) -> Option<u32> {
        match name {
            "en0" => Some(6),
            "utun3" => Some(12),
            _ => None,
        }
    }

    #[test]
    fn test_mac_routing_manager_creation() {
        let manager = MacRoutingManager::new();
        let _default = MacRoutingManager::default();
        assert!(!manager.supports_parallel_defaults());
    }

    #[test]
    fn test_route_args_half_default() {
        let route = RouteEntry::new(
            Ipv4Addr::new(128, 0, 0, 0),
            Ipv4Addr::new(128, 0, 0, 0),
            Ipv4Addr::new(10, 8, 0, 1),
            12,
            93,
        );
        let args = MacRoutingManager::new().route_args("add", &route).unwrap();
        assert_eq!(args, vec!["-n", "add", "-net", "128.0.0.0/1", "10.8.0.1"]);
    }

    #[test]
    fn test_parse_destination() {
        assert_eq!(parse_destination("default"), Some((Ipv4Addr::UNSPECIFIED, 0)));
        assert_eq!(parse_destination("10/8"), Some((Ipv4Addr::new(10, 0, 0, 0), 8)));
        assert_eq!(parse_destination("127"), Some((Ipv4Addr::new(127, 0, 0, 0), 8)));
        assert_eq!(
            parse_destination("192.168.1"),
            Some((Ipv4Addr::new(192, 168, 1, 0), 24))
        );
        assert_eq!(
            parse_destination("192.168.1.1"),
            Some((Ipv4Addr::new(192, 168, 1, 1), 32))
        );
        assert_eq!(parse_destination("fe80::%lo0/64"), None);
        assert_eq!(parse_destination("1.2.3.4/40"), None);
    }

    #[test]
    fn test_parse_netstat() {
        let routes = parse_netstat(FIXTURE, index);
        assert_eq!(routes.len(), 5);

        let default = &routes[0];
        assert!(default.is_default());
        assert_eq!(default.gateway, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(default.interface_index, 6);
        assert_eq!(default.protocol, RouteProtocol::Static);

        let vpn = &routes[1];
        assert_eq!(vpn.prefix_len(), Some(8));
        assert_eq!(vpn.interface_index, 12);

        let link = &routes[3];
        assert!(link.is_on_link());
        assert_eq!(link.route_type, RouteType::LocalInterface);
    }
}

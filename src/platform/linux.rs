//! Linux-specific routing implementation
//!
//! Snapshots come from `/proc/net/route`; mutations go through `ip route`.

use super::{PlatformError, RoutingManager};
use crate::route::{RouteEntry, RouteProtocol, RouteType};
use nix::net::if_::{if_nameindex, if_nametoindex};
use std::fs;
use std::net::Ipv4Addr;
use std::process::Command;
use tracing::debug;

const PROC_NET_ROUTE: &str = "/proc/net/route";

const RTF_GATEWAY: u32 = 0x0002;
const RTF_DYNAMIC: u32 = 0x0010;
const RTF_MODIFIED: u32 = 0x0020;

pub struct LinuxRoutingManager;

impl LinuxRoutingManager {
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
        let dev = self
            .interface_name(route.interface_index)
            .map_err(|e| e.to_string())?;

        let mut args = vec![
            "route".to_string(),
            action.to_string(),
            format!("{}/{}", route.destination, prefix),
        ];
        if !route.gateway.is_unspecified() {
            args.push("via".to_string());
            args.push(route.gateway.to_string());
        }
        args.extend([
            "dev".to_string(),
            dev,
            "metric".to_string(),
            route.metric().to_string(),
        ]);
        Ok(args)
    }
}

impl Default for LinuxRoutingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingManager for LinuxRoutingManager {
    fn fetch_routes(&self) -> Result<Vec<RouteEntry>, PlatformError> {
        let content = fs::read_to_string(PROC_NET_ROUTE)
            .map_err(|e| PlatformError::ReadTableError(format!("{}: {}", PROC_NET_ROUTE, e)))?;
        parse_proc_net_route(&content, |name| if_nametoindex(name).ok())
    }

    fn add_route(&self, route: &RouteEntry) -> Result<(), PlatformError> {
        let args = self
            .route_args("add", route)
            .map_err(|message| PlatformError::AddRouteError { code: None, message })?;
        debug!("ip {}", args.join(" "));

        let output = Command::new("ip")
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
            .route_args("del", route)
            .map_err(PlatformError::DeleteRouteError)?;
        debug!("ip {}", args.join(" "));

        let output = Command::new("ip")
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
}

/// Parse the text of `/proc/net/route`
///
/// Columns: Iface Destination Gateway Flags RefCnt Use Metric Mask MTU Window IRTT.
/// Addresses are printed as hex of the in-memory (network order) word.
fn parse_proc_net_route<F>(content: &str, resolve_index: F) -> Result<Vec<RouteEntry>, PlatformError>
where
    F: Fn(&str) -> Option<u32>,
{
    let mut routes = Vec::new();

    for (lineno, line) in content.lines().enumerate().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 8 {
            return Err(PlatformError::ReadTableError(format!(
                "{} line {}: expected 8 columns, got {}",
                PROC_NET_ROUTE,
                lineno + 1,
                fields.len()
            )));
        }

        let hex = |idx: usize| {
            u32::from_str_radix(fields[idx], 16).map_err(|e| {
                PlatformError::ReadTableError(format!(
                    "{} line {}: bad field {:?}: {}",
                    PROC_NET_ROUTE,
                    lineno + 1,
                    fields[idx],
                    e
                ))
            })
        };
        let addr = |idx: usize| hex(idx).map(|v| Ipv4Addr::from(v.to_ne_bytes()));

        let flags = hex(3)?;
        let metric: u32 = fields[6].parse().map_err(|_| {
            PlatformError::ReadTableError(format!(
                "{} line {}: bad metric {:?}",
                PROC_NET_ROUTE,
                lineno + 1,
                fields[6]
            ))
        })?;

        let via_gateway = flags & RTF_GATEWAY != 0;
        let route_type = if via_gateway {
            RouteType::RemoteInterface
        } else {
            RouteType::LocalInterface
        };
        let protocol = if flags & (RTF_DYNAMIC | RTF_MODIFIED) != 0 {
            RouteProtocol::Other(flags)
        } else if via_gateway {
            RouteProtocol::Static
        } else {
            RouteProtocol::LocalInterface
        };

        routes.push(RouteEntry {
            destination: addr(1)?,
            mask: addr(7)?,
            gateway: addr(2)?,
            interface_index: resolve_index(fields[0]).unwrap_or(0),
            route_type,
            protocol,
            metrics: [metric, 0, 0, 0, 0],
            age: 0,
            policy: 0,
            next_hop_as: 0,
        });
    }

    Ok(routes)
}

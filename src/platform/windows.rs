//! Windows-specific routing implementation
//!
//! Uses the IP Helper forwarding table API. The table is copied into a byte
//! buffer and decoded by [`crate::route::codec`], never reinterpreted in place.

use super::{read_table_buffer, PlatformError, RoutingManager, TableRead};
use crate::route::codec::{HEADER_LEN, RECORD_LEN};
use crate::route::{decode_table, RouteEntry};
use std::ffi::CString;
use tracing::debug;
use windows::core::PCSTR;
use windows::Win32::Foundation::{ERROR_INSUFFICIENT_BUFFER, NO_ERROR};
use windows::Win32::NetworkManagement::IpHelper::{
    if_nametoindex, CreateIpForwardEntry, DeleteIpForwardEntry, GetIpForwardTable,
    MIB_IPFORWARDROW, MIB_IPFORWARDROW_0, MIB_IPFORWARDROW_1, MIB_IPFORWARDTABLE,
};

pub struct WindowsRoutingManager;

impl WindowsRoutingManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WindowsRoutingManager {
    fn default() -> Self {
        Self::new()
    }
}

fn to_row(route: &RouteEntry) -> MIB_IPFORWARDROW {
    MIB_IPFORWARDROW {
        dwForwardDest: u32::from_ne_bytes(route.destination.octets()),
        dwForwardMask: u32::from_ne_bytes(route.mask.octets()),
        dwForwardPolicy: route.policy,
        dwForwardNextHop: u32::from_ne_bytes(route.gateway.octets()),
        dwForwardIfIndex: route.interface_index,
        Anonymous1: MIB_IPFORWARDROW_0 {
            dwForwardType: route.route_type.code(),
        },
        Anonymous2: MIB_IPFORWARDROW_1 {
            dwForwardProto: route.protocol.code(),
        },
        dwForwardAge: route.age,
        dwForwardNextHopAS: route.next_hop_as,
        dwForwardMetric1: route.metrics[0],
        dwForwardMetric2: route.metrics[1],
        dwForwardMetric3: route.metrics[2],
        dwForwardMetric4: route.metrics[3],
        dwForwardMetric5: route.metrics[4],
    }
}

impl RoutingManager for WindowsRoutingManager {
    fn fetch_routes(&self) -> Result<Vec<RouteEntry>, PlatformError> {
        let buf = read_table_buffer(HEADER_LEN + RECORD_LEN, |buf| {
            let mut size = buf.len() as u32;
            let rc = unsafe {
                GetIpForwardTable(
                    Some(buf.as_mut_ptr() as *mut MIB_IPFORWARDTABLE),
                    &mut size,
                    false,
                )
            };

            if rc == NO_ERROR.0 {
                Ok(TableRead::Complete)
            } else if rc == ERROR_INSUFFICIENT_BUFFER.0 {
                Ok(TableRead::BufferTooSmall {
                    required: size as usize,
                })
            } else {
                Err(PlatformError::ReadTableError(format!(
                    "GetIpForwardTable returned {}",
                    rc
                )))
            }
        })?;

        Ok(decode_table(&buf)?)
    }

    fn add_route(&self, route: &RouteEntry) -> Result<(), PlatformError> {
        let row = to_row(route);
        debug!("CreateIpForwardEntry {}", route);

        let rc = unsafe { CreateIpForwardEntry(&row) };
        if rc != NO_ERROR.0 {
            return Err(PlatformError::AddRouteError {
                code: Some(rc),
                message: format!("CreateIpForwardEntry returned {} for {}", rc, route),
            });
        }

        Ok(())
    }

    fn delete_route(&self, route: &RouteEntry) -> Result<(), PlatformError> {
        let row = to_row(route);
        debug!("DeleteIpForwardEntry {}", route);

        let rc = unsafe { DeleteIpForwardEntry(&row) };
        if rc != NO_ERROR.0 {
            return Err(PlatformError::DeleteRouteError(format!(
                "DeleteIpForwardEntry returned {} for {}",
                rc, route
            )));
        }

        Ok(())
    }

    fn interface_index(&self, name: &str) -> Result<u32, PlatformError> {
        let cname =
            CString::new(name).map_err(|_| PlatformError::InterfaceNotFound(name.to_string()))?;
        let index = unsafe { if_nametoindex(PCSTR(cname.as_ptr() as *const u8)) };
        if index == 0 {
            return Err(PlatformError::InterfaceNotFound(name.to_string()));
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_windows_routing_manager_creation() {
        let manager = WindowsRoutingManager::new();
        let _default = WindowsRoutingManager::default();
        let _ = manager;
    }

    #[test]
    fn test_to_row_keeps_network_order() {
        let route = RouteEntry::default_via(Ipv4Addr::new(10, 8, 0, 1), 7, 93);
        let row = to_row(&route);
        assert_eq!(row.dwForwardNextHop.to_ne_bytes(), [10, 8, 0, 1]);
        assert_eq!(row.dwForwardIfIndex, 7);
        assert_eq!(row.dwForwardMetric1, 93);
        assert_eq!(unsafe { row.Anonymous1.dwForwardType }, 4);
        assert_eq!(unsafe { row.Anonymous2.dwForwardProto }, 3);
    }

    #[test]
    fn test_to_row_on_link_uses_netmgmt() {
        let route = RouteEntry::new(
            Ipv4Addr::new(10, 20, 0, 0),
            Ipv4Addr::new(255, 255, 0, 0),
            Ipv4Addr::UNSPECIFIED,
            7,
            93,
        );
        let row = to_row(&route);
        assert_eq!(row.dwForwardNextHop, 0);
        assert_eq!(unsafe { row.Anonymous1.dwForwardType }, 3);
        assert_eq!(unsafe { row.Anonymous2.dwForwardProto }, 3);
    }
}

//! Bookkeeping of routes installed by one VPN session

use crate::route::RouteEntry;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteKind {
    /// 0.0.0.0/0 through the VPN gateway
    DefaultOverride,
    /// Split-tunnel subnet through a next hop on the tunnel
    Subnet,
    /// Directly connected subnet on the tunnel interface
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledRoute {
    pub entry: RouteEntry,
    pub kind: RouteKind,
}

/// Routes one session added to the OS table
///
/// Only the record is owned here; dropping it never touches the OS.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSet {
    session_id: Uuid,
    interface_index: u32,
    routes: Vec<InstalledRoute>,
}

impl RouteSet {
    pub fn new(session_id: Uuid, interface_index: u32) -> Self {
        Self {
            session_id,
            interface_index,
            routes: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn interface_index(&self) -> u32 {
        self.interface_index
    }

    pub fn routes(&self) -> &[InstalledRoute] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn push(&mut self, entry: RouteEntry, kind: RouteKind) {
        self.routes.push(InstalledRoute { entry, kind });
    }

    pub fn contains(&self, entry: &RouteEntry) -> bool {
        self.routes.iter().any(|r| r.entry.same_route(entry))
    }

    pub fn default_override(&self) -> Option<&InstalledRoute> {
        self.routes
            .iter()
            .find(|r| r.kind == RouteKind::DefaultOverride)
    }

    /// True for the tunnel interface's own directly-connected routes
    pub fn is_interface_link(&self, route: &InstalledRoute) -> bool {
        route.kind == RouteKind::Link && route.entry.interface_index == self.interface_index
    }

    /// Remove and return every route except the tunnel's link routes
    pub fn take_removable(&mut self) -> Vec<InstalledRoute> {
        let (keep, take): (Vec<_>, Vec<_>) = std::mem::take(&mut self.routes)
            .into_iter()
            .partition(|r| self.is_interface_link(r));
        self.routes = keep;
        take
    }

    /// Remove and return every route
    pub fn take_all(&mut self) -> Vec<InstalledRoute> {
        std::mem::take(&mut self.routes)
    }

    /// Put back a route whose removal failed
    pub fn restore(&mut self, route: InstalledRoute) {
        self.routes.push(route);
    }
}

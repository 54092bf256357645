//! In-memory routing table for tests

use super::{PlatformError, RoutingManager};
use crate::route::RouteEntry;
use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    Fetch,
    Add(RouteEntry),
    Delete(RouteEntry),
}

/// Simulated live table with injectable failures
#[derive(Default)]
pub struct MockRoutingManager {
    pub table: RefCell<Vec<RouteEntry>>,
    /// Reject installs with `metric < .0` using OS code `.1`
    pub reject_metric_below: Cell<Option<(u32, u32)>>,
    /// Fail installs for this destination with a generic error code
    pub fail_add_destination: Cell<Option<Ipv4Addr>>,
    /// Fail removals for this destination
    pub fail_delete_destination: Cell<Option<Ipv4Addr>>,
    pub fail_fetch: Cell<bool>,
    /// Refuse a second 0.0.0.0/0, as macOS does
    pub single_default: Cell<bool>,
    pub add_calls: RefCell<Vec<RouteEntry>>,
    pub delete_calls: RefCell<Vec<RouteEntry>>,
    pub fetch_calls: Cell<usize>,
    /// Every call in order, including failed ones
    pub ops: RefCell<Vec<MockOp>>,
}

impl MockRoutingManager {
    pub fn with_routes(routes: Vec<RouteEntry>) -> Self {
        Self {
            table: RefCell::new(routes),
            ..Default::default()
        }
    }

    pub fn contains(&self, route: &RouteEntry) -> bool {
        self.table.borrow().iter().any(|r| r.same_route(route))
    }

    pub fn routes(&self) -> Vec<RouteEntry> {
        self.table.borrow().clone()
    }

    /// Simulate another process dropping a route
    pub fn remove_externally(&self, route: &RouteEntry) {
        self.table.borrow_mut().retain(|r| !r.same_route(route));
    }
}

impl RoutingManager for MockRoutingManager {
    fn fetch_routes(&self) -> Result<Vec<RouteEntry>, PlatformError> {
        self.fetch_calls.set(self.fetch_calls.get() + 1);
        self.ops.borrow_mut().push(MockOp::Fetch);
        if self.fail_fetch.get() {
            return Err(PlatformError::ReadTableError("mock failure".to_string()));
        }
        Ok(self.routes())
    }

    fn add_route(&self, route: &RouteEntry) -> Result<(), PlatformError> {
        self.add_calls.borrow_mut().push(route.clone());
        self.ops.borrow_mut().push(MockOp::Add(route.clone()));

        if let Some((threshold, code)) = self.reject_metric_below.get() {
            if route.metric() < threshold {
                return Err(PlatformError::AddRouteError {
                    code: Some(code),
                    message: format!("metric {} too low", route.metric()),
                });
            }
        }
        if self.fail_add_destination.get() == Some(route.destination) {
            return Err(PlatformError::AddRouteError {
                code: Some(5),
                message: "access denied".to_string(),
            });
        }
        if self.single_default.get()
            && route.is_default()
            && self.table.borrow().iter().any(|r| r.is_default())
        {
            return Err(PlatformError::AddRouteError {
                code: Some(17),
                message: "default route exists".to_string(),
            });
        }
        if self.contains(route) {
            return Err(PlatformError::AddRouteError {
                code: Some(5010),
                message: "route exists".to_string(),
            });
        }

        self.table.borrow_mut().push(route.clone());
        Ok(())
    }

    fn delete_route(&self, route: &RouteEntry) -> Result<(), PlatformError> {
        self.delete_calls.borrow_mut().push(route.clone());
        self.ops.borrow_mut().push(MockOp::Delete(route.clone()));

        if self.fail_delete_destination.get() == Some(route.destination) {
            return Err(PlatformError::DeleteRouteError("stuck".to_string()));
        }
        if !self.contains(route) {
            return Err(PlatformError::DeleteRouteError(format!("{} not found", route)));
        }

        self.table.borrow_mut().retain(|r| !r.same_route(route));
        Ok(())
    }

    fn interface_index(&self, name: &str) -> Result<u32, PlatformError> {
        match name {
            "tun0" => Ok(7),
            "eth0" => Ok(4),
            _ => Err(PlatformError::InterfaceNotFound(name.to_string())),
        }
    }

    fn supports_parallel_defaults(&self) -> bool {
        !self.single_default.get()
    }
}

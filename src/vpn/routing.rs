//! VPN route install/teardown for one tunnel session
//!
//! Lifecycle:
//!
//! ```text
//! Disconnected --capture_default--> DefaultCaptured --install_routes--> RoutesInstalled
//! RoutesInstalled --reconnect--> Reconnecting --> DefaultCaptured --> RoutesInstalled
//! any state --disconnect--> Disconnected
//! ```
//!
//! The original default route is captured before anything is installed and
//! is never deleted or restored: the override simply outranks it, and
//! removing the override lets it take over again.

use super::default_route::{find_default_route, revalidate};
use super::route_set::{InstalledRoute, RouteKind, RouteSet};
use crate::platform::{PlatformError, RoutingManager};
use crate::route::{prefix_to_mask, RouteEntry};
use ipnetwork::Ipv4Network;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Metric for the default-route override
pub const DEFAULT_OVERRIDE_METRIC: u32 = 93;

/// Install error code meaning "metric too low relative to existing routes".
/// Platform dependent; configurable through [`MetricPolicy`].
pub const DEFAULT_METRIC_REJECTED_CODE: u32 = 106;

pub const DEFAULT_METRIC_RETRY_STEP: u32 = 10;

/// 0.0.0.0/1 and 128.0.0.0/1: together they outrank any 0.0.0.0/0 by prefix
/// length, whatever its metric
const SPLIT_DEFAULT_HALVES: [(Ipv4Addr, u8); 2] = [
    (Ipv4Addr::new(0, 0, 0, 0), 1),
    (Ipv4Addr::new(128, 0, 0, 0), 1),
];

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Failed to read routing table: {0}")]
    SystemError(#[source] PlatformError),
    #[error("Route {route} rejected (code {code}) at metric {metric}")]
    RouteRejected {
        route: String,
        code: u32,
        metric: u32,
    },
    #[error("Failed to install route {route}: {source}")]
    RouteInstallError {
        route: String,
        #[source]
        source: PlatformError,
    },
    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        state: SessionState,
        operation: &'static str,
    },
    #[error("Platform error: {0}")]
    PlatformError(#[from] PlatformError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    DefaultCaptured,
    RoutesInstalled,
    Reconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::DefaultCaptured => "default route captured",
            SessionState::RoutesInstalled => "routes installed",
            SessionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// What the tunnel needs in the routing table
#[derive(Debug, Clone)]
pub struct TunnelRoutes {
    /// Next hop of the default-route override
    pub gateway: Ipv4Addr,
    /// Tunnel interface every installed route is bound to
    pub interface_index: u32,
    /// The tunnel interface's own connected network, installed on-link and
    /// kept across reconnects
    pub link_network: Option<Ipv4Network>,
    /// Split-tunnel subnets
    pub subnets: Vec<Ipv4Network>,
    /// Next hop for subnet routes; `None` installs them on-link
    pub subnet_gateway: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricPolicy {
    pub override_metric: u32,
    /// Added to a rejected metric for the single retry
    pub retry_step: u32,
    pub rejected_code: u32,
    pub subnet_metric: u32,
    /// Override with 0.0.0.0/1 + 128.0.0.0/1 instead of a second 0.0.0.0/0.
    /// Always done when the platform cannot hold two default routes.
    pub split_override: bool,
}

impl Default for MetricPolicy {
    fn default() -> Self {
        Self {
            override_metric: DEFAULT_OVERRIDE_METRIC,
            retry_step: DEFAULT_METRIC_RETRY_STEP,
            rejected_code: DEFAULT_METRIC_REJECTED_CODE,
            subnet_metric: DEFAULT_OVERRIDE_METRIC,
            split_override: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    pub removed: usize,
    pub failed: usize,
}

/// Routing state of a single VPN session
///
/// Not internally synchronized: one owner drives every transition.
pub struct VpnRouter<M: RoutingManager> {
    manager: M,
    tunnel: TunnelRoutes,
    policy: MetricPolicy,
    state: SessionState,
    original_default: Option<RouteEntry>,
    route_set: RouteSet,
}

impl<M: RoutingManager> VpnRouter<M> {
    pub fn new(manager: M, tunnel: TunnelRoutes, policy: MetricPolicy) -> Self {
        info!(
            "Creating VpnRouter with gateway: {} interface: {}",
            tunnel.gateway, tunnel.interface_index
        );
        let route_set = RouteSet::new(Uuid::new_v4(), tunnel.interface_index);
        Self {
            manager,
            tunnel,
            policy,
            state: SessionState::Disconnected,
            original_default: None,
            route_set,
        }
    }

    /// Create a router bound to a tunnel interface looked up by name
    ///
    /// `tunnel.interface_index` is replaced by the resolved index.
    pub fn with_interface(
        manager: M,
        interface_name: &str,
        mut tunnel: TunnelRoutes,
        policy: MetricPolicy,
    ) -> Result<Self, RoutingError> {
        tunnel.interface_index = manager.interface_index(interface_name)?;
        debug!(
            "Interface {} has index {}",
            interface_name, tunnel.interface_index
        );
        Ok(Self::new(manager, tunnel, policy))
    }

    pub fn session_id(&self) -> Uuid {
        self.route_set.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The pre-existing default route captured for this session
    pub fn original_default(&self) -> Option<&RouteEntry> {
        self.original_default.as_ref()
    }

    pub fn route_set(&self) -> &RouteSet {
        &self.route_set
    }

    pub fn tunnel(&self) -> &TunnelRoutes {
        &self.tunnel
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    fn expect_state(
        &self,
        allowed: &[SessionState],
        operation: &'static str,
    ) -> Result<(), RoutingError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RoutingError::InvalidTransition {
                state: self.state,
                operation,
            })
        }
    }

    fn snapshot(&self) -> Result<Vec<RouteEntry>, RoutingError> {
        let routes = self
            .manager
            .fetch_routes()
            .map_err(RoutingError::SystemError)?;
        debug!("Route snapshot: {} entries", routes.len());
        Ok(routes)
    }

    /// Start a session: resolve and keep the current default route
    ///
    /// Must run before anything is installed. Finding no default route is
    /// not an error.
    pub fn capture_default(&mut self) -> Result<Option<&RouteEntry>, RoutingError> {
        self.expect_state(&[SessionState::Disconnected], "capture the default route")?;

        let snapshot = self.snapshot()?;
        self.original_default = self.resolve_default(snapshot);
        self.route_set = RouteSet::new(Uuid::new_v4(), self.tunnel.interface_index);

        match &self.original_default {
            Some(route) => info!("Captured original default route: {}", route),
            None => info!("No default route present"),
        }

        self.state = SessionState::DefaultCaptured;
        Ok(self.original_default.as_ref())
    }

    /// Default route among `snapshot`, ignoring anything on the tunnel
    /// interface or recorded by this session
    fn resolve_default(&self, snapshot: Vec<RouteEntry>) -> Option<RouteEntry> {
        let candidates: Vec<RouteEntry> = snapshot
            .into_iter()
            .filter(|r| {
                r.interface_index != self.tunnel.interface_index && !self.route_set.contains(r)
            })
            .collect();
        find_default_route(&candidates).cloned()
    }

    fn uses_split_override(&self) -> bool {
        self.policy.split_override || !self.manager.supports_parallel_defaults()
    }

    fn planned_routes(&self) -> Vec<(RouteEntry, RouteKind)> {
        let index = self.tunnel.interface_index;
        let mut planned = Vec::new();

        if self.uses_split_override() {
            for (destination, prefix) in SPLIT_DEFAULT_HALVES {
                let entry = RouteEntry::new(
                    destination,
                    prefix_to_mask(prefix),
                    self.tunnel.gateway,
                    index,
                    self.policy.override_metric,
                );
                planned.push((entry, RouteKind::DefaultOverride));
            }
        } else {
            let entry =
                RouteEntry::default_via(self.tunnel.gateway, index, self.policy.override_metric);
            planned.push((entry, RouteKind::DefaultOverride));
        }

        if let Some(link) = &self.tunnel.link_network {
            let entry = RouteEntry::new(
                link.network(),
                link.mask(),
                Ipv4Addr::UNSPECIFIED,
                index,
                self.policy.subnet_metric,
            );
            planned.push((entry, RouteKind::Link));
        }

        let next_hop = self.tunnel.subnet_gateway.unwrap_or(Ipv4Addr::UNSPECIFIED);
        for subnet in &self.tunnel.subnets {
            let entry = RouteEntry::new(
                subnet.network(),
                subnet.mask(),
                next_hop,
                index,
                self.policy.subnet_metric,
            );
            planned.push((entry, RouteKind::Subnet));
        }

        planned
    }

    /// Install the default-route override, then the subnet routes
    ///
    /// Each route is recorded as soon as the OS accepts it. On failure the
    /// session stays in `DefaultCaptured` with whatever was recorded so far,
    /// and calling this again installs only what is missing.
    pub fn install_routes(&mut self) -> Result<(), RoutingError> {
        self.expect_state(&[SessionState::DefaultCaptured], "install routes")?;

        for (entry, kind) in self.planned_routes() {
            if self.route_set.contains(&entry) {
                debug!("Route already installed by this session: {}", entry);
                continue;
            }
            let installed = self.install_with_metric_retry(entry)?;
            info!("Route added: {} ({:?})", installed, kind);
            self.route_set.push(installed, kind);
        }

        self.state = SessionState::RoutesInstalled;
        info!(
            "Session {}: {} routes installed",
            self.session_id(),
            self.route_set.len()
        );
        Ok(())
    }

    /// Add a route; a metric rejection is retried once at a higher metric
    fn install_with_metric_retry(&self, entry: RouteEntry) -> Result<RouteEntry, RoutingError> {
        let err = match self.manager.add_route(&entry) {
            Ok(()) => return Ok(entry),
            Err(err) => err,
        };

        if err.install_code() != Some(self.policy.rejected_code) {
            return Err(RoutingError::RouteInstallError {
                route: entry.to_string(),
                source: err,
            });
        }

        let retry_metric = match entry
            .metric()
            .checked_add(self.policy.retry_step)
            .filter(|m| *m > entry.metric())
        {
            Some(metric) => metric,
            None => {
                warn!("No higher metric to retry {} with", entry);
                return Err(RoutingError::RouteRejected {
                    route: entry.to_string(),
                    code: self.policy.rejected_code,
                    metric: entry.metric(),
                });
            }
        };
        warn!(
            "Metric {} rejected for {}, retrying at {}",
            entry.metric(),
            entry,
            retry_metric
        );
        let retry = entry.with_metric(retry_metric);

        match self.manager.add_route(&retry) {
            Ok(()) => Ok(retry),
            Err(err) if err.install_code() == Some(self.policy.rejected_code) => {
                Err(RoutingError::RouteRejected {
                    route: retry.to_string(),
                    code: self.policy.rejected_code,
                    metric: retry_metric,
                })
            }
            Err(err) => Err(RoutingError::RouteInstallError {
                route: retry.to_string(),
                source: err,
            }),
        }
    }

    /// Remove routes best-effort; failures are logged and handed back
    fn remove_routes(
        &self,
        routes: Vec<InstalledRoute>,
    ) -> (TeardownSummary, Vec<InstalledRoute>) {
        let mut summary = TeardownSummary::default();
        let mut stuck = Vec::new();

        for route in routes.into_iter().rev() {
            match self.manager.delete_route(&route.entry) {
                Ok(()) => {
                    info!("Route removed: {}", route.entry);
                    summary.removed += 1;
                }
                Err(e) => {
                    warn!("Failed to remove route {}: {} (continuing)", route.entry, e);
                    summary.failed += 1;
                    stuck.push(route);
                }
            }
        }

        (summary, stuck)
    }

    /// Tear down non-link routes, re-check the original default route, and
    /// install again
    ///
    /// The captured default route is kept if it is still in the live table;
    /// only when it has gone is the default route resolved again. Routes that
    /// could not be removed stay recorded and are not installed twice.
    pub fn reconnect(&mut self) -> Result<(), RoutingError> {
        self.expect_state(
            &[
                SessionState::RoutesInstalled,
                SessionState::Reconnecting,
                SessionState::DefaultCaptured,
            ],
            "reconnect",
        )?;
        self.state = SessionState::Reconnecting;
        info!("Session {}: reconnecting", self.session_id());

        let removable = self.route_set.take_removable();
        let (summary, stuck) = self.remove_routes(removable);
        for route in stuck {
            self.route_set.restore(route);
        }
        debug!(
            "Reconnect teardown: {} removed, {} failed",
            summary.removed, summary.failed
        );

        let snapshot = self.snapshot()?;
        let still_present = self
            .original_default
            .as_ref()
            .and_then(|captured| revalidate(captured, &snapshot))
            .cloned();

        match still_present {
            Some(route) => {
                debug!("Original default route still present: {}", route);
                self.original_default = Some(route);
            }
            None => {
                self.original_default = self.resolve_default(snapshot);
                match &self.original_default {
                    Some(route) => warn!("Original default route changed, now: {}", route),
                    None => warn!("Original default route is gone"),
                }
            }
        }

        self.state = SessionState::DefaultCaptured;
        self.install_routes()
    }

    /// Remove every recorded route and end the session
    ///
    /// Never fails; calling it again on an empty session does nothing. The
    /// original default route is not restored, even if it has disappeared.
    pub fn disconnect(&mut self) -> TeardownSummary {
        let routes = self.route_set.take_all();
        let had_routes = !routes.is_empty();
        let (summary, _stuck) = self.remove_routes(routes);

        if let Some(original) = self.original_default.take() {
            if had_routes {
                match self.manager.fetch_routes() {
                    Ok(snapshot) if revalidate(&original, &snapshot).is_none() => {
                        warn!(
                            "Original default route {} is no longer present; not restoring",
                            original
                        );
                    }
                    Ok(_) => debug!("Original default route in effect: {}", original),
                    Err(e) => debug!("Could not verify original default route: {}", e),
                }
            }
        }

        if self.state != SessionState::Disconnected {
            info!(
                "Session {} disconnected: {} removed, {} failed",
                self.session_id(),
                summary.removed,
                summary.failed
            );
        }
        self.state = SessionState::Disconnected;
        summary
    }
}

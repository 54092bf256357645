//! VPN session routing
//!
//! - `default_route`: resolve the pre-existing default route
//! - `route_set`: record of routes a session installed
//! - `routing`: the per-session install/reconnect/teardown state machine

pub mod default_route;
pub mod route_set;
pub mod routing;

pub use default_route::find_default_route;
pub use route_set::{InstalledRoute, RouteKind, RouteSet};
pub use routing::{
    MetricPolicy, RoutingError, SessionState, TeardownSummary, TunnelRoutes, VpnRouter,
};

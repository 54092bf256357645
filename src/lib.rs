//! vpn-routes - IPv4 routing-table inspection and VPN route management
//!
//! Reads the live IPv4 routing table, finds the pre-existing default route,
//! and installs/removes the routes a VPN tunnel needs without touching routes
//! it did not create.
//!
//! # Architecture
//!
//! - `route`: Route table model and binary record decoding
//! - `platform`: OS routing table access (macOS, Linux, Windows)
//! - `vpn`: Default-route resolution and per-session route install/teardown
//! - `config`: Configuration file handling (TOML)
//!
//! # Usage
//!
//! ```no_run
//! use vpn_routes::platform::get_routing_manager;
//! use vpn_routes::vpn::{MetricPolicy, TunnelRoutes, VpnRouter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tunnel = TunnelRoutes {
//!     gateway: "10.8.0.1".parse()?,
//!     interface_index: 0,
//!     link_network: None,
//!     subnets: vec![],
//!     subnet_gateway: None,
//! };
//! let mut router =
//!     VpnRouter::with_interface(get_routing_manager()?, "tun0", tunnel, MetricPolicy::default())?;
//! router.capture_default()?;
//! router.install_routes()?;
//! // ... tunnel drops and comes back
//! router.reconnect()?;
//! // ... shutting down
//! router.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod platform;
pub mod route;
pub mod vpn;

pub use config::Config;
pub use route::RouteEntry;
pub use vpn::{find_default_route, VpnRouter};

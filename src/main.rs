use clap::{Parser, Subcommand};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vpn_routes::platform::{get_routing_manager, PlatformError, RoutingManager};
use vpn_routes::vpn::{RoutingError, VpnRouter};
use vpn_routes::{find_default_route, Config, RouteEntry};

#[derive(Parser)]
#[command(name = "vpn-routes")]
#[command(about = "Inspect the IPv4 routing table and manage VPN routes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./vpn-routes.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the IPv4 routing table
    Routes {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Gateway flagged in the classification byte (default: from config)
        #[arg(long)]
        vpn_gateway: Option<Ipv4Addr>,
    },
    /// Show the current default route
    Default,
    /// Install VPN routes, hold them until Ctrl+C, then remove them
    ///
    /// On Unix, SIGHUP re-syncs the routes as after a tunnel reconnect.
    Connect {
        /// VPN gateway for the default-route override
        #[arg(long)]
        gateway: Option<Ipv4Addr>,
        /// Tunnel interface name
        #[arg(short, long)]
        interface: Option<String>,
    },
    /// Generate default config file
    Init,
}

#[derive(Serialize)]
struct RouteRow<'a> {
    #[serde(flatten)]
    route: &'a RouteEntry,
    tag: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Routes { json, vpn_gateway } => {
            let config = Config::discover(cli.config.as_deref())?;
            let vpn_gateway = vpn_gateway.unwrap_or(config.vpn.gateway);
            let routes = fetch_routes().await?;

            if json {
                let rows: Vec<RouteRow> = routes
                    .iter()
                    .map(|route| RouteRow {
                        route,
                        tag: route.tag(vpn_gateway).0,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_routes(&routes, vpn_gateway);
            }
        }
        Commands::Default => {
            let routes = fetch_routes().await?;
            match find_default_route(&routes) {
                Some(route) => println!("Default route: {}", route),
                None => println!("Default route: none"),
            }
        }
        Commands::Connect { gateway, interface } => {
            let config = Config::discover(cli.config.as_deref())?;
            connect(config, gateway, interface).await?;
        }
        Commands::Init => {
            info!("Generating default config...");
            let config = Config::default();
            let path = PathBuf::from(vpn_routes::config::LOCAL_CONFIG_FILE);
            config.save(&path)?;
            println!("Created default config: {}", path.display());
        }
    }

    Ok(())
}

async fn fetch_routes() -> Result<Vec<RouteEntry>, Box<dyn std::error::Error>> {
    let routes = tokio::task::spawn_blocking(|| -> Result<Vec<RouteEntry>, PlatformError> {
        get_routing_manager()?.fetch_routes()
    })
    .await??;
    Ok(routes)
}

fn print_routes(routes: &[RouteEntry], vpn_gateway: Ipv4Addr) {
    println!(
        "{:<18} {:<15} {:>5} {:>7}  {:<18} {:<18} {:>4}",
        "Destination", "Gateway", "If", "Metric", "Type", "Protocol", "Tag"
    );
    for route in routes {
        let destination = match route.prefix_len() {
            Some(prefix) => format!("{}/{}", route.destination, prefix),
            None => format!("{}&{}", route.destination, route.mask),
        };
        println!(
            "{:<18} {:<15} {:>5} {:>7}  {:<18} {:<18} 0x{:02x}",
            destination,
            route.gateway.to_string(),
            route.interface_index,
            route.metric(),
            format!("{:?}", route.route_type),
            format!("{:?}", route.protocol),
            route.tag(vpn_gateway).0
        );
    }
}

async fn connect(
    config: Config,
    gateway: Option<Ipv4Addr>,
    interface: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tunnel = config.tunnel_routes()?;
    if let Some(gateway) = gateway {
        tunnel.gateway = gateway;
    }
    let interface = interface.unwrap_or_else(|| config.vpn.interface.clone());
    let policy = config.metric_policy();

    let (tx, mut shutdown) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    let mut hangup = hangup_signal()?;

    let mut router = tokio::task::spawn_blocking(move || -> Result<_, RoutingError> {
        let manager: Box<dyn RoutingManager> = get_routing_manager()?;
        let mut router = VpnRouter::with_interface(manager, &interface, tunnel, policy)?;
        router.capture_default()?;
        if let Err(e) = router.install_routes() {
            error!("Failed to install routes: {}", e);
            router.disconnect();
            return Err(e);
        }
        Ok(router)
    })
    .await??;

    println!(
        "Session {}: {} routes installed, press Ctrl+C to remove them",
        router.session_id(),
        router.route_set().len()
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = next_hangup(&mut hangup) => {
                let (r, result) = tokio::task::spawn_blocking(move || {
                    let result = router.reconnect();
                    (router, result)
                })
                .await?;
                router = r;
                match result {
                    Ok(()) => info!("Routes re-synced: {} installed", router.route_set().len()),
                    Err(e) => warn!("Re-sync failed: {} (Ctrl+C removes what was installed)", e),
                }
            }
        }
    }

    let summary = tokio::task::spawn_blocking(move || router.disconnect()).await?;
    println!(
        "Removed {} routes ({} failed)",
        summary.removed, summary.failed
    );
    Ok(())
}

#[cfg(unix)]
type Hangup = tokio::signal::unix::Signal;

#[cfg(unix)]
fn hangup_signal() -> std::io::Result<Hangup> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
}

#[cfg(unix)]
async fn next_hangup(hangup: &mut Hangup) {
    hangup.recv().await;
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
fn hangup_signal() -> std::io::Result<Hangup> {
    Ok(Hangup)
}

#[cfg(not(unix))]
async fn next_hangup(_hangup: &mut Hangup) {
    std::future::pending::<()>().await
}

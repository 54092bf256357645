//! Platform-specific implementations

#[cfg(target_os = "macos")]
pub mod mac;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(test)]
pub mod mock;

use crate::route::{DecodeError, RouteEntry};
use thiserror::Error;
use tracing::debug;

/// Attempts made to read the route table before giving up
pub const FETCH_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Failed to read routing table: {0}")]
    ReadTableError(String),
    #[error("Failed to decode routing table: {0}")]
    Decode(#[from] DecodeError),
    #[error("Failed to add route: {message}")]
    AddRouteError { code: Option<u32>, message: String },
    #[error("Failed to delete route: {0}")]
    DeleteRouteError(String),
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("Unsupported platform")]
    UnsupportedPlatform,
}

impl PlatformError {
    /// OS error code attached to an install failure, if any
    pub fn install_code(&self) -> Option<u32> {
        match self {
            PlatformError::AddRouteError { code, .. } => *code,
            _ => None,
        }
    }
}

/// Platform-agnostic routing interface
///
/// Every call is a short blocking operation against the OS routing table.
pub trait RoutingManager: Send {
    /// Point-in-time snapshot of the IPv4 routing table, in OS order
    fn fetch_routes(&self) -> Result<Vec<RouteEntry>, PlatformError>;
    fn add_route(&self, route: &RouteEntry) -> Result<(), PlatformError>;
    fn delete_route(&self, route: &RouteEntry) -> Result<(), PlatformError>;
    fn interface_index(&self, name: &str) -> Result<u32, PlatformError>;

    /// Whether a second 0.0.0.0/0 route can be added beside an existing one
    fn supports_parallel_defaults(&self) -> bool {
        true
    }
}

impl<M: RoutingManager + ?Sized> RoutingManager for Box<M> {
    fn fetch_routes(&self) -> Result<Vec<RouteEntry>, PlatformError> {
        (**self).fetch_routes()
    }

    fn add_route(&self, route: &RouteEntry) -> Result<(), PlatformError> {
        (**self).add_route(route)
    }

    fn delete_route(&self, route: &RouteEntry) -> Result<(), PlatformError> {
        (**self).delete_route(route)
    }

    fn interface_index(&self, name: &str) -> Result<u32, PlatformError> {
        (**self).interface_index(name)
    }

    fn supports_parallel_defaults(&self) -> bool {
        (**self).supports_parallel_defaults()
    }
}

/// Outcome of one attempt to copy the table into a caller buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRead {
    /// The buffer now holds the complete table
    Complete,
    /// The table did not fit; `required` is the size the OS asked for
    BufferTooSmall { required: usize },
}

/// Bounded immediate-retry loop for table reads that can report a short buffer
///
/// The buffer grows to at least `required` (and at least double its size)
/// between attempts. Gives up after [`FETCH_ATTEMPTS`] attempts.
pub fn read_table_buffer<F>(initial_len: usize, mut read: F) -> Result<Vec<u8>, PlatformError>
where
    F: FnMut(&mut Vec<u8>) -> Result<TableRead, PlatformError>,
{
    let mut buf = vec![0u8; initial_len];

    for attempt in 1..=FETCH_ATTEMPTS {
        match read(&mut buf)? {
            TableRead::Complete => return Ok(buf),
            TableRead::BufferTooSmall { required } => {
                let grown = required.max(buf.len().saturating_mul(2)).max(1);
                debug!(
                    "Route table buffer too small (attempt {}): {} -> {} bytes",
                    attempt,
                    buf.len(),
                    grown
                );
                buf = vec![0u8; grown];
            }
        }
    }

    Err(PlatformError::ReadTableError(format!(
        "buffer still too small after {} attempts",
        FETCH_ATTEMPTS
    )))
}

/// Get the appropriate routing manager for the current platform
pub fn get_routing_manager() -> Result<Box<dyn RoutingManager>, PlatformError> {
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(mac::MacRoutingManager::new()))
    }

    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxRoutingManager::new()))
    }

    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(windows::WindowsRoutingManager::new()))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        Err(PlatformError::UnsupportedPlatform)
    }
}

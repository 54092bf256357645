//! IPv4 route table model
//!
//! - `entry`: typed route rows and classification helpers
//! - `codec`: bounded decoding of the fixed-width forwarding-table format

pub mod codec;
pub mod entry;

pub use codec::{decode_table, DecodeError};
pub use entry::{mask_to_prefix, prefix_to_mask, RouteEntry, RouteProtocol, RouteTag, RouteType};

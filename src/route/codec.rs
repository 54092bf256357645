//! Fixed-width forwarding-table record decoding
//!
//! Layout: a native-endian `u32` row count followed by `count` rows of
//! [`RECORD_LEN`] bytes each. Address fields are raw network-order octets,
//! every other field is a native-endian `u32`.
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0  | destination |
//! | 4  | mask |
//! | 8  | policy |
//! | 12 | next hop |
//! | 16 | interface index |
//! | 20 | type |
//! | 24 | protocol |
//! | 28 | age |
//! | 32 | next-hop AS |
//! | 36 | metric 1..5 |

use super::entry::{RouteEntry, RouteProtocol, RouteType};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Size of the leading row count
pub const HEADER_LEN: usize = 4;

/// Size of one row
pub const RECORD_LEN: usize = 56;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Route table buffer too short for header: {0} bytes")]
    Truncated(usize),
    #[error("Route table declares {count} rows but buffer holds only {available} bytes")]
    CountExceedsBuffer { count: u32, available: usize },
}

/// Decode a whole table buffer, checking the declared row count against the
/// buffer length before touching any row
pub fn decode_table(buf: &[u8]) -> Result<Vec<RouteEntry>, DecodeError> {
    let header: [u8; HEADER_LEN] = buf
        .get(..HEADER_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or(DecodeError::Truncated(buf.len()))?;
    let count = u32::from_ne_bytes(header);

    let body_len = (count as usize)
        .checked_mul(RECORD_LEN)
        .and_then(|len| len.checked_add(HEADER_LEN))
        .filter(|&needed| needed <= buf.len())
        .ok_or(DecodeError::CountExceedsBuffer {
            count,
            available: buf.len(),
        })?
        - HEADER_LEN;

    Ok(buf[HEADER_LEN..HEADER_LEN + body_len]
        .chunks_exact(RECORD_LEN)
        .map(decode_record)
        .collect())
}

/// Decode a single row; `record` must be exactly [`RECORD_LEN`] bytes
fn decode_record(record: &[u8]) -> RouteEntry {
    let mut reader = FieldReader { buf: record, pos: 0 };

    let destination = reader.addr();
    let mask = reader.addr();
    let policy = reader.u32();
    let gateway = reader.addr();
    let interface_index = reader.u32();
    let route_type = RouteType::from_code(reader.u32());
    let protocol = RouteProtocol::from_code(reader.u32());
    let age = reader.u32();
    let next_hop_as = reader.u32();
    let mut metrics = [0u32; 5];
    for metric in metrics.iter_mut() {
        *metric = reader.u32();
    }

    RouteEntry {
        destination,
        mask,
        gateway,
        interface_index,
        route_type,
        protocol,
        metrics,
        age,
        policy,
        next_hop_as,
    }
}

struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl FieldReader<'_> {
    fn take(&mut self) -> [u8; 4] {
        let mut field = [0u8; 4];
        field.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        field
    }

    fn u32(&mut self) -> u32 {
        u32::from_ne_bytes(self.take())
    }

    fn addr(&mut self) -> Ipv4Addr {
        Ipv4Addr::from(self.take())
    }
}

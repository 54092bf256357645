//! Original default-route resolution

use crate::route::RouteEntry;

/// Find the system's default route (0.0.0.0/0) in a snapshot
///
/// Among several candidates the lowest metric wins; on equal metrics the one
/// that comes first in the snapshot is kept. No default route is a valid
/// system state and yields `None`.
pub fn find_default_route(entries: &[RouteEntry]) -> Option<&RouteEntry> {
    entries
        .iter()
        .filter(|entry| entry.is_default())
        .min_by_key(|entry| entry.metric())
}

/// Look up a previously captured route in a fresh snapshot
pub fn revalidate<'a>(captured: &RouteEntry, snapshot: &'a [RouteEntry]) -> Option<&'a RouteEntry> {
    snapshot.iter().find(|entry| entry.same_route(captured))
}

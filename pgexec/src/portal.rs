//! Server side portals backing forward cursors.
use std::collections::HashSet;

use crate::{
    query::Query,
    row::RowShape,
    statement::PortalName,
};

/// A suspended result set in a named portal.
///
/// Fetch more rows with [`PgExecutor::fetch`][crate::PgExecutor::fetch]. The portal lives
/// until it is exhausted, closed, or its transaction ends.
#[derive(Debug)]
pub struct ResultCursor {
    pub(crate) engine: u32,
    pub(crate) portal: PortalName,
    pub(crate) query: Query,
    pub(crate) shape: Option<RowShape>,
    pub(crate) fetch_size: u32,
    pub(crate) exhausted: bool,
}

impl ResultCursor {
    pub fn portal_name(&self) -> &str {
        self.portal.as_str()
    }

    /// The query that opened this cursor.
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn shape(&self) -> Option<&RowShape> {
        self.shape.as_ref()
    }

    /// Fetch size of the last round trip.
    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    /// Returns `true` once every row was fetched.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Named portals currently open on the server.
///
/// Portals only outlive a sync inside a transaction block, so every portal is dropped when the
/// server reports the connection idle.
#[derive(Debug, Default)]
pub(crate) struct OpenPortals {
    open: HashSet<PortalName>,
}

impl OpenPortals {
    pub(crate) fn insert(&mut self, portal: PortalName) {
        self.open.insert(portal);
    }

    pub(crate) fn remove(&mut self, portal: &PortalName) -> bool {
        self.open.remove(portal)
    }

    pub(crate) fn contains(&self, portal: &PortalName) -> bool {
        self.open.contains(portal)
    }

    /// Forget every portal, returning them.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = PortalName> + '_ {
        self.open.drain()
    }
}

//! Adaptive fetch sizing.
use std::collections::HashMap;

use crate::{config::Config, statement::PortalName};

/// Bounds and target of adaptive fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveFetchBounds {
    pub minimum: u32,
    pub maximum: u32,
    /// Bytes one round trip aims at.
    pub target_bytes: u64,
}

impl AdaptiveFetchBounds {
    pub fn from_config(config: &Config) -> Self {
        let maximum = config.adaptive_fetch_maximum.max(1);
        Self {
            minimum: config.adaptive_fetch_minimum.clamp(1, maximum),
            maximum,
            target_bytes: config.adaptive_fetch_target_bytes,
        }
    }

    fn size_for(&self, row_bytes: u64) -> u32 {
        let rows = self.target_bytes / row_bytes.max(1);
        (rows.min(u32::MAX as u64) as u32).clamp(self.minimum, self.maximum)
    }
}

/// Learned fetch size of one portal.
///
/// The size follows the largest row observed rather than the average, one wide row is enough
/// to keep a round trip within the byte target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveFetchEntry {
    /// Rows to request in the next round trip.
    pub size: u32,
    /// Largest row observed so far.
    pub max_row_bytes: u64,
}

/// Largest row seen during one round trip.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RowSizeProbe {
    max: u64,
}

impl RowSizeProbe {
    pub(crate) fn observe(&mut self, bytes: usize) {
        self.max = self.max.max(bytes as u64);
    }
}

/// Per portal adaptive fetch state.
///
/// The size is derived from the largest row observed, so within a portal it can only shrink
/// once learned, and always stays within the configured bounds.
#[derive(Debug)]
pub(crate) struct AdaptiveFetch {
    bounds: AdaptiveFetchBounds,
    entries: HashMap<PortalName, AdaptiveFetchEntry>,
}

impl AdaptiveFetch {
    pub(crate) fn new(bounds: AdaptiveFetchBounds) -> Self {
        Self { bounds, entries: HashMap::new() }
    }

    pub(crate) fn bounds(&self) -> AdaptiveFetchBounds {
        self.bounds
    }

    /// Fetch size for the next round trip of `portal`, `requested` until something is learned.
    pub(crate) fn size(&self, portal: &PortalName, requested: u32) -> u32 {
        match self.entries.get(portal) {
            Some(entry) => entry.size,
            None => requested.clamp(self.bounds.minimum, self.bounds.maximum),
        }
    }

    /// Record the rows of a completed round trip, returns the new size.
    pub(crate) fn update(&mut self, portal: PortalName, probe: RowSizeProbe, requested: u32) -> u32 {
        let bounds = self.bounds;
        let entry = self.entries.entry(portal).or_insert_with(|| AdaptiveFetchEntry {
            size: requested.clamp(bounds.minimum, bounds.maximum),
            max_row_bytes: 0,
        });
        if probe.max > entry.max_row_bytes {
            entry.max_row_bytes = probe.max;
            entry.size = bounds.size_for(entry.max_row_bytes);
        }
        entry.size
    }

    pub(crate) fn get(&self, portal: &PortalName) -> Option<&AdaptiveFetchEntry> {
        self.entries.get(portal)
    }

    pub(crate) fn remove(&mut self, portal: &PortalName) {
        self.entries.remove(portal);
    }
}

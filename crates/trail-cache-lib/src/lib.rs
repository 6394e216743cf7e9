//! Trail Cache Library - Client-side spatial data cache for a trail map viewer
//!
//! This library decides which cells of trail geometry to fetch as the viewport moves, runs
//! those fetches through a bounded-concurrency throttle with cooperative cancellation,
//! decodes the compact binary wire format, and indexes the decoded entities for hit testing.
//!
//! # Architecture
//!
//! - **[`WireReader`]**: Bounds-checked little-endian cursor over a cell payload
//! - **[`FetchThrottler`]**: FIFO bounded-concurrency scheduler with cancellation tokens
//! - **[`BoundsQuadtree`]**: Spatial index over bounding rectangles with handle-based deletion
//! - **[`ViewportFetchScheduler`]**: Per-tier loaded/in-flight bookkeeping and fetch dispatch
//! - **[`EntityStore`]**: Consumer of load/unload callbacks, owns paths, trails and indices
//!
//! # Data flow
//!
//! A camera change calls [`ViewportFetchScheduler::update_viewport`], which covers the
//! viewport with cells per active tier, starts fetches for new cells and cancels or evicts
//! cells that left view. Completed fetches are applied on the next scheduler call
//! ([`ViewportFetchScheduler::pump`] or [`ViewportFetchScheduler::settle`]), which is where
//! [`CellListener`] callbacks fire.

mod cache;
mod cell;
mod config;
mod covering;
mod entities;
mod quadtree;
mod runtime;
mod scheduler;
mod store;
mod throttle;
mod transport;
pub mod utils;
pub mod wire;

// Public API exports
pub use cell::{CellId, Tier, Viewport};
pub use config::{CacheConfig, TierConfig};
pub use covering::{Coverer, GridCoverer};
pub use entities::{
    CellContent, CellEntities, EMPTY_PAYLOAD_MAX_BYTES, Path, Trail, decode_cell, encode_cell,
    scan_entity_ids,
};
pub use quadtree::{BoundHandle, BoundsQuadtree, MIN_HALF_EXTENT, SPLIT_THRESHOLD};
pub use scheduler::{CellListener, PinRequest, SchedulerStats, ViewportFetchScheduler};
pub use store::{EntityKey, EntityStore, Hit};
pub use throttle::{FetchThrottler, Throttled};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{DirectoryTransport, FetchRequest, Transport};
pub use wire::{WireReader, WireWriter};

/// Error types for the cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Truncated payload at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("Varint overflow at offset {offset}")]
    VarintOverflow { offset: usize },

    #[error("Invalid trail name: {0}")]
    InvalidName(#[from] std::str::Utf8Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No tokio runtime available to spawn fetch tasks")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn() -> CacheConfig = CacheConfig::default;
        let _: fn() -> EntityStore = EntityStore::new;
        let _: fn() -> BoundsQuadtree<EntityKey> = BoundsQuadtree::world;
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::Truncated {
            offset: 4,
            needed: 8,
            remaining: 2,
        };
        assert_eq!(
            err.to_string(),
            "Truncated payload at offset 4: needed 8 bytes, 2 remaining"
        );
    }
}

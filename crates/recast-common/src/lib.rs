//! Common utilities and error types shared by the navmesh tile cache crates

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no free slot left in the {0} pool")]
    OutOfSlots(&'static str),

    #[error("invalid or stale handle: {0:#x}")]
    InvalidHandle(u64),

    #[error("a tile already exists at ({tx}, {ty}, layer {layer})")]
    TileOccupied { tx: i32, ty: i32, layer: i32 },

    #[error("malformed tile layer: {0}")]
    MalformedLayer(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("navmesh assembly failed: {0}")]
    Assembly(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tile cache operations
pub type Result<T> = std::result::Result<T, Error>;

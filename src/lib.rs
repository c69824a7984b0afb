//! zarrkit - chunked array storage
//!
//! A pure Rust engine for large, rectangular, typed arrays stored as
//! independently addressable compressed chunks, organised in a hierarchy of
//! groups described by Zarr v3 style `zarr.json` documents.
//!
//! # Features
//!
//! - Arrays of any dimensionality over a regular chunk grid
//! - Composable codec chains (bytes, gzip, zstd, shuffle, crc32c)
//! - Directory, in-memory and zip archive stores behind one `Store` trait
//! - Hierarchy snapshots that rebuild a group tree in another store
//! - Async I/O throughout
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zarrkit::{ArrayMetadata, DataType, Group, GroupMetadata, MemoryStore, Region};
//!
//! # async fn example() -> zarrkit::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let root = Group::create(store, "", GroupMetadata::new()).await?;
//! let metadata = ArrayMetadata::new(vec![100, 100], vec![10, 10], DataType::Float32, 0.0);
//! let array = root.create_array("temperature", metadata).await?;
//!
//! array.write_region_elements(&Region::new(vec![0, 0], vec![2, 2])?, &[1.0f32; 4]).await?;
//! let values: Vec<f32> = array.read_region_elements(&Region::full(&[100, 100])).await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod array;
pub mod attributes;
pub mod codec;
pub mod error;
pub mod group;
pub mod hierarchy;
pub mod io;
pub mod layout;
pub mod metadata;
pub mod types;
pub mod utils;

// Re-exports
pub use archive::{ArchiveState, ZipStore};
pub use array::{Array, ArrayInfo};
pub use attributes::{AttributeValue, Attributes};
pub use codec::{Codec, CodecChain, CodecDescriptor, CompressionLevel, Endian};
pub use error::{Result, ZarrError};
pub use group::{Group, Node};
pub use hierarchy::{materialize, snapshot, Snapshot, SnapshotEntry};
pub use io::{
    open_store, FileSystemStore, MemoryStore, OpenMode, StorageBackend, Store, StoreConfig,
};
pub use layout::{ChunkGrid, Region};
pub use metadata::{
    ArrayMetadata, ChunkKeyEncoding, ChunkKeySeparator, FillValueMetadata, GroupMetadata,
    NodeMetadata, NodeType,
};
pub use types::{DataType, Element};

/// Version of the zarrkit implementation
pub const ZARRKIT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!ZARRKIT_VERSION.is_empty());
    }
}

//! The on-disk hierarchy: pages inside chunks inside chunk groups, indexed by
//! a footer.
//!
//! ```text
//! "TsFile" | version
//! chunk group*   one device, flushed together
//!   chunk*       one measurement, or every column of an aligned device
//!     page*      encoded, compressed, checksummed
//! footer         metadata index + crc32
//! trailer        footer offset + "TsFile"
//! ```

pub mod chunk;
pub mod chunk_group;
pub mod metadata;
pub mod page;
pub mod reader;
pub mod writer;

pub use chunk::{ChunkHeader, ChunkShape};
pub use chunk_group::ChunkGroupHeader;
pub use metadata::{DeviceStatistics, MetadataIndex, MAGIC, VERSION};
pub use reader::{ChunkGroupSummary, QueryDataSet, TsFileReader};
pub use writer::{TsFileSummary, TsFileWriter};

//! Burrow - Alopex columnar time series file format
//!
//! This crate reads and writes self-describing time series files: per device,
//! measurement columns of (timestamp, value) pairs, encoded, compressed and
//! indexed by a footer so queries can seek instead of scanning.
//!
//! # Components
//!
//! - [`Column`] / [`ColumnData`]: typed positional column buffers
//! - [`encoding`] / [`compression`]: value codecs and byte-block compressors
//! - [`TsFileWriter`]: schema registration, page/chunk/chunk-group assembly
//! - [`TsFileReader`]: footer index, lazy page decode, time-ordered row merge
//!
//! # Example
//!
//! ```rust,no_run
//! use alopex_burrow::{
//!     MeasurementSchema, Path, TSDataType, Tablet, TsFileConfig, TsFileReader, TsFileWriter,
//! };
//!
//! # fn main() -> alopex_burrow::Result<()> {
//! let schemas = vec![
//!     MeasurementSchema::new("s1", TSDataType::Int32),
//!     MeasurementSchema::new("s2", TSDataType::Int64),
//! ];
//! let mut writer = TsFileWriter::create("data.tsfile", TsFileConfig::default())?;
//! for schema in &schemas {
//!     writer.register_timeseries("d1", schema.clone())?;
//! }
//!
//! let mut tablet = Tablet::new("d1", schemas, 2);
//! tablet.add_timestamp(0, 100)?;
//! tablet.add_value(0, 0, 1i32)?;
//! tablet.add_value(0, 1, 10i64)?;
//! writer.write_tablet(&tablet)?;
//! writer.close()?;
//!
//! let reader = TsFileReader::open("data.tsfile")?;
//! for row in reader.query(&[Path::new("d1", "s1"), Path::new("d1", "s2")]) {
//!     println!("{}", row?);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod column;
pub mod compression;
pub mod config;
pub mod encoding;
pub mod error;
pub mod io;
pub mod record;
pub mod schema;
pub mod statistics;
pub mod tsfile;
pub mod types;

pub use column::{Column, ColumnBuilder, ColumnData, ColumnDataBuilder, ColumnValue, NumericValue};
pub use config::TsFileConfig;
pub use error::{Result, TsFileError};
pub use io::{LocalFileInput, LocalFileOutput, MemoryInput, MemoryOutput, TsFileInput, TsFileOutput};
pub use record::{Field, RowRecord, Tablet, TsRecord};
pub use schema::{DeviceSchema, MeasurementSchema, Schema};
pub use statistics::Statistics;
pub use tsfile::{QueryDataSet, TsFileReader, TsFileSummary, TsFileWriter};
pub use types::{CompressionType, Path, TSDataType, TSEncoding, TimeRange, Timestamp, Value};

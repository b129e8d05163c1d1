//! # roundel
//!
//! Embeddable fixed-layout, multi-resolution round-robin time-series store.
//!
//! roundel keeps a metric's recent history in a single preallocated file in
//! the rrdtool storage tradition: a fixed number of retention tiers, each a
//! circular buffer of fixed-length records, with finer tiers rolled up into
//! coarser ones at write time. File size is decided entirely by the schema
//! at creation and never changes afterwards.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Bounded, predictable storage — size is determined by the schema, not
//!   data volume
//! - Multi-resolution retention: e.g. 5s records for 6 hours, 1m for a week,
//!   1h for a month, all in one file
//! - Write-time rollup of finer tiers into coarser ones (sum, iterative
//!   mean, overwrite — per field)
//! - Plain blocking file I/O; handles can be released and reacquired at any
//!   quiescent point
//! - No background threads, no compaction, no garbage collection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roundel::{FieldType, MergeOp, SchemaConfig, Updater, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Timestamp plus one averaged gauge; 5s records for 10 minutes,
//! // 1m records for a day.
//! let schema = SchemaConfig {
//!     name: "cpu.usage".to_string(),
//!     path: "./cpu_usage.rrts".into(),
//!     field_types: vec![FieldType::Int64, FieldType::Float64],
//!     merge_ops: vec![MergeOp::Overwrite, MergeOp::Mean],
//!     block_period_secs: vec![600, 3600 * 24],
//!     record_period_secs: vec![5, 60],
//!     metadata: "{\"unit\":\"percent\"}".to_string(),
//! }
//! .build()?;
//!
//! // Creates the file on first use, validates the header afterwards.
//! let mut updater = Updater::new(schema)?;
//!
//! // Feed timestamped samples; flushing happens at period boundaries.
//! updater.update(1_700_000_000_000, &[Value::Int(0), Value::Float(42.5)])?;
//!
//! // Read a whole tier back, record-major.
//! let tier0 = updater.read_block(0)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`SchemaConfig`] — User-supplied retention plan, validated into a
//!   [`Schema`]
//! - [`Updater`] — Single-writer engine: merges samples, flushes tiers at
//!   period boundaries, rolls finer tiers up into coarser ones
//! - [`StoreFile`] — The on-disk format: header plus contiguous fixed-length
//!   record regions
//! - [`Value`] — One record field, 64-bit integer or float
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`schema`] — Schema configuration, merge operations, retention math
//! - [`updater`] — The update engine and its circular cursors
//! - [`file`] — Raw file format: header codec, record addressing
//! - [`value`] — Field value encoding
//! - [`error`] — Error types

pub mod error;
pub mod file;
pub mod schema;
pub mod updater;
pub mod value;

// Re-export primary API types at crate root for convenience.
pub use error::{Result, RoundelError};
pub use file::StoreFile;
pub use schema::{FieldType, MergeOp, Schema, SchemaConfig};
pub use updater::Updater;
pub use value::Value;

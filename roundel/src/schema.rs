//! Schema configuration and the derived retention plan.
//!
//! A [`SchemaConfig`] is the user-supplied description of a store: field
//! types, per-field merge operations, and per-tier block/record periods.
//! [`SchemaConfig::build`] validates every structural invariant and derives
//! the immutable [`Schema`], which fixes the retention plan (record counts,
//! record periods, rollup windows) for the lifetime of the file.
//!
//! # Periods
//!
//! Periods are supplied in seconds. For example
//!
//! ```text
//! block_period_secs  = [6*3600, 3600*24*7, 3600*24*30]
//! record_period_secs = [5,      60,        3600]
//! ```
//!
//! keeps the last 6 hours at 5s resolution (4320 records), the last 7 days
//! at 1m resolution (10080 records) and the last 30 days at 1h resolution
//! (720 records), all inside one preallocated file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::value::{FIELD_WIDTH, Value};

/// The type of one record field.
///
/// Field 0 is always [`FieldType::Int64`]: it holds the record timestamp in
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// 64-bit signed integer, header code `l`.
    Int64,
    /// 64-bit IEEE-754 float, header code `d`.
    Float64,
}

impl FieldType {
    /// The single-character code used for this type in the file header.
    pub fn code(self) -> char {
        match self {
            Self::Int64 => 'l',
            Self::Float64 => 'd',
        }
    }

    /// Parses a header type code.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'l' => Some(Self::Int64),
            'd' => Some(Self::Float64),
            _ => None,
        }
    }

    /// Parses a compact code string such as `"ldd"` into a field-type
    /// sequence. Returns `None` on the first unknown code.
    pub fn parse_codes(codes: &str) -> Option<Vec<Self>> {
        codes.chars().map(Self::from_code).collect()
    }
}

/// How a new value combines with an accumulator, per field.
///
/// Field 0 is always [`MergeOp::Overwrite`]: timestamps are never aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeOp {
    /// `acc + data`, type-preserving. Integer sums wrap on overflow.
    Sum,
    /// `(acc + data) / nmerges`, applied at **every** fold step.
    ///
    /// This is an iterative approximation, not a true arithmetic mean over
    /// the window: folding `[1, 2, 3, 4, 5]` with a window of 5 yields
    /// `((((1+2)/5 + 3)/5 + 4)/5 + 5)/5`, not 3. The fold is part of the
    /// on-disk contract and is kept as-is for compatibility; callers relying
    /// on exact statistical means must account for it.
    Mean,
    /// `data` — last write wins.
    Overwrite,
}

impl MergeOp {
    /// The single-character code for this operation (`s`, `m`, `v`).
    pub fn code(self) -> char {
        match self {
            Self::Sum => 's',
            Self::Mean => 'm',
            Self::Overwrite => 'v',
        }
    }

    /// Parses an operation code.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            's' => Some(Self::Sum),
            'm' => Some(Self::Mean),
            'v' => Some(Self::Overwrite),
            _ => None,
        }
    }

    /// Parses a compact code string such as `"vsm"` into a merge-op
    /// sequence. Returns `None` on the first unknown code.
    pub fn parse_codes(codes: &str) -> Option<Vec<Self>> {
        codes.chars().map(Self::from_code).collect()
    }

    /// Merges `data` into `acc` with `nmerges` expected contributors.
    ///
    /// If the two payload types disagree, the result is `data`; shape
    /// mismatches are the caller's bug and are caught at the file write
    /// boundary, not here.
    pub fn merge(self, acc: Value, data: Value, nmerges: i64) -> Value {
        match (self, acc, data) {
            (Self::Overwrite, _, d) => d,
            (Self::Sum, Value::Int(a), Value::Int(d)) => Value::Int(a.wrapping_add(d)),
            (Self::Sum, Value::Float(a), Value::Float(d)) => Value::Float(a + d),
            (Self::Mean, Value::Int(a), Value::Int(d)) => Value::Int(a.wrapping_add(d) / nmerges),
            #[allow(clippy::cast_precision_loss)] // window sizes are small
            (Self::Mean, Value::Float(a), Value::Float(d)) => {
                Value::Float((a + d) / nmerges as f64)
            }
            (_, _, d) => d,
        }
    }
}

/// User-supplied description of a store, validated into a [`Schema`].
///
/// Serde-derivable so schemas can be kept in JSON files next to the stores
/// they describe.
///
/// # Example
///
/// ```rust
/// use roundel::schema::{FieldType, MergeOp, SchemaConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let schema = SchemaConfig {
///     name: "requests".to_string(),
///     path: "./requests.rrts".into(),
///     field_types: vec![FieldType::Int64, FieldType::Int64, FieldType::Float64],
///     merge_ops: vec![MergeOp::Overwrite, MergeOp::Sum, MergeOp::Mean],
///     block_period_secs: vec![600, 3600 * 24],
///     record_period_secs: vec![5, 60],
///     metadata: "{}".to_string(),
/// }
/// .build()?;
///
/// assert_eq!(schema.records_in_tier(0), 120);
/// assert_eq!(schema.rollup_window(0), 12);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Internal store name, validated against the file header on reopen.
    pub name: String,

    /// Path of the backing file.
    pub path: PathBuf,

    /// Ordered per-field types. Field 0 must be [`FieldType::Int64`].
    pub field_types: Vec<FieldType>,

    /// Ordered per-field merge operations, one per field. Field 0 must be
    /// [`MergeOp::Overwrite`].
    pub merge_ops: Vec<MergeOp>,

    /// Retention span of each tier in seconds, finest tier first.
    pub block_period_secs: Vec<u64>,

    /// Record granularity of each tier in seconds, finest tier first.
    pub record_period_secs: Vec<u64>,

    /// Opaque descriptive metadata, persisted verbatim in the header.
    /// Conventionally JSON; the engine never interprets it.
    #[serde(default = "default_metadata")]
    pub metadata: String,
}

fn default_metadata() -> String {
    "{}".to_string()
}

impl SchemaConfig {
    /// Validates this configuration and derives the immutable retention plan.
    ///
    /// Per tier `i` the plan fixes
    /// `records_per_tier[i] = block_period[i] / record_period[i]` and, for
    /// `i < tier_count - 1`,
    /// `rollup_window[i] = record_period[i+1] / record_period[i]`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] naming the violated rule if:
    /// - field-type and merge-op counts differ, or no fields are declared
    /// - field 0 is not `Int64`/`Overwrite`
    /// - block- and record-period counts differ, or no tiers are declared
    /// - any tier's block period is not a positive multiple of its record
    ///   period
    /// - record periods are not non-decreasing exact multiples of the
    ///   previous tier's, or exceed the previous tier's block period
    pub fn build(self) -> Result<Schema> {
        if self.field_types.len() != self.merge_ops.len() {
            return Err(SchemaError::FieldCountMismatch {
                field_types: self.field_types.len(),
                merge_ops: self.merge_ops.len(),
            }
            .into());
        }
        if self.field_types.is_empty() {
            return Err(SchemaError::NoFields.into());
        }
        if self.field_types[0] != FieldType::Int64 {
            return Err(SchemaError::TimestampNotInt64.into());
        }
        if self.merge_ops[0] != MergeOp::Overwrite {
            return Err(SchemaError::TimestampNotOverwrite.into());
        }
        if self.block_period_secs.len() != self.record_period_secs.len() {
            return Err(SchemaError::PeriodCountMismatch {
                block_periods: self.block_period_secs.len(),
                record_periods: self.record_period_secs.len(),
            }
            .into());
        }
        if self.block_period_secs.is_empty() {
            return Err(SchemaError::NoTiers.into());
        }

        for tier in 0..self.block_period_secs.len() {
            let block = self.block_period_secs[tier];
            let record = self.record_period_secs[tier];
            if record == 0 {
                return Err(SchemaError::ZeroRecordPeriod { tier }.into());
            }
            if block < record || block % record != 0 {
                return Err(SchemaError::BlockPeriodNotMultiple {
                    tier,
                    block_period: block,
                    record_period: record,
                }
                .into());
            }
            if tier > 0 {
                let previous = self.record_period_secs[tier - 1];
                if record < previous || record % previous != 0 {
                    return Err(SchemaError::RecordPeriodNotMultiple {
                        tier,
                        record_period: record,
                        previous,
                    }
                    .into());
                }
                let previous_block = self.block_period_secs[tier - 1];
                if record > previous_block {
                    return Err(SchemaError::RecordPeriodExceedsBlock {
                        tier,
                        record_period: record,
                        previous_block,
                    }
                    .into());
                }
            }
        }

        #[allow(clippy::cast_possible_truncation)] // bounded by the divisibility checks above
        let records_per_tier: Vec<u32> = self
            .block_period_secs
            .iter()
            .zip(&self.record_period_secs)
            .map(|(block, record)| (block / record) as u32)
            .collect();

        #[allow(clippy::cast_possible_truncation)]
        let rollup_window: Vec<u32> = self
            .record_period_secs
            .windows(2)
            .map(|pair| (pair[1] / pair[0]) as u32)
            .collect();

        #[allow(clippy::cast_possible_wrap)] // periods are far below i64::MAX / 1000
        let record_period_ms: Vec<i64> = self
            .record_period_secs
            .iter()
            .map(|secs| (secs * 1000) as i64)
            .collect();

        let type_codes: String = self.field_types.iter().map(|t| t.code()).collect();

        Ok(Schema {
            name: self.name,
            path: self.path,
            metadata: self.metadata,
            field_types: self.field_types,
            merge_ops: self.merge_ops,
            records_per_tier,
            record_period_ms,
            rollup_window,
            type_codes,
        })
    }
}

/// A validated, immutable retention plan.
///
/// Constructed only by [`SchemaConfig::build`]; every accessor is pure and
/// total given a valid instance. The plan is fixed at file creation and
/// cannot evolve afterwards — a file's header is validated against it
/// byte-for-byte on every reopen.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    path: PathBuf,
    metadata: String,
    field_types: Vec<FieldType>,
    merge_ops: Vec<MergeOp>,
    records_per_tier: Vec<u32>,
    record_period_ms: Vec<i64>,
    rollup_window: Vec<u32>,
    type_codes: String,
}

impl Schema {
    /// The internal store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The opaque metadata string persisted in the header.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Number of retention tiers.
    pub fn tier_count(&self) -> usize {
        self.records_per_tier.len()
    }

    /// Number of fields per record, timestamp included.
    pub fn field_count(&self) -> usize {
        self.field_types.len()
    }

    /// Encoded record length in bytes: fields are packed back-to-back with
    /// no padding, 8 bytes each.
    pub fn record_length(&self) -> u64 {
        (self.field_count() * FIELD_WIDTH) as u64
    }

    /// Record capacity of tier `tier`.
    pub fn records_in_tier(&self, tier: usize) -> usize {
        self.records_per_tier[tier] as usize
    }

    /// Record capacities of all tiers, finest first.
    pub fn records_per_tier(&self) -> &[u32] {
        &self.records_per_tier
    }

    /// Record period of tier `tier` in milliseconds.
    pub fn record_period_ms(&self, tier: usize) -> i64 {
        self.record_period_ms[tier]
    }

    /// Number of tier-`tier` records that roll up into one tier-`tier + 1`
    /// record.
    pub fn rollup_window(&self, tier: usize) -> usize {
        self.rollup_window[tier] as usize
    }

    /// Declared type of field `index`.
    pub fn field_type(&self, index: usize) -> FieldType {
        self.field_types[index]
    }

    /// The per-field types, timestamp first.
    pub fn field_types(&self) -> &[FieldType] {
        &self.field_types
    }

    /// Declared merge operation of field `index`.
    pub fn merge_op(&self, index: usize) -> MergeOp {
        self.merge_ops[index]
    }

    /// The field-type code string as stored in the header, e.g. `"lddd"`.
    pub fn type_codes(&self) -> &str {
        &self.type_codes
    }

    /// An all-zero record of this schema's shape.
    pub fn default_record(&self) -> Vec<Value> {
        self.field_types
            .iter()
            .map(|t| Value::default_for(*t))
            .collect()
    }

    /// Merges `data` into `acc` field by field, each with its declared
    /// operation and `nmerges` expected contributors.
    ///
    /// Both slices must be schema-shaped; extra fields in either are ignored.
    pub fn merge_record(&self, acc: &mut [Value], data: &[Value], nmerges: i64) {
        for index in 0..self.field_count().min(acc.len()).min(data.len()) {
            acc[index] = self.merge_ops[index].merge(acc[index], data[index], nmerges);
        }
    }
}

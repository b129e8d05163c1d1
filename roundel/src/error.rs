//! Error types for the roundel time-series storage engine.

use thiserror::Error;

/// The main error type for all roundel operations.
///
/// Every failure mode surfaces through this enum. None of the variants are
/// retried internally; errors propagate to the immediate caller, who decides
/// whether to skip the affected store and continue with others.
#[derive(Error, Debug)]
pub enum RoundelError {
    /// A schema invariant was violated at build time.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// An existing file's header disagrees with the expected schema.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// A tier/record/field address was outside valid bounds.
    #[error("access error: {0}")]
    Access(#[from] AccessError),

    /// An underlying read/write/seek failure.
    #[error("file I/O error: {0}")]
    Io(#[from] FileIoError),
}

/// Errors raised while validating a schema configuration.
///
/// These are always fatal to `build`: the caller must fix the configuration
/// before retrying. They are never raised mid-operation.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Field-type and merge-op sequences have different lengths.
    #[error("field count mismatch: {field_types} field types but {merge_ops} merge operations")]
    FieldCountMismatch {
        /// Number of declared field types.
        field_types: usize,
        /// Number of declared merge operations.
        merge_ops: usize,
    },

    /// No fields were declared at all.
    #[error("at least one field (the timestamp) must be declared")]
    NoFields,

    /// Field 0 must be a 64-bit integer to hold timestamps.
    #[error("the first field must be Int64 to hold timestamps")]
    TimestampNotInt64,

    /// Field 0 must merge by overwrite, as it is a timestamp.
    #[error("the first field must merge by overwrite as it is a timestamp")]
    TimestampNotOverwrite,

    /// Block-period and record-period vectors have different lengths.
    #[error("period count mismatch: {block_periods} block periods but {record_periods} record periods")]
    PeriodCountMismatch {
        /// Number of block periods supplied.
        block_periods: usize,
        /// Number of record periods supplied.
        record_periods: usize,
    },

    /// No tiers were configured.
    #[error("at least one tier must be configured")]
    NoTiers,

    /// A tier's block period is not a positive multiple of its record period.
    #[error(
        "tier {tier}: block period {block_period}s must be >= record period {record_period}s and an exact multiple of it"
    )]
    BlockPeriodNotMultiple {
        /// The offending tier index.
        tier: usize,
        /// The tier's block period in seconds.
        block_period: u64,
        /// The tier's record period in seconds.
        record_period: u64,
    },

    /// Record periods must be non-decreasing and each a multiple of the previous.
    #[error(
        "tier {tier}: record period {record_period}s must be an exact multiple of the previous tier's record period {previous}s"
    )]
    RecordPeriodNotMultiple {
        /// The offending tier index.
        tier: usize,
        /// The tier's record period in seconds.
        record_period: u64,
        /// The previous tier's record period in seconds.
        previous: u64,
    },

    /// A tier's record period exceeds the previous tier's block period.
    #[error(
        "tier {tier}: record period {record_period}s must not exceed the previous tier's block period {previous_block}s"
    )]
    RecordPeriodExceedsBlock {
        /// The offending tier index.
        tier: usize,
        /// The tier's record period in seconds.
        record_period: u64,
        /// The previous tier's block period in seconds.
        previous_block: u64,
    },

    /// A record period of zero is meaningless.
    #[error("tier {tier}: record period must be non-zero")]
    ZeroRecordPeriod {
        /// The offending tier index.
        tier: usize,
    },
}

/// Errors raised when an existing file's header does not match expectations.
///
/// Any of these is fatal for the file: the engine must not proceed to read
/// or write records through a mismatched header.
#[derive(Error, Debug)]
pub enum FormatError {
    /// The format tag at the start of the file is not a recognised version.
    #[error("'{path}': format tag {found:?} is not a recognised format")]
    UnrecognizedFormat {
        /// The file path.
        path: String,
        /// The tag actually stored in the file.
        found: String,
    },

    /// The store name in the header differs from the expected name.
    #[error("'{path}': store name mismatch, found {found:?} expected {expected:?}")]
    NameMismatch {
        /// The file path.
        path: String,
        /// The name stored in the file.
        found: String,
        /// The name the caller expected.
        expected: String,
    },

    /// The stored tier-record-count vector has the wrong length.
    #[error("'{path}': tier count mismatch, found {found} expected {expected}")]
    TierCountMismatch {
        /// The file path.
        path: String,
        /// Tier count stored in the file.
        found: usize,
        /// Tier count the caller expected.
        expected: usize,
    },

    /// The stored field-type code sequence differs from the expected one.
    #[error("'{path}': field types mismatch, found {found:?} expected {expected:?}")]
    FieldTypesMismatch {
        /// The file path.
        path: String,
        /// Field-type codes stored in the file.
        found: String,
        /// Field-type codes the caller expected.
        expected: String,
    },

    /// The stored record length disagrees with the value recomputed from the
    /// field types.
    #[error("'{path}': record length mismatch, found {found} expected {expected}")]
    RecordLengthMismatch {
        /// Record length stored in the file.
        found: u64,
        /// Record length recomputed from the field types.
        expected: u64,
        /// The file path.
        path: String,
    },

    /// The end-of-header sentinel is absent or mismatched, or the header is
    /// otherwise unreadable.
    #[error("'{path}': corrupt header: {reason}")]
    CorruptHeader {
        /// The file path.
        path: String,
        /// Description of what was wrong.
        reason: String,
    },
}

/// Errors raised when addressing outside valid bounds.
///
/// These indicate a caller bug and are always fatal to the call.
#[derive(Error, Debug)]
pub enum AccessError {
    /// The tier index is outside `[0, tier_count)`.
    #[error("tier {tier} does not exist, store has {tier_count} tiers")]
    TierNotFound {
        /// The requested tier index.
        tier: usize,
        /// The number of tiers in the store.
        tier_count: usize,
    },

    /// The record index is outside `[0, records_in_tier)`.
    #[error("record {record} is out of range for tier {tier} with {capacity} records")]
    RecordOutOfRange {
        /// The tier being addressed.
        tier: usize,
        /// The requested record slot.
        record: usize,
        /// The tier's record capacity.
        capacity: usize,
    },

    /// A record had the wrong number of fields for the store's schema.
    #[error("record has {found} fields, schema declares {expected}")]
    FieldCount {
        /// The number of fields the schema declares.
        expected: usize,
        /// The number of fields in the offending record.
        found: usize,
    },

    /// A field value's type did not match the schema's declared type.
    #[error("field {index} has type code '{found}', schema declares '{expected}'")]
    FieldType {
        /// The offending field index.
        index: usize,
        /// The declared type code.
        expected: char,
        /// The type code of the supplied value.
        found: char,
    },
}

/// Errors from the underlying file descriptor.
#[derive(Error, Debug)]
pub enum FileIoError {
    /// Failed to open or create the store file.
    #[error("failed to open '{path}': {source}")]
    Open {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to read from the store file.
    #[error("failed to read '{path}': {source}")]
    Read {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write to the store file.
    #[error("failed to write '{path}': {source}")]
    Write {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to seek within the store file.
    #[error("failed to seek in '{path}': {source}")]
    Seek {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for `Result<T, RoundelError>`.
pub type Result<T> = std::result::Result<T, RoundelError>;

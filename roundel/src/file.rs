//! Fixed-layout binary store file.
//!
//! A store file is a header followed by `tier_count` contiguous regions of
//! fixed-length records; region `t` holds `records_per_tier[t]` records and
//! is addressed as a circular buffer by the update engine. The whole file is
//! preallocated at creation, so its size never changes afterwards.
//!
//! # File format
//!
//! All integers are big-endian; strings are UTF-8 with a u16 big-endian
//! length prefix.
//!
//! ```text
//! string  format tag ("TSDBv1")
//! string  store name
//! i32     tier count
//! i32 × tier count   records per tier
//! string  field-type codes, one char per field ('l' = Int64, 'd' = Float64)
//! i64     record length in bytes
//! string  metadata (opaque to the engine)
//! i32     end-of-header sentinel (28_193_746)
//! ----    end_header_offset
//! tier 0: records_per_tier[0] × record_length bytes
//! tier 1: records_per_tier[1] × record_length bytes
//! ...
//! ```
//!
//! Fields are encoded back-to-back in declared order with no padding, 8
//! bytes each (see [`Value`]).

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{AccessError, FileIoError, FormatError, Result};
use crate::schema::FieldType;
use crate::value::{FIELD_WIDTH, Value};

/// Format tag written at the start of every store file.
const FORMAT_TAG: &str = "TSDBv1";

/// Sentinel written immediately after the header fields.
const END_OF_HEADER_MARKER: i32 = 28_193_746;

/// One open store file with seek-addressed fixed-length record I/O.
///
/// The handle is plain blocking file I/O, acquired on open and released on
/// drop. The engine layers circular-buffer cursors on top; this type knows
/// only absolute (tier, record) addressing.
///
/// # Single writer
///
/// A store file assumes single-writer ownership. There is no locking;
/// concurrent writers, even from the same process, will corrupt it.
#[derive(Debug)]
pub struct StoreFile {
    file: File,
    path: PathBuf,
    name: String,
    records_per_tier: Vec<u32>,
    field_types: Vec<FieldType>,
    metadata: String,
    record_length: u64,
    end_header_offset: u64,
}

impl StoreFile {
    /// Creates a new store file at `path`, writing the header and filling
    /// every record slot of every tier with the all-zero default record.
    ///
    /// The resulting file size is deterministic:
    /// `end_header_offset + Σ records_per_tier[t] * record_length`.
    ///
    /// # Errors
    ///
    /// Returns [`FileIoError`] if the file already exists or cannot be
    /// written.
    pub fn create(
        path: impl AsRef<Path>,
        name: &str,
        records_per_tier: &[u32],
        field_types: &[FieldType],
        metadata: &str,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let record_length = (field_types.len() * FIELD_WIDTH) as u64;

        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| FileIoError::Open {
                path: path.display().to_string(),
                source: e,
            })?;

        let mut header = Vec::new();
        write_utf(&mut header, FORMAT_TAG);
        write_utf(&mut header, name);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        header.extend_from_slice(&(records_per_tier.len() as i32).to_be_bytes());
        for count in records_per_tier {
            #[allow(clippy::cast_possible_wrap)]
            header.extend_from_slice(&(*count as i32).to_be_bytes());
        }
        let type_codes: String = field_types.iter().map(|t| t.code()).collect();
        write_utf(&mut header, &type_codes);
        #[allow(clippy::cast_possible_wrap)]
        header.extend_from_slice(&(record_length as i64).to_be_bytes());
        write_utf(&mut header, metadata);
        header.extend_from_slice(&END_OF_HEADER_MARKER.to_be_bytes());

        file.write_all(&header).map_err(|e| FileIoError::Write {
            path: path.display().to_string(),
            source: e,
        })?;
        let end_header_offset = header.len() as u64;

        // Fill every slot with the default record so the file reaches its
        // final size immediately. The default record is all zero bytes for
        // both field types.
        #[allow(clippy::cast_possible_truncation)]
        let zero_record = vec![0u8; record_length as usize];
        for count in records_per_tier {
            for _ in 0..*count {
                file.write_all(&zero_record).map_err(|e| FileIoError::Write {
                    path: path.display().to_string(),
                    source: e,
                })?;
            }
        }

        debug!(
            path = %path.display(),
            name,
            tiers = records_per_tier.len(),
            record_length,
            "created store file"
        );

        Ok(Self {
            file,
            path,
            name: name.to_string(),
            records_per_tier: records_per_tier.to_vec(),
            field_types: field_types.to_vec(),
            metadata: metadata.to_string(),
            record_length,
            end_header_offset,
        })
    }

    /// Opens an existing store file and validates its header against the
    /// expected schema shape.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] if the format tag is unrecognised, the stored
    /// name differs, the stored tier-record-count vector has the wrong
    /// length, the stored field-type sequence differs, or the stored record
    /// length disagrees with the value recomputed from `field_types`; a
    /// missing or mismatched end-of-header sentinel (including a truncated
    /// header) is reported as a corrupt header. Returns [`FileIoError`] for
    /// underlying I/O failures.
    pub fn open(
        path: impl AsRef<Path>,
        name: &str,
        records_per_tier: &[u32],
        field_types: &[FieldType],
        metadata: &str,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = open_rw(&path)?;
        let header = read_header(&mut file, &path)?;

        if header.marker != END_OF_HEADER_MARKER {
            return Err(FormatError::CorruptHeader {
                path: path.display().to_string(),
                reason: format!(
                    "end-of-header marker missing, found {} expected {}",
                    header.marker, END_OF_HEADER_MARKER
                ),
            }
            .into());
        }
        if header.name != name {
            return Err(FormatError::NameMismatch {
                path: path.display().to_string(),
                found: header.name,
                expected: name.to_string(),
            }
            .into());
        }
        if header.records_per_tier.len() != records_per_tier.len() {
            return Err(FormatError::TierCountMismatch {
                path: path.display().to_string(),
                found: header.records_per_tier.len(),
                expected: records_per_tier.len(),
            }
            .into());
        }
        let type_codes: String = field_types.iter().map(|t| t.code()).collect();
        if header.type_codes != type_codes {
            return Err(FormatError::FieldTypesMismatch {
                path: path.display().to_string(),
                found: header.type_codes,
                expected: type_codes,
            }
            .into());
        }
        let expected_length = (field_types.len() * FIELD_WIDTH) as u64;
        if header.record_length != expected_length {
            return Err(FormatError::RecordLengthMismatch {
                path: path.display().to_string(),
                found: header.record_length,
                expected: expected_length,
            }
            .into());
        }

        debug!(path = %path.display(), name, "opened store file");

        Ok(Self {
            file,
            path,
            name: name.to_string(),
            records_per_tier: records_per_tier.to_vec(),
            field_types: field_types.to_vec(),
            metadata: metadata.to_string(),
            record_length: header.record_length,
            end_header_offset: header.end_offset,
        })
    }

    /// Opens the file at `path` if it exists, otherwise creates it.
    ///
    /// This is the entry point the update engine uses: the first updater
    /// bound to a schema creates the file, every later one validates against
    /// the existing header.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::open`] or [`Self::create`] failures.
    pub fn open_or_create(
        path: impl AsRef<Path>,
        name: &str,
        records_per_tier: &[u32],
        field_types: &[FieldType],
        metadata: &str,
    ) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path, name, records_per_tier, field_types, metadata)
        } else {
            Self::create(path, name, records_per_tier, field_types, metadata)
        }
    }

    /// Opens a store file from its header alone, without an expected schema.
    ///
    /// The stored name, tier record counts, field types and metadata are
    /// trusted as read. Intended for inspection tooling; the update engine
    /// always opens with full validation.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] if the format tag is unrecognised, the
    /// sentinel is absent, the field-type codes contain an unknown code, or
    /// the stored record length is inconsistent with the field count.
    pub fn open_unchecked(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = open_rw(&path)?;
        let header = read_header(&mut file, &path)?;

        if header.marker != END_OF_HEADER_MARKER {
            return Err(FormatError::CorruptHeader {
                path: path.display().to_string(),
                reason: format!(
                    "end-of-header marker missing, found {} expected {}",
                    header.marker, END_OF_HEADER_MARKER
                ),
            }
            .into());
        }
        let field_types: Vec<FieldType> = header
            .type_codes
            .chars()
            .map(|c| {
                FieldType::from_code(c).ok_or_else(|| FormatError::CorruptHeader {
                    path: path.display().to_string(),
                    reason: format!("unknown field-type code '{c}'"),
                })
            })
            .collect::<std::result::Result<_, _>>()?;
        let expected_length = (field_types.len() * FIELD_WIDTH) as u64;
        if header.record_length != expected_length {
            return Err(FormatError::CorruptHeader {
                path: path.display().to_string(),
                reason: format!(
                    "record length {} inconsistent with {} fields",
                    header.record_length,
                    field_types.len()
                ),
            }
            .into());
        }

        Ok(Self {
            file,
            path,
            name: header.name,
            records_per_tier: header.records_per_tier,
            field_types,
            metadata: header.metadata,
            record_length: header.record_length,
            end_header_offset: header.end_offset,
        })
    }

    /// Positions the file at (tier, record).
    ///
    /// The absolute offset is
    /// `end_header_offset + Σ_{t<tier} records_per_tier[t] * record_length
    /// + record * record_length`.
    ///
    /// # Errors
    ///
    /// [`AccessError::TierNotFound`] if `tier` is outside
    /// `[0, tier_count)`; [`AccessError::RecordOutOfRange`] if `record` is
    /// outside `[0, records_per_tier[tier])`.
    fn seek(&mut self, tier: usize, record: usize) -> Result<()> {
        self.check_bounds(tier, record)?;
        let mut offset = self.end_header_offset;
        for t in 0..tier {
            offset += u64::from(self.records_per_tier[t]) * self.record_length;
        }
        offset += record as u64 * self.record_length;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| FileIoError::Seek {
                path: self.path.display().to_string(),
                source: e,
            })?;
        Ok(())
    }

    fn check_bounds(&self, tier: usize, record: usize) -> Result<()> {
        let Some(capacity) = self.records_per_tier.get(tier) else {
            return Err(AccessError::TierNotFound {
                tier,
                tier_count: self.records_per_tier.len(),
            }
            .into());
        };
        if record >= *capacity as usize {
            return Err(AccessError::RecordOutOfRange {
                tier,
                record,
                capacity: *capacity as usize,
            }
            .into());
        }
        Ok(())
    }

    /// Writes one record at (tier, record).
    ///
    /// # Errors
    ///
    /// Bounds violations as for [`Self::seek`];
    /// [`AccessError::FieldCount`] / [`AccessError::FieldType`] if `fields`
    /// does not match the schema shape; [`FileIoError`] for I/O failures.
    pub fn write_record(&mut self, tier: usize, record: usize, fields: &[Value]) -> Result<()> {
        if fields.len() != self.field_types.len() {
            return Err(AccessError::FieldCount {
                expected: self.field_types.len(),
                found: fields.len(),
            }
            .into());
        }
        for (index, (value, declared)) in fields.iter().zip(&self.field_types).enumerate() {
            if value.field_type() != *declared {
                return Err(AccessError::FieldType {
                    index,
                    expected: declared.code(),
                    found: value.field_type().code(),
                }
                .into());
            }
        }

        self.seek(tier, record)?;
        #[allow(clippy::cast_possible_truncation)]
        let mut buf = Vec::with_capacity(self.record_length as usize);
        for value in fields {
            buf.extend_from_slice(&value.encode());
        }
        self.file.write_all(&buf).map_err(|e| FileIoError::Write {
            path: self.path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Reads one record at (tier, record).
    ///
    /// # Errors
    ///
    /// Bounds violations as for [`Self::seek`]; [`FileIoError`] for I/O
    /// failures.
    pub fn read_record(&mut self, tier: usize, record: usize) -> Result<Vec<Value>> {
        self.seek(tier, record)?;
        #[allow(clippy::cast_possible_truncation)]
        let mut buf = vec![0u8; self.record_length as usize];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| FileIoError::Read {
                path: self.path.display().to_string(),
                source: e,
            })?;
        Ok(self.decode_record(&buf))
    }

    /// Reads every record of a tier as one flat sequence in record-major
    /// order: record 0's fields, then record 1's, and so on.
    ///
    /// # Errors
    ///
    /// [`AccessError::TierNotFound`] if `tier` is outside `[0, tier_count)`;
    /// [`FileIoError`] for I/O failures.
    pub fn read_block(&mut self, tier: usize) -> Result<Vec<Value>> {
        self.seek(tier, 0)?;
        let capacity = self.records_per_tier[tier] as usize;
        #[allow(clippy::cast_possible_truncation)]
        let record_length = self.record_length as usize;
        let mut buf = vec![0u8; capacity * record_length];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| FileIoError::Read {
                path: self.path.display().to_string(),
                source: e,
            })?;

        let mut values = Vec::with_capacity(capacity * self.field_types.len());
        for record in buf.chunks_exact(record_length) {
            values.extend(self.decode_record(record));
        }
        Ok(values)
    }

    fn decode_record(&self, bytes: &[u8]) -> Vec<Value> {
        self.field_types
            .iter()
            .zip(bytes.chunks_exact(FIELD_WIDTH))
            .map(|(field_type, chunk)| {
                let mut raw = [0u8; FIELD_WIDTH];
                raw.copy_from_slice(chunk);
                Value::decode(*field_type, raw)
            })
            .collect()
    }

    /// A diagnostic dump of the store's layout. Observational only.
    pub fn info(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "name: {}", self.name);
        let _ = writeln!(out, "records per tier: {:?}", self.records_per_tier);
        let _ = writeln!(out, "record length: {} bytes", self.record_length);
        let type_codes: String = self.field_types.iter().map(|t| t.code()).collect();
        let _ = writeln!(out, "field types: {type_codes}");
        let _ = writeln!(out, "end of header offset: {}", self.end_header_offset);
        let _ = writeln!(out, "total size: {} bytes", self.len_bytes());
        let _ = write!(out, "metadata: {}", self.metadata);
        out
    }

    /// The deterministic total file size in bytes.
    pub fn len_bytes(&self) -> u64 {
        let records: u64 = self.records_per_tier.iter().map(|c| u64::from(*c)).sum();
        self.end_header_offset + records * self.record_length
    }

    /// The store name from the header.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record capacity of each tier, finest first.
    pub fn records_per_tier(&self) -> &[u32] {
        &self.records_per_tier
    }

    /// The per-field types, timestamp first.
    pub fn field_types(&self) -> &[FieldType] {
        &self.field_types
    }

    /// Encoded record length in bytes.
    pub fn record_length(&self) -> u64 {
        self.record_length
    }

    /// Byte offset of the first record region.
    pub fn end_header_offset(&self) -> u64 {
        self.end_header_offset
    }

    /// The opaque metadata string.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }
}

/// Parsed header fields, prior to validation.
struct Header {
    name: String,
    records_per_tier: Vec<u32>,
    type_codes: String,
    record_length: u64,
    metadata: String,
    marker: i32,
    end_offset: u64,
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| {
            FileIoError::Open {
                path: path.display().to_string(),
                source: e,
            }
            .into()
        })
}

/// Reads and structurally parses the header, leaving the file positioned at
/// the end of it. Fails fast on an unrecognised format tag; all other
/// validation is left to the caller.
fn read_header(file: &mut File, path: &Path) -> Result<Header> {
    let tag = read_utf(file, path)?;
    if tag != FORMAT_TAG {
        return Err(FormatError::UnrecognizedFormat {
            path: path.display().to_string(),
            found: tag,
        }
        .into());
    }

    let name = read_utf(file, path)?;
    let tier_count = read_i32(file, path)?;
    if !(0..=4096).contains(&tier_count) {
        return Err(FormatError::CorruptHeader {
            path: path.display().to_string(),
            reason: format!("implausible tier count {tier_count}"),
        }
        .into());
    }
    #[allow(clippy::cast_sign_loss)]
    let mut records_per_tier = Vec::with_capacity(tier_count as usize);
    for _ in 0..tier_count {
        let count = read_i32(file, path)?;
        if count < 0 {
            return Err(FormatError::CorruptHeader {
                path: path.display().to_string(),
                reason: format!("negative tier record count {count}"),
            }
            .into());
        }
        #[allow(clippy::cast_sign_loss)]
        records_per_tier.push(count as u32);
    }
    let type_codes = read_utf(file, path)?;
    let record_length = read_i64(file, path)?;
    if record_length < 0 {
        return Err(FormatError::CorruptHeader {
            path: path.display().to_string(),
            reason: format!("negative record length {record_length}"),
        }
        .into());
    }
    let metadata = read_utf(file, path)?;
    let marker = read_i32(file, path)?;
    let end_offset = file
        .stream_position()
        .map_err(|e| FileIoError::Seek {
            path: path.display().to_string(),
            source: e,
        })?;

    #[allow(clippy::cast_sign_loss)]
    Ok(Header {
        name,
        records_per_tier,
        type_codes,
        record_length: record_length as u64,
        metadata,
        marker,
        end_offset,
    })
}

/// Appends a u16-length-prefixed UTF-8 string. Strings longer than u16::MAX
/// bytes are truncated at a char boundary; header strings never get near
/// that in practice.
fn write_utf(buf: &mut Vec<u8>, s: &str) {
    let mut bytes = s.as_bytes();
    if bytes.len() > usize::from(u16::MAX) {
        let mut cut = usize::from(u16::MAX);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        bytes = &s.as_bytes()[..cut];
    }
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Reads a u16-length-prefixed UTF-8 string from the header region. A short
/// read is reported as a corrupt header rather than a raw I/O error, since
/// the fixed preamble must always be present in full.
fn read_utf(file: &mut File, path: &Path) -> Result<String> {
    let mut len_bytes = [0u8; 2];
    header_read(file, path, &mut len_bytes)?;
    let len = usize::from(u16::from_be_bytes(len_bytes));
    let mut bytes = vec![0u8; len];
    header_read(file, path, &mut bytes)?;
    String::from_utf8(bytes).map_err(|_| {
        FormatError::CorruptHeader {
            path: path.display().to_string(),
            reason: "header string is not valid UTF-8".to_string(),
        }
        .into()
    })
}

fn read_i32(file: &mut File, path: &Path) -> Result<i32> {
    let mut bytes = [0u8; 4];
    header_read(file, path, &mut bytes)?;
    Ok(i32::from_be_bytes(bytes))
}

fn read_i64(file: &mut File, path: &Path) -> Result<i64> {
    let mut bytes = [0u8; 8];
    header_read(file, path, &mut bytes)?;
    Ok(i64::from_be_bytes(bytes))
}

fn header_read(file: &mut File, path: &Path, buf: &mut [u8]) -> Result<()> {
    file.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FormatError::CorruptHeader {
                path: path.display().to_string(),
                reason: "truncated header".to_string(),
            }
            .into()
        } else {
            crate::RoundelError::Io(FileIoError::Read {
                path: path.display().to_string(),
                source: e,
            })
        }
    })
}

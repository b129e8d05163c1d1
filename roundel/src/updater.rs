//! The single-writer update engine.
//!
//! An [`Updater`] owns one store file and applies a stream of timestamped
//! samples to it. Samples are folded into an in-memory live record between
//! period boundaries; whenever a sample's timestamp reaches a tier's next
//! deadline the pending state is flushed to that tier's current slot and the
//! tier's circular cursor advances. Coarser tiers are filled by rolling up a
//! window of the most recently written finer-tier records.
//!
//! The live record is never cleared by a flush. Sum fields therefore hold
//! running totals across the whole stream (callers wanting per-period deltas
//! submit increments), and mean fields decay previous samples through the
//! iterative two-way fold rather than restarting each period.

use tracing::{debug, trace};

use crate::error::{AccessError, Result};
use crate::file::StoreFile;
use crate::schema::Schema;
use crate::value::Value;

/// Applies timestamped samples to a store file.
///
/// Exactly one updater may be bound to a given file at a time; there is no
/// cross-process locking. The file handle is acquired lazily on the first
/// flush and can be released at any quiescent point with [`Updater::close`],
/// after which the next flush transparently reopens it.
///
/// # Example
///
/// ```no_run
/// use roundel::{FieldType, MergeOp, SchemaConfig, Updater, Value};
///
/// # fn main() -> roundel::Result<()> {
/// let schema = SchemaConfig {
///     name: "cpu".to_string(),
///     path: "/var/lib/metrics/cpu.rrts".into(),
///     field_types: vec![FieldType::Int64, FieldType::Float64],
///     merge_ops: vec![MergeOp::Overwrite, MergeOp::Mean],
///     block_period_secs: vec![300, 3600],
///     record_period_secs: vec![5, 60],
///     metadata: "{}".to_string(),
/// }
/// .build()?;
///
/// let mut updater = Updater::new(schema)?;
/// updater.update(1_700_000_000_000, &[Value::Int(0), Value::Float(0.37)])?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Updater {
    schema: Schema,
    file: Option<StoreFile>,
    /// Next slot to write in each tier.
    cursors: Vec<usize>,
    /// Flush deadline of each tier in epoch milliseconds; 0 until the first
    /// sample arrives.
    next_write: Vec<i64>,
    /// The merged pending record, present once the first sample has arrived.
    live: Option<Vec<Value>>,
}

impl Updater {
    /// Binds an updater to the file described by `schema`, creating the file
    /// if it does not exist and validating its header if it does.
    ///
    /// The validated handle is released immediately; updating reopens it on
    /// demand.
    ///
    /// # Errors
    ///
    /// Propagates file creation and header validation failures.
    pub fn new(schema: Schema) -> Result<Self> {
        // Create or validate eagerly so a misconfigured store surfaces at
        // startup rather than at the first flush.
        let file = StoreFile::open_or_create(
            schema.path(),
            schema.name(),
            schema.records_per_tier(),
            schema.field_types(),
            schema.metadata(),
        )?;
        drop(file);

        let tiers = schema.tier_count();
        Ok(Self {
            schema,
            file: None,
            cursors: vec![0; tiers],
            next_write: vec![0; tiers],
            live: None,
        })
    }

    /// Applies one sample observed at `tnow_ms` (epoch milliseconds).
    ///
    /// The first sample becomes the live record verbatim and sets every
    /// tier's deadline to the first period boundary strictly after
    /// `tnow_ms`. Later samples merge into the live record field by field
    /// with a merge count of 2. Afterwards every tier whose deadline has
    /// been reached is flushed, repeatedly if more than one period elapsed
    /// since the last update, so gaps in the sample stream still advance the
    /// cursors past the missed slots.
    ///
    /// Field 0 of `sample` is a placeholder; the stored timestamp is always
    /// the flush deadline, so record timestamps land exactly on period
    /// boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError`] if `sample` does not match the schema shape,
    /// and propagates file I/O failures from flushing.
    pub fn update(&mut self, tnow_ms: i64, sample: &[Value]) -> Result<()> {
        self.check_sample(sample)?;

        match &mut self.live {
            None => {
                self.live = Some(sample.to_vec());
                for tier in 0..self.schema.tier_count() {
                    let period = self.schema.record_period_ms(tier);
                    // First boundary strictly after the sample, so the first
                    // flush always covers a full period of merges.
                    self.next_write[tier] = (tnow_ms.div_euclid(period) + 1) * period;
                }
                debug!(
                    store = self.schema.name(),
                    tnow_ms,
                    deadlines = ?self.next_write,
                    "first sample, deadlines initialised"
                );
            }
            Some(live) => {
                self.schema.merge_record(live, sample, 2);
                trace!(store = self.schema.name(), tnow_ms, "sample merged");
            }
        }

        self.flush_due(tnow_ms)
    }

    /// Flushes every tier whose deadline has passed, finest tier first so
    /// that rollups always read records written in the same pass.
    fn flush_due(&mut self, tnow_ms: i64) -> Result<()> {
        for tier in 0..self.schema.tier_count() {
            while tnow_ms >= self.next_write[tier] {
                self.flush_tier(tier)?;
                self.next_write[tier] += self.schema.record_period_ms(tier);
            }
        }
        Ok(())
    }

    fn flush_tier(&mut self, tier: usize) -> Result<()> {
        let deadline = self.next_write[tier];
        let cursor = self.cursors[tier];
        let mut record = if tier == 0 {
            // The live record is written as-is and kept for further merging.
            match &self.live {
                Some(live) => live.clone(),
                None => return Ok(()),
            }
        } else {
            self.roll_up(tier)?
        };
        record[0] = Value::Int(deadline);

        let capacity = self.schema.records_in_tier(tier);
        self.file()?.write_record(tier, cursor, &record)?;
        self.cursors[tier] = (cursor + 1) % capacity;

        debug!(
            store = self.schema.name(),
            tier,
            slot = cursor,
            deadline,
            "record flushed"
        );
        Ok(())
    }

    /// Folds the window of most recently written tier `tier - 1` records
    /// into one coarser record. The window ends at that tier's cursor, so it
    /// covers exactly the records flushed since the previous rollup,
    /// wrapping around the circular buffer when needed.
    ///
    /// The first window record seeds the accumulator verbatim; every later
    /// one merges in with the window length as the merge count.
    fn roll_up(&mut self, tier: usize) -> Result<Vec<Value>> {
        let window = self.schema.rollup_window(tier - 1);
        let capacity = self.schema.records_in_tier(tier - 1);
        let start = self.cursors[tier - 1] + capacity - (window % capacity);

        let mut acc: Option<Vec<Value>> = None;
        #[allow(clippy::cast_possible_wrap)]
        for i in 0..window {
            let slot = (start + i) % capacity;
            let record = self.file()?.read_record(tier - 1, slot)?;
            match &mut acc {
                None => acc = Some(record),
                Some(acc) => self.schema.merge_record(acc, &record, window as i64),
            }
        }
        // window >= 1 is guaranteed by schema validation
        Ok(acc.unwrap_or_else(|| self.schema.default_record()))
    }

    fn check_sample(&self, sample: &[Value]) -> Result<()> {
        if sample.len() != self.schema.field_count() {
            return Err(AccessError::FieldCount {
                expected: self.schema.field_count(),
                found: sample.len(),
            }
            .into());
        }
        for (index, value) in sample.iter().enumerate() {
            let declared = self.schema.field_type(index);
            if value.field_type() != declared {
                return Err(AccessError::FieldType {
                    index,
                    expected: declared.code(),
                    found: value.field_type().code(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn file(&mut self) -> Result<&mut StoreFile> {
        if self.file.is_none() {
            let file = StoreFile::open(
                self.schema.path(),
                self.schema.name(),
                self.schema.records_per_tier(),
                self.schema.field_types(),
                self.schema.metadata(),
            )?;
            return Ok(self.file.insert(file));
        }
        match &mut self.file {
            Some(file) => Ok(file),
            None => unreachable!("handle opened above"),
        }
    }

    /// Releases the file handle. Pending live state and cursors are kept;
    /// the next flush reopens the file.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(store = self.schema.name(), "file handle released");
        }
    }

    /// A defensive copy of the merged pending record, or `None` before the
    /// first sample.
    pub fn live_snapshot(&self) -> Option<Vec<Value>> {
        self.live.clone()
    }

    /// The schema this updater was built from.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Reads one record through the updater's handle. See
    /// [`StoreFile::read_record`].
    ///
    /// # Errors
    ///
    /// As for [`StoreFile::read_record`].
    pub fn read_record(&mut self, tier: usize, record: usize) -> Result<Vec<Value>> {
        self.file()?.read_record(tier, record)
    }

    /// Reads a whole tier through the updater's handle. See
    /// [`StoreFile::read_block`].
    ///
    /// # Errors
    ///
    /// As for [`StoreFile::read_block`].
    pub fn read_block(&mut self, tier: usize) -> Result<Vec<Value>> {
        self.file()?.read_block(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoundelError;
    use crate::schema::{FieldType, MergeOp, SchemaConfig};
    use std::path::Path;
    use tempfile::tempdir;

    fn schema(
        dir: &Path,
        types: &str,
        ops: &str,
        blocks: &[u64],
        records: &[u64],
    ) -> Schema {
        SchemaConfig {
            name: "test".to_string(),
            path: dir.join("test.rrts"),
            field_types: FieldType::parse_codes(types).unwrap(),
            merge_ops: MergeOp::parse_codes(ops).unwrap(),
            block_period_secs: blocks.to_vec(),
            record_period_secs: records.to_vec(),
            metadata: "{}".to_string(),
        }
        .build()
        .unwrap()
    }

    #[test]
    fn test_first_sample_snaps_deadlines_forward() {
        let dir = tempdir().unwrap();
        let mut updater =
            Updater::new(schema(dir.path(), "ll", "vv", &[10], &[1])).unwrap();

        // t = 12 345 ms: nothing is due before the 13 000 boundary.
        updater.update(12_345, &[Value::Int(0), Value::Int(7)]).unwrap();
        updater.update(12_900, &[Value::Int(0), Value::Int(8)]).unwrap();
        assert_eq!(
            updater.read_record(0, 0).unwrap(),
            vec![Value::Int(0), Value::Int(0)]
        );

        // Reaching the boundary flushes slot 0 stamped with the deadline.
        updater.update(13_000, &[Value::Int(0), Value::Int(9)]).unwrap();
        let record = updater.read_record(0, 0).unwrap();
        assert_eq!(record[0], Value::Int(13_000));
    }

    #[test]
    fn test_deadline_on_exact_boundary_is_next_period() {
        let dir = tempdir().unwrap();
        let mut updater =
            Updater::new(schema(dir.path(), "ll", "vv", &[10], &[1])).unwrap();

        // A first sample exactly on a boundary flushes at the NEXT boundary.
        updater.update(5_000, &[Value::Int(0), Value::Int(1)]).unwrap();
        updater.update(5_999, &[Value::Int(0), Value::Int(2)]).unwrap();
        assert_eq!(
            updater.read_record(0, 0).unwrap()[0],
            Value::Int(0),
            "no flush before 6000"
        );
        updater.update(6_000, &[Value::Int(0), Value::Int(3)]).unwrap();
        assert_eq!(updater.read_record(0, 0).unwrap()[0], Value::Int(6_000));
    }

    #[test]
    fn test_sum_rollup_totals_the_window() {
        // Tier 0: 1 s records, 5 slots; tier 1: 5 s records, 4 slots.
        let dir = tempdir().unwrap();
        let mut updater =
            Updater::new(schema(dir.path(), "ll", "vs", &[5, 20], &[1, 5])).unwrap();

        // Seed one increment, then one per period boundary. The flush for a
        // boundary happens in the same call that merges that call's sample,
        // so the zero increment at 1000 keeps the first record at 1.
        updater.update(100, &[Value::Int(0), Value::Int(1)]).unwrap();
        updater.update(1_000, &[Value::Int(0), Value::Int(0)]).unwrap();
        for t in [2_000, 3_000, 4_000, 5_000] {
            updater.update(t, &[Value::Int(0), Value::Int(1)]).unwrap();
        }

        // Tier 0 holds running totals 1..=5, one per boundary.
        let block = updater.read_block(0).unwrap();
        for (slot, expected) in (1i64..=5).enumerate() {
            assert_eq!(block[slot * 2], Value::Int(1_000 * (expected)));
            assert_eq!(block[slot * 2 + 1], Value::Int(expected));
        }

        // Tier 1 record 0 sums the window: 1 + 2 + 3 + 4 + 5.
        let rollup = updater.read_record(1, 0).unwrap();
        assert_eq!(rollup[0], Value::Int(5_000));
        assert_eq!(rollup[1], Value::Int(15));
    }

    #[test]
    fn test_circular_cursor_wraps_to_slot_zero() {
        // 5 slots of 1 s each; the sixth flush overwrites slot 0.
        let dir = tempdir().unwrap();
        let mut updater =
            Updater::new(schema(dir.path(), "ld", "vv", &[5], &[1])).unwrap();

        updater.update(100, &[Value::Int(0), Value::Float(0.0)]).unwrap();
        for t in 1..=6i64 {
            #[allow(clippy::cast_precision_loss)]
            updater
                .update(t * 1_000, &[Value::Int(0), Value::Float(t as f64)])
                .unwrap();
        }

        let block = updater.read_block(0).unwrap();
        // Slot 0 was rewritten by the 6 000 ms flush.
        assert_eq!(block[0], Value::Int(6_000));
        assert_eq!(block[1], Value::Float(6.0));
        // Slots 1..4 still hold the 2 000..5 000 flushes.
        for slot in 1..5usize {
            assert_eq!(block[slot * 2], Value::Int((slot as i64 + 1) * 1_000));
        }
    }

    #[test]
    fn test_gap_in_samples_catches_up_missed_slots() {
        let dir = tempdir().unwrap();
        let mut updater =
            Updater::new(schema(dir.path(), "ll", "vv", &[10], &[1])).unwrap();

        updater.update(100, &[Value::Int(0), Value::Int(42)]).unwrap();
        // Nothing for five periods, then one sample: all five missed
        // deadlines flush in this single call, repeating the live record.
        updater.update(5_500, &[Value::Int(0), Value::Int(42)]).unwrap();

        let block = updater.read_block(0).unwrap();
        for slot in 0..5usize {
            assert_eq!(block[slot * 2], Value::Int((slot as i64 + 1) * 1_000));
            assert_eq!(block[slot * 2 + 1], Value::Int(42));
        }
        // Slot 5 was never reached.
        assert_eq!(block[5 * 2], Value::Int(0));
    }

    #[test]
    fn test_live_record_survives_flushes() {
        let dir = tempdir().unwrap();
        let mut updater =
            Updater::new(schema(dir.path(), "ll", "vs", &[10], &[1])).unwrap();

        updater.update(100, &[Value::Int(0), Value::Int(3)]).unwrap();
        updater.update(1_000, &[Value::Int(0), Value::Int(4)]).unwrap();

        // The flush did not clear the accumulator.
        let live = updater.live_snapshot().unwrap();
        assert_eq!(live[1], Value::Int(7));

        updater.update(2_000, &[Value::Int(0), Value::Int(1)]).unwrap();
        assert_eq!(updater.live_snapshot().unwrap()[1], Value::Int(8));
        assert_eq!(updater.read_record(0, 1).unwrap()[1], Value::Int(8));
    }

    #[test]
    fn test_close_releases_and_reopens() {
        let dir = tempdir().unwrap();
        let mut updater =
            Updater::new(schema(dir.path(), "ll", "vv", &[10], &[1])).unwrap();

        updater.update(100, &[Value::Int(0), Value::Int(1)]).unwrap();
        updater.update(1_000, &[Value::Int(0), Value::Int(2)]).unwrap();
        updater.close();

        // State survives the close; the next flush reopens the file.
        updater.update(2_000, &[Value::Int(0), Value::Int(3)]).unwrap();
        assert_eq!(updater.read_record(0, 1).unwrap()[0], Value::Int(2_000));
    }

    #[test]
    fn test_rebinding_to_existing_file_validates() {
        let dir = tempdir().unwrap();
        let s = schema(dir.path(), "ld", "vm", &[10], &[1]);

        {
            let mut updater = Updater::new(s.clone()).unwrap();
            updater.update(100, &[Value::Int(0), Value::Float(1.0)]).unwrap();
            updater.update(1_000, &[Value::Int(0), Value::Float(2.0)]).unwrap();
        }

        // Same schema rebinds cleanly and sees the flushed record.
        let mut updater = Updater::new(s).unwrap();
        assert_eq!(updater.read_record(0, 0).unwrap()[0], Value::Int(1_000));

        // A different name on the same path is rejected.
        let other = SchemaConfig {
            name: "other".to_string(),
            path: dir.path().join("test.rrts"),
            field_types: FieldType::parse_codes("ld").unwrap(),
            merge_ops: MergeOp::parse_codes("vm").unwrap(),
            block_period_secs: vec![10],
            record_period_secs: vec![1],
            metadata: "{}".to_string(),
        }
        .build()
        .unwrap();
        assert!(matches!(
            Updater::new(other).unwrap_err(),
            RoundelError::Format(_)
        ));
    }

    #[test]
    fn test_sample_shape_is_validated() {
        let dir = tempdir().unwrap();
        let mut updater =
            Updater::new(schema(dir.path(), "ld", "vm", &[10], &[1])).unwrap();

        let err = updater.update(100, &[Value::Int(0)]).unwrap_err();
        assert!(matches!(
            err,
            RoundelError::Access(AccessError::FieldCount { expected: 2, found: 1 })
        ));

        let err = updater
            .update(100, &[Value::Int(0), Value::Int(1)])
            .unwrap_err();
        assert!(matches!(
            err,
            RoundelError::Access(AccessError::FieldType { index: 1, .. })
        ));
    }
}

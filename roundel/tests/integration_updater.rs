//! Integration tests for the full update lifecycle: sample ingestion,
//! period-boundary flushing, multi-tier rollup, and survival across handle
//! closes and process restarts (simulated by rebuilding the updater).

use std::path::Path;

use roundel::schema::{FieldType, MergeOp, SchemaConfig};
use roundel::{Schema, StoreFile, Updater, Value};
use tempfile::tempdir;

/// Timestamp + summed counter + averaged gauge; 1s records for 5s, 5s
/// records for 20s. Small periods keep the tests readable.
fn counter_gauge_schema(dir: &Path) -> Schema {
    SchemaConfig {
        name: "traffic".to_string(),
        path: dir.join("traffic.rrts"),
        field_types: vec![FieldType::Int64, FieldType::Int64, FieldType::Float64],
        merge_ops: vec![MergeOp::Overwrite, MergeOp::Sum, MergeOp::Mean],
        block_period_secs: vec![5, 20],
        record_period_secs: vec![1, 5],
        metadata: r#"{"unit":"req/s"}"#.to_string(),
    }
    .build()
    .unwrap()
}

#[test]
fn test_full_update_lifecycle() {
    let dir = tempdir().unwrap();
    let schema = counter_gauge_schema(dir.path());

    let mut updater = Updater::new(schema.clone()).unwrap();

    // Phase 1: one increment before the first boundary, then one sample on
    // each boundary. The boundary sample merges before the flush, so the
    // zero increment at 1000 leaves the first record's total at 1.
    updater
        .update(100, &[Value::Int(0), Value::Int(1), Value::Float(10.0)])
        .unwrap();
    updater
        .update(1_000, &[Value::Int(0), Value::Int(0), Value::Float(10.0)])
        .unwrap();
    for t in [2_000i64, 3_000, 4_000, 5_000] {
        updater
            .update(t, &[Value::Int(0), Value::Int(1), Value::Float(10.0)])
            .unwrap();
    }
    drop(updater);

    // Phase 2: read everything back through a fresh file handle.
    let mut store = StoreFile::open(
        schema.path(),
        schema.name(),
        schema.records_per_tier(),
        schema.field_types(),
        schema.metadata(),
    )
    .unwrap();

    // Tier 0: five records at 1s boundaries, counter running total 1..=5.
    let tier0 = store.read_block(0).unwrap();
    for (slot, total) in (1i64..=5).enumerate() {
        let fields = &tier0[slot * 3..slot * 3 + 3];
        assert_eq!(fields[0], Value::Int((slot as i64 + 1) * 1_000));
        assert_eq!(fields[1], Value::Int(total));
    }

    // Tier 1 slot 0: the 5s rollup stamped with its own deadline; the
    // counter field sums the window of running totals.
    let rollup = store.read_record(1, 0).unwrap();
    assert_eq!(rollup[0], Value::Int(5_000));
    assert_eq!(rollup[1], Value::Int(1 + 2 + 3 + 4 + 5));
    // The mean field folds iteratively over equal values, which converges
    // to a fraction of the input, not the input itself.
    let Value::Float(mean) = rollup[2] else {
        panic!("mean field should be a float");
    };
    assert!(mean > 0.0 && mean < 10.0, "iterative mean of equal 10.0 samples: {mean}");
}

#[test]
fn test_restart_continues_into_later_slots() {
    let dir = tempdir().unwrap();
    let schema = counter_gauge_schema(dir.path());

    {
        let mut updater = Updater::new(schema.clone()).unwrap();
        updater
            .update(100, &[Value::Int(0), Value::Int(1), Value::Float(1.0)])
            .unwrap();
        updater
            .update(1_000, &[Value::Int(0), Value::Int(0), Value::Float(1.0)])
            .unwrap();
    }

    // A rebuilt updater starts with fresh cursors at slot 0: cursor state is
    // in-memory only, so a restart overwrites from the beginning rather than
    // resuming mid-ring.
    let mut updater = Updater::new(schema).unwrap();
    updater
        .update(10_050, &[Value::Int(0), Value::Int(7), Value::Float(2.0)])
        .unwrap();
    updater
        .update(11_000, &[Value::Int(0), Value::Int(0), Value::Float(2.0)])
        .unwrap();

    let record = updater.read_record(0, 0).unwrap();
    assert_eq!(record[0], Value::Int(11_000));
    assert_eq!(record[1], Value::Int(7));
}

#[test]
fn test_ring_retains_only_the_most_recent_block() {
    // Single tier, 5 slots of 1s. Drive two full revolutions plus one.
    let dir = tempdir().unwrap();
    let schema = SchemaConfig {
        name: "ring".to_string(),
        path: dir.path().join("ring.rrts"),
        field_types: vec![FieldType::Int64, FieldType::Int64],
        merge_ops: vec![MergeOp::Overwrite, MergeOp::Overwrite],
        block_period_secs: vec![5],
        record_period_secs: vec![1],
        metadata: "{}".to_string(),
    }
    .build()
    .unwrap();

    let mut updater = Updater::new(schema).unwrap();
    updater.update(100, &[Value::Int(0), Value::Int(0)]).unwrap();
    for t in 1..=11i64 {
        updater
            .update(t * 1_000, &[Value::Int(0), Value::Int(t)])
            .unwrap();
    }

    // Deadlines 7000..11000 occupy slots 1..4 and the wrap-around slot 0
    // holds 11000; everything older has been overwritten.
    let block = updater.read_block(0).unwrap();
    assert_eq!(block[0], Value::Int(11_000));
    for slot in 1..5usize {
        assert_eq!(block[slot * 2], Value::Int((slot as i64 + 6) * 1_000));
    }
}

#[test]
fn test_three_tier_cascade() {
    // The worked retention example: blocks [10, 300, 2000]s over records
    // [1, 5, 20]s. Tier 1 fills every 5th second, tier 2 every 20th.
    let dir = tempdir().unwrap();
    let schema = SchemaConfig {
        name: "cascade".to_string(),
        path: dir.path().join("cascade.rrts"),
        field_types: vec![FieldType::Int64, FieldType::Int64],
        merge_ops: vec![MergeOp::Overwrite, MergeOp::Sum],
        block_period_secs: vec![10, 300, 2000],
        record_period_secs: vec![1, 5, 20],
        metadata: "{}".to_string(),
    }
    .build()
    .unwrap();
    assert_eq!(schema.records_per_tier(), &[10, 60, 100]);
    assert_eq!(schema.rollup_window(0), 5);
    assert_eq!(schema.rollup_window(1), 4);

    let mut updater = Updater::new(schema).unwrap();
    // Constant rate: +1 per second, fed exactly on each boundary after a
    // seed just past zero.
    updater.update(1, &[Value::Int(0), Value::Int(1)]).unwrap();
    updater.update(1_000, &[Value::Int(0), Value::Int(0)]).unwrap();
    for t in 2..=20i64 {
        updater
            .update(t * 1_000, &[Value::Int(0), Value::Int(1)])
            .unwrap();
    }

    // Tier 1 got four rollups (at 5, 10, 15, 20s); tier 2 got one (at 20s).
    let t1_first = updater.read_record(1, 0).unwrap();
    assert_eq!(t1_first[0], Value::Int(5_000));
    // Running totals 1..=5 summed.
    assert_eq!(t1_first[1], Value::Int(15));

    let t1_fourth = updater.read_record(1, 3).unwrap();
    assert_eq!(t1_fourth[0], Value::Int(20_000));
    // Running totals 16..=20 summed.
    assert_eq!(t1_fourth[1], Value::Int(16 + 17 + 18 + 19 + 20));

    let t2_first = updater.read_record(2, 0).unwrap();
    assert_eq!(t2_first[0], Value::Int(20_000));
    // Sum of the four tier-1 sums: 15 + 40 + 65 + 90.
    assert_eq!(t2_first[1], Value::Int(15 + 40 + 65 + 90));

    // Untouched slots everywhere else.
    assert_eq!(updater.read_record(1, 4).unwrap()[0], Value::Int(0));
    assert_eq!(updater.read_record(2, 1).unwrap()[0], Value::Int(0));
}

#[test]
fn test_schema_json_round_trip_drives_updater() {
    // Schemas conventionally live in JSON files next to the stores; make
    // sure a deserialized one behaves identically.
    let dir = tempdir().unwrap();
    let json = format!(
        r#"{{
            "name": "fromjson",
            "path": {:?},
            "field_types": ["int64", "float64"],
            "merge_ops": ["overwrite", "mean"],
            "block_period_secs": [10],
            "record_period_secs": [1]
        }}"#,
        dir.path().join("fromjson.rrts")
    );

    let config: SchemaConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(config.metadata, "{}", "metadata defaults when omitted");
    let schema = config.build().unwrap();

    let mut updater = Updater::new(schema).unwrap();
    updater.update(500, &[Value::Int(0), Value::Float(3.5)]).unwrap();
    updater.update(1_000, &[Value::Int(0), Value::Float(4.5)]).unwrap();

    let record = updater.read_record(0, 0).unwrap();
    assert_eq!(record[0], Value::Int(1_000));
    assert_eq!(record[1], Value::Float(4.0));
}

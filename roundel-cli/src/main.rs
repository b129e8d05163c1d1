//! CLI for roundel time-series store files.
//!
//! Provides commands for creating, inspecting, dumping, and benchmarking
//! roundel stores.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use roundel::{SchemaConfig, StoreFile, Updater, Value};

/// roundel — embeddable round-robin time-series store CLI.
#[derive(Parser)]
#[command(name = "roundel", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create a store file from a JSON schema description.
    Create {
        /// Path to a JSON file holding a schema configuration.
        schema: PathBuf,
    },

    /// Display a store file's header: name, tiers, fields, metadata.
    Info {
        /// Path to the store file.
        file: PathBuf,
    },

    /// Dump the records of one tier.
    Dump {
        /// Path to the store file.
        file: PathBuf,

        /// Tier to dump (0 = highest resolution).
        #[arg(long, default_value = "0")]
        tier: usize,

        /// Skip records whose timestamp is still zero (never written).
        #[arg(long)]
        skip_empty: bool,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Run a write-path microbenchmark against a throwaway store.
    Bench {
        /// Number of samples to feed.
        #[arg(long, default_value = "1000000")]
        samples: u64,

        /// Number of data fields per record (timestamp excluded).
        #[arg(long, default_value = "4")]
        fields: usize,
    },
}

/// Output format for dumped records.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of objects.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Create { schema } => cmd_create(&schema),
        Commands::Info { file } => cmd_info(&file),
        Commands::Dump {
            file,
            tier,
            skip_empty,
            format,
        } => cmd_dump(&file, tier, skip_empty, &format),
        Commands::Bench { samples, fields } => cmd_bench(samples, fields),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `roundel create <schema.json>`.
fn cmd_create(schema_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(schema_path)?;
    let config: SchemaConfig = serde_json::from_str(&data)?;
    let schema = config.build()?;

    let store = StoreFile::create(
        schema.path(),
        schema.name(),
        schema.records_per_tier(),
        schema.field_types(),
        schema.metadata(),
    )?;

    println!("Created {}", schema.path().display());
    println!("{}", store.info());
    Ok(())
}

/// Implements `roundel info <file>`.
fn cmd_info(file: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let store = StoreFile::open_unchecked(file)?;

    println!("Store: {}", file.display());
    println!("  Name: {}", store.name());
    println!("  Fields: {} ({} bytes/record)", store.field_types().len(), store.record_length());
    for (i, field_type) in store.field_types().iter().enumerate() {
        println!("    Field {i}: {:?}", field_type);
    }
    println!("  Tiers: {}", store.records_per_tier().len());
    for (i, count) in store.records_per_tier().iter().enumerate() {
        println!("    Tier {i}: {count} records");
    }
    println!(
        "  Size: {} ({} bytes, header {} bytes)",
        format_bytes(store.len_bytes()),
        store.len_bytes(),
        store.end_header_offset()
    );
    println!("  Metadata: {}", store.metadata());
    Ok(())
}

/// Implements `roundel dump <file>`.
fn cmd_dump(
    file: &PathBuf,
    tier: usize,
    skip_empty: bool,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = StoreFile::open_unchecked(file)?;
    let field_count = store.field_types().len();
    let block = store.read_block(tier)?;

    let records: Vec<&[Value]> = block
        .chunks_exact(field_count)
        .filter(|record| !skip_empty || record[0] != Value::Int(0))
        .collect();

    match format {
        OutputFormat::Csv => {
            println!("# store={}, tier={tier}, records={}", store.name(), records.len());
            let header: Vec<String> = (0..field_count)
                .map(|i| if i == 0 { "timestamp_ms".to_string() } else { format!("field_{i}") })
                .collect();
            println!("slot,{}", header.join(","));
            for (slot, record) in records.iter().enumerate() {
                let fields: Vec<String> = record.iter().map(ToString::to_string).collect();
                println!("{slot},{}", fields.join(","));
            }
        }
        OutputFormat::Json => {
            let json_records: Vec<serde_json::Value> = records
                .iter()
                .map(|record| {
                    let fields: Vec<serde_json::Value> = record
                        .iter()
                        .map(|value| match value {
                            Value::Int(v) => serde_json::json!(v),
                            Value::Float(v) => serde_json::json!(v),
                        })
                        .collect();
                    serde_json::json!(fields)
                })
                .collect();

            let output = serde_json::json!({
                "store": store.name(),
                "tier": tier,
                "count": records.len(),
                "records": json_records,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `roundel bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(samples: u64, fields: usize) -> Result<(), Box<dyn std::error::Error>> {
    use roundel::{FieldType, MergeOp};

    println!("roundel write-path benchmark");
    println!("  Samples: {samples}");
    println!("  Fields: {fields}");
    println!();

    let path = std::env::temp_dir().join("roundel_bench.rrts");
    let _ = std::fs::remove_file(&path);

    let mut field_types = vec![FieldType::Int64];
    let mut merge_ops = vec![MergeOp::Overwrite];
    for i in 0..fields {
        if i % 2 == 0 {
            field_types.push(FieldType::Int64);
            merge_ops.push(MergeOp::Sum);
        } else {
            field_types.push(FieldType::Float64);
            merge_ops.push(MergeOp::Mean);
        }
    }

    let schema = SchemaConfig {
        name: "bench".to_string(),
        path: path.clone(),
        field_types: field_types.clone(),
        merge_ops,
        block_period_secs: vec![600, 3600],
        record_period_secs: vec![1, 60],
        metadata: "{}".to_string(),
    }
    .build()?;

    let mut updater = Updater::new(schema)?;
    let sample: Vec<Value> = field_types
        .iter()
        .map(|t| match t {
            FieldType::Int64 => Value::Int(1),
            FieldType::Float64 => Value::Float(42.5),
        })
        .collect();

    println!("Feeding {samples} samples, one per 10 ms of store time...");

    let mut ts = 0i64;
    let start = Instant::now();
    for _ in 0..samples {
        ts += 10;
        updater.update(ts, &sample)?;
    }
    let elapsed = start.elapsed();

    let ns_per_update = elapsed.as_nanos() as f64 / samples as f64;
    let updates_per_sec = samples as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results:");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_update:.1} ns/update");
    println!("  Throughput: {updates_per_sec:.0} updates/sec");

    let _ = std::fs::remove_file(&path);
    Ok(())
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

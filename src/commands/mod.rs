//! Subcommands of the `retailiq` binary

mod report;

use anyhow::{bail, Context, Result};
use arrow::array::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use clap::{Args, Subcommand};
use retailiq_config::RuntimeConfig;
use retailiq_warehouse::{PartitionFilter, PartitionValue, Warehouse, WarehouseBuilder};
use std::path::PathBuf;
use tracing::{info, warn};

pub use report::ReportCommand;

#[derive(Subcommand)]
pub enum Command {
    /// Build every declared table from the conformed source files
    Build(BuildArgs),
    /// List tables in the metastore
    Tables,
    /// List the partition directories of a table
    Partitions {
        /// Table name
        table: String,
    },
    /// Run `SELECT * FROM <table> [WHERE col = value AND ...]`
    Query {
        /// Query text
        sql: String,
    },
    /// Read a table, pruned by partition filters
    Read(ReadArgs),
    /// Cross-check declared tables against the metastore and data files
    Verify,
    /// Retail KPI reports
    #[command(subcommand)]
    Report(ReportCommand),
}

#[derive(Args)]
pub struct BuildArgs {
    /// Directory holding `<table>.parquet` source files (overrides config file)
    #[arg(short, long, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Accept a payload schema that differs from the one already stored
    #[arg(long)]
    pub allow_schema_change: bool,
}

#[derive(Args)]
pub struct ReadArgs {
    /// Table name
    pub table: String,

    /// Partition filter; repeat for several columns
    #[arg(short, long = "filter", value_name = "COLUMN=VALUE", value_parser = parse_filter)]
    pub filters: Vec<(String, PartitionValue)>,

    /// Print at most this many rows
    #[arg(short, long)]
    pub limit: Option<usize>,
}

impl Command {
    pub fn run(self, config: &RuntimeConfig) -> Result<()> {
        match self {
            Command::Build(args) => execute_build(config, args),
            Command::Tables => execute_tables(config),
            Command::Partitions { table } => execute_partitions(config, &table),
            Command::Query { sql } => execute_query(config, &sql),
            Command::Read(args) => execute_read(config, args),
            Command::Verify => execute_verify(config),
            Command::Report(report) => report.run(config),
        }
    }
}

pub(crate) fn open_warehouse(config: &RuntimeConfig) -> Result<Warehouse> {
    Warehouse::open(&config.warehouse.root, config.warehouse_options())
        .with_context(|| format!("Failed to open warehouse at {}", config.warehouse.root))
}

/// Print `batch` as a table, or warn when it has no rows
pub(crate) fn print_batch(batch: &RecordBatch, what: &str) -> Result<()> {
    if batch.num_rows() == 0 {
        warn!("{} returned no rows", what);
        return Ok(());
    }

    println!("{}", pretty_format_batches(std::slice::from_ref(batch))?);
    println!("({} rows)", batch.num_rows());
    Ok(())
}

fn parse_filter(s: &str) -> std::result::Result<(String, PartitionValue), String> {
    let (column, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected COLUMN=VALUE, got '{}'", s))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(format!("missing column name in '{}'", s));
    }
    Ok((column.to_string(), PartitionValue::parse_literal(value.trim())))
}

fn execute_build(config: &RuntimeConfig, args: BuildArgs) -> Result<()> {
    let source_dir = args
        .source
        .unwrap_or_else(|| PathBuf::from(&config.warehouse.source_dir));

    let mut options = config.write_options();
    options.allow_schema_change = args.allow_schema_change;

    info!(
        "Building warehouse at {} from {}",
        config.warehouse.root,
        source_dir.display()
    );
    let summaries = WarehouseBuilder::new(&source_dir, &config.warehouse.root)
        .with_write_options(options)
        .build(&config.tables)
        .context("Warehouse build failed")?;

    println!(
        "{:<20} {:>10} {:>10} {:>6} {:>12}",
        "TABLE", "ROWS", "PARTITIONS", "FILES", "BYTES"
    );
    for summary in &summaries {
        println!(
            "{:<20} {:>10} {:>10} {:>6} {:>12}",
            summary.table,
            summary.record_count,
            summary.partitions,
            summary.files.len(),
            summary.bytes_written()
        );
    }
    Ok(())
}

fn execute_tables(config: &RuntimeConfig) -> Result<()> {
    let warehouse = open_warehouse(config)?;
    let tables = warehouse.show_tables();
    if tables.is_empty() {
        warn!("No tables in warehouse at {}", config.warehouse.root);
        return Ok(());
    }

    println!("{:<20} {:>10} {:>10}", "TABLE", "ROWS", "PARTITIONS");
    for table in tables {
        println!(
            "{:<20} {:>10} {:>10}",
            table.name, table.record_count, table.partitions
        );
    }
    Ok(())
}

fn execute_partitions(config: &RuntimeConfig, table: &str) -> Result<()> {
    let warehouse = open_warehouse(config)?;
    let partitions = warehouse.show_partitions(table)?;
    if partitions.is_empty() {
        warn!("Table '{}' has no data files", table);
        return Ok(());
    }

    println!("{:<40} {:>10} {:>6}", "PARTITION", "ROWS", "FILES");
    for partition in partitions {
        println!(
            "{:<40} {:>10} {:>6}",
            partition.relative_path, partition.row_count, partition.files
        );
    }
    Ok(())
}

fn execute_query(config: &RuntimeConfig, sql: &str) -> Result<()> {
    let warehouse = open_warehouse(config)?;
    let batch = warehouse.query(sql)?;
    print_batch(&batch, "Query")
}

fn execute_read(config: &RuntimeConfig, args: ReadArgs) -> Result<()> {
    let warehouse = open_warehouse(config)?;
    let filters: PartitionFilter = args.filters.into_iter().collect();
    let batch = warehouse.read_table(&args.table, &filters)?;

    let batch = match args.limit {
        Some(limit) if limit < batch.num_rows() => batch.slice(0, limit),
        _ => batch,
    };
    print_batch(&batch, &format!("Table '{}'", args.table))
}

fn execute_verify(config: &RuntimeConfig) -> Result<()> {
    let warehouse = open_warehouse(config)?;
    let report = warehouse.verify(&config.tables);

    if !report.root_exists {
        bail!("Warehouse root {} does not exist", report.root.display());
    }

    println!(
        "{:<20} {:<8} {:>12} {:>12} {:>10}",
        "TABLE", "STATUS", "METASTORE", "PHYSICAL", "PARTITIONS"
    );
    for table in &report.tables {
        let status = if !table.healthy() {
            "FAILED"
        } else if !table.rows_match() {
            "DRIFT"
        } else {
            "OK"
        };
        println!(
            "{:<20} {:<8} {:>12} {:>12} {:>10}",
            table.table,
            status,
            display_count(table.metastore_rows),
            display_count(table.physical_rows),
            table.partitions
        );
        if !table.in_metastore {
            println!("    not in metastore");
        }
        if let Some(err) = &table.read_error {
            println!("    read error: {}", err);
        }
        for problem in &table.problems {
            println!("    {}", problem);
        }
    }
    println!(
        "Total size: {:.2} MB",
        report.total_bytes as f64 / (1024.0 * 1024.0)
    );

    if !report.healthy() {
        bail!("Warehouse verification failed");
    }
    Ok(())
}

fn display_count(count: Option<u64>) -> String {
    count.map_or_else(|| "-".to_string(), |c| c.to_string())
}

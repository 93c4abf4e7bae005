//! CLI tool for writing to and querying copy-on-write tables.

mod error;
mod input;
mod query;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use cow_table_core::{
    TableConfig, TableHandle, TableLocation, WriteOperation, WriteReport,
    config::options_from_json_str,
};
use log::info;
use snafu::{OptionExt, ResultExt};

use crate::{
    error::{
        CliResult, ConfigSnafu, InvalidOptionSnafu, OpenTableSnafu, ReadOptionsSnafu,
        ReadTableSnafu, WriteTableSnafu,
    },
    input::read_input,
    query::{DEFAULT_TABLE_NAME, QueryOpts, render_result, run_query, sanitize_identifier},
};

#[derive(Debug, Parser)]
#[command(name = "cowtab", version, about = "Copy-on-write table tool")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write rows from a file into a table, creating it on first write.
    Write {
        /// JSON object of table options.
        #[arg(long)]
        options: Option<PathBuf>,

        /// Extra option as key=value; overrides the options file.
        #[arg(long = "option", value_name = "KEY=VALUE")]
        option: Vec<String>,

        /// Input rows (.jsonl, .csv or .parquet).
        #[arg(long)]
        input: PathBuf,

        /// Override write.operation for this write.
        #[arg(long, value_parser = parse_operation)]
        operation: Option<WriteOperation>,
    },

    /// Run SQL against a table snapshot.
    Query {
        #[arg(long)]
        table: PathBuf,

        #[arg(long)]
        sql: String,

        /// Version to read; defaults to the latest.
        #[arg(long)]
        as_of: Option<u64>,

        /// Rows to print.
        #[arg(long)]
        max_rows: Option<usize>,

        /// SQL name of the snapshot table.
        #[arg(long, default_value = DEFAULT_TABLE_NAME)]
        name: String,
    },

    /// Print the commit timeline.
    Log {
        #[arg(long)]
        table: PathBuf,
    },

    /// Print the partitions and live files of a snapshot.
    Show {
        #[arg(long)]
        table: PathBuf,

        #[arg(long)]
        as_of: Option<u64>,
    },
}

fn parse_operation(raw: &str) -> Result<WriteOperation, String> {
    raw.parse().map_err(|e| format!("{e}"))
}

/// Merge the options file with `key=value` overrides into a config.
fn load_config(options: Option<&Path>, overrides: &[String]) -> CliResult<TableConfig> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    if let Some(path) = options {
        let text = std::fs::read_to_string(path).context(ReadOptionsSnafu {
            path: path.display().to_string(),
        })?;
        map.extend(options_from_json_str(&text).context(ConfigSnafu)?);
    }

    for raw in overrides {
        let (key, value) = raw
            .split_once('=')
            .context(InvalidOptionSnafu { raw: raw.clone() })?;
        map.insert(key.trim().to_string(), value.to_string());
    }

    TableConfig::from_options(map).context(ConfigSnafu)
}

fn table_label(path: &Path) -> String {
    path.display().to_string()
}

async fn open_table(path: &Path) -> CliResult<TableHandle> {
    TableHandle::open(TableLocation::local(path))
        .await
        .context(OpenTableSnafu {
            table: table_label(path),
        })
}

fn print_write_report(table: &str, report: &WriteReport) {
    println!(
        "Committed version {} to {table} ({} at {})",
        report.version, report.operation, report.commit_time
    );
    println!(
        "  rows: {} inserted, {} updated, {} ignored",
        report.rows_inserted, report.rows_updated, report.rows_ignored
    );
    println!(
        "  files: {} added, {} superseded in {} partition(s)",
        report.files_added,
        report.files_superseded,
        report.partitions.len()
    );
    if report.attempts > 1 {
        println!("  committed after {} attempts", report.attempts);
    }
}

async fn cmd_write(
    options: Option<&Path>,
    overrides: &[String],
    input: &Path,
    operation: Option<WriteOperation>,
) -> CliResult<()> {
    let config = load_config(options, overrides)?;
    let table = config.location.to_string();

    let rows = read_input(input)?;
    info!("read {} rows from {}", rows.num_rows(), input.display());

    let mut handle = TableHandle::open_with_config(config)
        .await
        .context(OpenTableSnafu {
            table: table.clone(),
        })?;
    let report = handle
        .write_record_batches(rows.schema, &rows.batches, operation)
        .await
        .context(WriteTableSnafu {
            table: table.clone(),
        })?;

    print_write_report(&table, &report);
    Ok(())
}

async fn cmd_query(table: &Path, sql: &str, opts: QueryOpts) -> CliResult<()> {
    let handle = open_table(table).await?;
    let opts = QueryOpts {
        name: sanitize_identifier(&opts.name),
        ..opts
    };
    if opts.name != DEFAULT_TABLE_NAME {
        eprintln!("Registered snapshot as '{}'", opts.name);
    }

    let res = run_query(&handle, sql, &opts).await?;
    println!("{}", render_result(&res, &opts)?);
    Ok(())
}

async fn cmd_log(table: &Path) -> CliResult<()> {
    let handle = open_table(table).await?;
    let commits = handle.commits().await.context(ReadTableSnafu {
        table: table_label(table),
    })?;

    for commit in &commits {
        println!(
            "version {}  {}  {}  (base {}, at {})",
            commit.version,
            commit.commit_time,
            commit.operation,
            commit.base_version,
            commit.timestamp.to_rfc3339()
        );
        for (partition, change) in commit.partition_changes() {
            let label = if partition.is_empty() {
                "<unpartitioned>".to_string()
            } else {
                partition.to_string()
            };
            println!(
                "    {label}: +{} -{}",
                change.added.len(),
                change.superseded.len()
            );
        }
    }
    Ok(())
}

async fn cmd_show(table: &Path, as_of: Option<u64>) -> CliResult<()> {
    let handle = open_table(table).await?;
    let snapshot = handle.snapshot(as_of).await.context(ReadTableSnafu {
        table: table_label(table),
    })?;

    let meta = snapshot.table_meta();
    println!("Table {} at version {}", meta.name, snapshot.version());
    if let Some(ct) = snapshot.commit_time() {
        println!("  last commit time: {ct}");
    }
    println!("  record key: {}", meta.record_key_fields.join(","));
    if !meta.partition_path_fields.is_empty() {
        println!("  partition by: {}", meta.partition_path_fields.join(","));
    }
    if let Some(field) = &meta.precombine_field {
        println!("  precombine: {field}");
    }
    println!(
        "  {} rows in {} files",
        snapshot.row_count(),
        snapshot.files().len()
    );

    for partition in snapshot.partitions() {
        let label = if partition.is_empty() {
            "<unpartitioned>".to_string()
        } else {
            partition.to_string()
        };
        println!("{label}");
        for file in snapshot.files().iter().filter(|f| f.partition == partition) {
            println!(
                "    {}  group={}  rows={}  bytes={}  commit={}",
                file.path, file.file_group_id, file.row_count, file.size_bytes, file.commit_time
            );
        }
    }
    Ok(())
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Write {
            options,
            option,
            input,
            operation,
        } => cmd_write(options.as_deref(), &option, &input, operation).await,
        Command::Query {
            table,
            sql,
            as_of,
            max_rows,
            name,
        } => {
            let opts = QueryOpts {
                name,
                as_of,
                max_rows,
            };
            cmd_query(&table, &sql, opts).await
        }
        Command::Log { table } => cmd_log(&table).await,
        Command::Show { table, as_of } => cmd_show(&table, as_of).await,
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        eprintln!("{}", e.report());
        std::process::exit(1);
    }
}

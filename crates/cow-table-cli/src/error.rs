use arrow::error::ArrowError;
use cow_table_core::{TableError, config::ConfigError};
use datafusion::error::DataFusionError;
use parquet::errors::ParquetError;
use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to read options file {path}"))]
    ReadOptions {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Invalid --option '{raw}': expected key=value"))]
    InvalidOption { raw: String },

    #[snafu(display("Invalid table options"))]
    Config { source: ConfigError },

    #[snafu(display("Input file not found or not accessible: {path}"))]
    InputMissing {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display(
        "Unsupported input {path}. Use a .jsonl, .json, .csv or .parquet file."
    ))]
    UnsupportedInput { path: String },

    #[snafu(display("Input file {path} contains no rows"))]
    EmptyInput { path: String },

    #[snafu(display("Failed to decode input {path}"))]
    DecodeInput { path: String, source: ArrowError },

    #[snafu(display("Failed to read parquet input {path}"))]
    ParquetInput { path: String, source: ParquetError },

    #[snafu(display(
        "Failed to open table at {table}. Ensure it exists and its commit log is readable."
    ))]
    OpenTable {
        table: String,
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("Write failed for table {table}"))]
    WriteTable {
        table: String,
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("Failed to read table {table}"))]
    ReadTable {
        table: String,
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("Query failed"))]
    DataFusion { source: DataFusionError },

    #[snafu(display("Failed to render results"))]
    Arrow { source: ArrowError },
}

impl CliError {
    /// The error followed by its chain of sources, one per line.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut cur = std::error::Error::source(self);
        while let Some(e) = cur {
            out.push_str("\n  caused by: ");
            out.push_str(&e.to_string());
            cur = e.source();
        }
        out
    }
}

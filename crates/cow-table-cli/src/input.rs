//! Readers turning input files into Arrow record batches.

use std::{
    fs::File,
    io::{BufReader, Seek},
    path::Path,
    sync::Arc,
};

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::{OptionExt, ResultExt, ensure};

use crate::error::{
    CliResult, DecodeInputSnafu, EmptyInputSnafu, InputMissingSnafu, ParquetInputSnafu,
    UnsupportedInputSnafu,
};

/// Supported input encodings, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    JsonLines,
    Csv,
    Parquet,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jsonl" | "ndjson" | "json" => Some(InputFormat::JsonLines),
            "csv" => Some(InputFormat::Csv),
            "parquet" | "pq" => Some(InputFormat::Parquet),
            _ => None,
        }
    }
}

/// Rows read from an input file, all sharing `schema`.
#[derive(Debug)]
pub struct InputBatches {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl InputBatches {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }
}

/// Read `path`, inferring the schema for JSON lines and CSV.
pub fn read_input(path: &Path) -> CliResult<InputBatches> {
    let display = path.display().to_string();
    let format = InputFormat::from_path(path).context(UnsupportedInputSnafu {
        path: display.clone(),
    })?;
    let file = File::open(path).context(InputMissingSnafu {
        path: display.clone(),
    })?;

    let input = match format {
        InputFormat::JsonLines => read_json_lines(file, &display)?,
        InputFormat::Csv => read_csv(file, &display)?,
        InputFormat::Parquet => read_parquet(file, &display)?,
    };

    ensure!(
        !input.schema.fields().is_empty(),
        EmptyInputSnafu { path: display }
    );
    Ok(input)
}

fn read_json_lines(file: File, path: &str) -> CliResult<InputBatches> {
    let mut reader = BufReader::new(file);
    let (schema, _) = arrow_json::reader::infer_json_schema_from_seekable(&mut reader, None)
        .context(DecodeInputSnafu { path })?;
    let schema = Arc::new(schema);

    let batches = arrow_json::ReaderBuilder::new(schema.clone())
        .build(reader)
        .context(DecodeInputSnafu { path })?
        .collect::<Result<Vec<_>, _>>()
        .context(DecodeInputSnafu { path })?;

    Ok(InputBatches { schema, batches })
}

fn read_csv(mut file: File, path: &str) -> CliResult<InputBatches> {
    let format = arrow_csv::reader::Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(&mut file, None)
        .context(DecodeInputSnafu { path })?;
    file.rewind().context(InputMissingSnafu { path })?;
    let schema = Arc::new(schema);

    let batches = arrow_csv::ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(file)
        .context(DecodeInputSnafu { path })?
        .collect::<Result<Vec<_>, _>>()
        .context(DecodeInputSnafu { path })?;

    Ok(InputBatches { schema, batches })
}

fn read_parquet(file: File, path: &str) -> CliResult<InputBatches> {
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context(ParquetInputSnafu { path })?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()
        .context(ParquetInputSnafu { path })?
        .collect::<Result<Vec<_>, _>>()
        .context(DecodeInputSnafu { path })?;

    Ok(InputBatches { schema, batches })
}

//! Decode downloaded part files into record batches of the export schema.
//!
//! CSV parts use a non-printable field separator and `\N` for NULL. Every
//! field is read as text first and then cast to the target type, which
//! accepts the warehouse's textual forms (`1`/`0` booleans, space-separated
//! datetimes). Parquet parts are read whole and sliced into fixed-size
//! batches.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::compute::kernels::cast::{cast_with_options, CastOptions};
use arrow::compute::concat_batches;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use federa_connectors::stream_load::FIELD_SEPARATOR;
use federa_core::{FederaError, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use regex::Regex;

use crate::export::ExportFormat;

/// Quote byte that never occurs in exported data, which disables quoting.
const NO_QUOTE: u8 = 0x02;

fn parquet_err(e: parquet::errors::ParquetError) -> FederaError {
    FederaError::Arrow(ArrowError::ParquetError(e.to_string()))
}

/// Cast `batch` column by column onto `schema`.
pub fn conform(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    if batch.num_columns() != schema.fields().len() {
        return Err(FederaError::Schema(format!(
            "part has {} columns, expected {}",
            batch.num_columns(),
            schema.fields().len()
        )));
    }
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    let columns = batch
        .columns()
        .iter()
        .zip(schema.fields())
        .map(|(col, field)| {
            if col.data_type() == field.data_type() {
                Ok(col.clone())
            } else {
                cast_with_options(col, field.data_type(), &options)
            }
        })
        .collect::<std::result::Result<Vec<ArrayRef>, ArrowError>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn text_schema(schema: &SchemaRef) -> SchemaRef {
    Arc::new(Schema::new(
        schema
            .fields()
            .iter()
            .map(|f| Field::new(f.name(), DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ))
}

pub fn decode_csv(path: &Path, schema: &SchemaRef, batch_rows: usize) -> Result<Vec<RecordBatch>> {
    let null = Regex::new(r"^\\N$").map_err(|e| FederaError::Config(e.to_string()))?;
    let reader = ReaderBuilder::new(text_schema(schema))
        .with_header(false)
        .with_delimiter(FIELD_SEPARATOR)
        .with_quote(NO_QUOTE)
        .with_null_regex(null)
        .with_batch_size(batch_rows.max(1))
        .build(File::open(path)?)?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(conform(&batch?, schema)?);
    }
    Ok(batches)
}

pub fn decode_parquet(path: &Path, schema: &SchemaRef, batch_rows: usize) -> Result<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)
        .map_err(parquet_err)?
        .build()
        .map_err(parquet_err)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, ArrowError>>()?;
    let Some(first) = batches.first() else {
        return Ok(vec![]);
    };
    let table = concat_batches(&first.schema(), &batches)?;
    let table = conform(&table, schema)?;

    let step = batch_rows.max(1);
    let mut out = Vec::with_capacity(table.num_rows().div_ceil(step));
    let mut offset = 0;
    while offset < table.num_rows() {
        let len = step.min(table.num_rows() - offset);
        out.push(table.slice(offset, len));
        offset += len;
    }
    Ok(out)
}

pub fn decode_part(
    path: &Path,
    format: ExportFormat,
    schema: &SchemaRef,
    batch_rows: usize,
) -> Result<Vec<RecordBatch>> {
    match format {
        ExportFormat::Csv => decode_csv(path, schema, batch_rows),
        ExportFormat::Parquet => decode_parquet(path, schema, batch_rows),
    }
}

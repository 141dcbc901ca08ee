//! Serialize record batches into the delimited text accepted by stream load.

use std::fmt::Write;

use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use federa_connectors::stream_load::{FIELD_SEPARATOR, NULL_MARKER};
use federa_core::{FederaError, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One line per row, fields separated by `\x01`, NULL as `\N`.
pub fn encode_csv(batch: &RecordBatch) -> Result<Vec<u8>> {
    let options = FormatOptions::new()
        .with_null(NULL_MARKER)
        .with_timestamp_format(Some(TIMESTAMP_FORMAT))
        .with_datetime_format(Some(TIMESTAMP_FORMAT));
    let formatters = batch
        .columns()
        .iter()
        .map(|c| ArrayFormatter::try_new(c.as_ref(), &options))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let separator = char::from(FIELD_SEPARATOR);
    let mut out = String::new();
    let mut field = String::new();
    for row in 0..batch.num_rows() {
        for (i, formatter) in formatters.iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            field.clear();
            write!(field, "{}", formatter.value(row))
                .map_err(|e| FederaError::Schema(e.to_string()))?;
            if field.contains(separator) || field.contains('\n') {
                return Err(FederaError::Schema(format!(
                    "row {} column '{}' contains a field or line separator",
                    row,
                    batch.schema().field(i).name()
                )));
            }
            out.push_str(&field);
        }
        out.push('\n');
    }
    Ok(out.into_bytes())
}

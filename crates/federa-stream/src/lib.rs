//! Federa Stream - chunked export and Arrow IPC streaming
//!
//! Export stages warehouse rows into the object store as ordered part files.
//! The pipeline then downloads those parts, decodes them (CSV or Parquet) and
//! streams bounded record batches to a [`BatchSink`], one IPC message per
//! batch. Incoming batches of the write path are serialized for stream load
//! by [`encode_csv`].

pub mod decode;
pub mod download;
pub mod export;
pub mod frame;
pub mod load;
pub mod parts;
pub mod pipeline;
pub mod session;
pub mod sink;

pub use decode::decode_part;
pub use export::{
    build_select, export_schema, outfile_sql, run_export, ExportFormat, ExportSummary, ExportTarget,
};
pub use frame::{decode_batch, decode_frames, decode_response, encode_batch, Frame};
pub use load::encode_csv;
pub use parts::{list_parts, order_parts, part_sequence, PartRef};
pub use pipeline::{stream_parts, StreamSettings, StreamStats};
pub use session::{SessionProgress, SessionRegistry};
pub use sink::{send_with_retry, BatchSink, ChannelSink, SendError};

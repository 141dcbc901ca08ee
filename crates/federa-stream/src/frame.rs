//! Wire framing of the streaming read response.
//!
//! A response body is a sequence of `[tag: u8][len: u32 BE][payload]` frames.
//! Tag 0 carries one record batch as a complete Arrow IPC stream (schema and
//! batch); tag 1 carries the terminal error as UTF-8. A body that ends without
//! an error frame is a successful end of stream.

use std::io::Cursor;

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use bytes::{BufMut, Bytes, BytesMut};
use federa_core::{FederaError, Result};

pub const TAG_BATCH: u8 = 0;
pub const TAG_ERROR: u8 = 1;
const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Batch(Bytes),
    Error(String),
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes> {
        let (tag, payload): (u8, &[u8]) = match self {
            Frame::Batch(b) => (TAG_BATCH, b.as_ref()),
            Frame::Error(msg) => (TAG_ERROR, msg.as_bytes()),
        };
        let len = payload_len(payload.len())?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u8(tag);
        buf.put_u32(len);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }
}

fn payload_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        FederaError::StreamLost(format!(
            "frame payload of {} bytes exceeds the {} byte limit",
            len,
            u32::MAX
        ))
    })
}

/// Encode one batch as a self-contained IPC stream.
pub fn encode_batch(batch: &RecordBatch) -> Result<Bytes> {
    let mut buf = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buf, &batch.schema())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    Ok(Bytes::from(buf))
}

/// Decode the batch carried by a tag-0 payload.
pub fn decode_batch(payload: &[u8]) -> Result<RecordBatch> {
    let mut reader = StreamReader::try_new(Cursor::new(payload), None)?;
    match reader.next() {
        Some(batch) => Ok(batch?),
        None => Err(FederaError::Schema("IPC payload has no batch".to_string())),
    }
}

/// Split a complete response body into frames.
pub fn decode_frames(mut body: &[u8]) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    while !body.is_empty() {
        if body.len() < HEADER_LEN {
            return Err(FederaError::StreamLost(format!(
                "truncated frame header ({} bytes)",
                body.len()
            )));
        }
        let tag = body[0];
        let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
        let end = HEADER_LEN + len;
        if body.len() < end {
            return Err(FederaError::StreamLost(format!(
                "truncated frame: need {} bytes, have {}",
                end,
                body.len()
            )));
        }
        let payload = &body[HEADER_LEN..end];
        frames.push(match tag {
            TAG_BATCH => Frame::Batch(Bytes::copy_from_slice(payload)),
            TAG_ERROR => Frame::Error(String::from_utf8_lossy(payload).into_owned()),
            other => {
                return Err(FederaError::StreamLost(format!("unknown frame tag {}", other)))
            }
        });
        body = &body[end..];
    }
    Ok(frames)
}

/// Decode a response body into its batches, failing on a terminal error frame.
pub fn decode_response(body: &[u8]) -> Result<Vec<RecordBatch>> {
    let mut batches = Vec::new();
    for frame in decode_frames(body)? {
        match frame {
            Frame::Batch(payload) => batches.push(decode_batch(&payload)?),
            Frame::Error(msg) => return Err(FederaError::StreamLost(msg)),
        }
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch() -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("id", DataType::Int32, false),
                Field::new("name", DataType::Utf8, true),
            ])),
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn body_with_batches_then_error() {
        let mut body = BytesMut::new();
        body.put(Frame::Batch(encode_batch(&batch()).unwrap()).encode().unwrap());
        body.put(
            Frame::Error("stream lost: client went away".to_string())
                .encode()
                .unwrap(),
        );

        let frames = decode_frames(&body).unwrap();
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            Frame::Batch(p) => assert_eq!(decode_batch(p).unwrap(), batch()),
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(frames[1], Frame::Error("stream lost: client went away".to_string()));
        assert!(decode_response(&body).is_err());
    }

    #[test]
    fn empty_batch_keeps_schema() {
        let empty = RecordBatch::new_empty(batch().schema());
        let body = Frame::Batch(encode_batch(&empty).unwrap()).encode().unwrap();
        let batches = decode_response(&body).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 0);
        assert_eq!(batches[0].schema(), batch().schema());
    }

    #[test]
    fn truncated_bodies_are_detected() {
        let body = Frame::Batch(encode_batch(&batch()).unwrap()).encode().unwrap();
        assert!(decode_frames(&body[..3]).is_err());
        assert!(decode_frames(&body[..body.len() - 1]).is_err());
        assert!(decode_frames(&[9, 0, 0, 0, 0]).is_err());
        assert!(decode_frames(&[]).unwrap().is_empty());
    }

    #[test]
    fn oversized_payload_length_is_an_error() {
        assert_eq!(payload_len(7).unwrap(), 7);
        assert_eq!(payload_len(u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            payload_len(u32::MAX as usize + 1),
            Err(FederaError::StreamLost(_))
        ));
    }
}

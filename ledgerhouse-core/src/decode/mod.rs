//! Streaming decoder for framed-compressed record files.
//!
//! A record file is a concatenation of frames: a 4-byte big-endian unsigned
//! length followed by a gzip payload of that length. Each payload inflates to
//! a JSON batch object carrying a `records` array. The decoder yields
//! normalized [`Record`]s one at a time in a single forward pass; peak
//! resident memory is one frame plus one decoded batch.

mod frames;
mod normalize;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ledgerhouse_model::Record;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
pub use frames::{FrameReader, MAX_FRAME_BYTES};
pub use normalize::{normalize_record, parse_timestamp};

/// Lazy record stream over one file.
pub type RecordIter = Box<dyn Iterator<Item = Record> + Send>;

/// Contract for streaming decoded records out of one record file.
///
/// Implementations must stop cleanly at EOF, treat torn or corrupt frames as
/// end-of-file, and never materialize the whole file.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<RecordIter>;
}

/// Default decoder for the framed gzip container.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramedGzDecoder;

impl FramedGzDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl RecordDecoder for FramedGzDecoder {
    fn decode(&self, path: &Path) -> Result<RecordIter> {
        let file = File::open(path)?;
        let reader = FrameReader::new(BufReader::new(file));
        Ok(Box::new(FramedRecords {
            path: path.display().to_string(),
            frames: reader,
            pending: Vec::new(),
            done: false,
        }))
    }
}

struct FramedRecords {
    path: String,
    frames: FrameReader<BufReader<File>>,
    /// Records of the current batch, reversed so `pop` yields file order.
    pending: Vec<Record>,
    done: bool,
}

impl FramedRecords {
    fn refill(&mut self) {
        while self.pending.is_empty() && !self.done {
            let payload = match self.frames.next_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    self.done = true;
                    return;
                }
                Err(err) => {
                    // A corrupt frame ends the stream; the partially observed
                    // suffix is ignored.
                    debug!("frame error in {}, treating as EOF: {}", self.path, err);
                    self.done = true;
                    return;
                }
            };

            match serde_json::from_slice::<Value>(&payload) {
                Ok(batch) => {
                    let records = batch
                        .get("records")
                        .and_then(Value::as_array)
                        .map(|r| r.as_slice())
                        .unwrap_or_default();
                    let mut decoded: Vec<Record> =
                        records.iter().map(normalize_record).collect();
                    decoded.reverse();
                    self.pending = decoded;
                }
                Err(err) => {
                    debug!("batch parse error in {}, treating as EOF: {}", self.path, err);
                    self.done = true;
                }
            }
        }
    }
}

impl Iterator for FramedRecords {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.pending.is_empty() {
            self.refill();
        }
        self.pending.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serde_json::json;

    fn frame(records: &[Value]) -> Vec<u8> {
        let batch = json!({ "records": records });
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder
            .write_all(batch.to_string().as_bytes())
            .expect("gzip write");
        let payload = encoder.finish().expect("gzip finish");
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&payload);
        out
    }

    fn sample_record(n: usize) -> Value {
        json!({
            "event_id": format!("ev-{n}"),
            "contract_id": format!("c-{n}"),
            "template_id": "Splice.DsoRules:VoteRequest",
            "event_type": "created",
            "effective_at": "2024-03-01T12:00:00Z",
            "recorded_at": 1_709_294_400_000_000i64,
        })
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).expect("write fixture");
        path
    }

    #[test]
    fn yields_all_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        for f in 0..3 {
            let records: Vec<Value> = (0..4).map(|k| sample_record(f * 4 + k)).collect();
            bytes.extend(frame(&records));
        }
        let path = write_file(&dir, "events-a.bin.gz", &bytes);

        let records: Vec<Record> =
            FramedGzDecoder::new().decode(&path).unwrap().collect();
        assert_eq!(records.len(), 12);
        for (n, record) in records.iter().enumerate() {
            assert_eq!(record.event_id.as_deref(), Some(format!("ev-{n}").as_str()));
        }
    }

    #[test]
    fn truncated_trailing_frame_ends_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = frame(&[sample_record(0), sample_record(1)]);
        let torn = frame(&[sample_record(2)]);
        bytes.extend_from_slice(&torn[..torn.len() / 2]);
        let path = write_file(&dir, "events-torn.bin.gz", &bytes);

        let records: Vec<Record> =
            FramedGzDecoder::new().decode(&path).unwrap().collect();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn implausible_length_is_treated_as_eof() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = frame(&[sample_record(0)]);
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(b"garbage");
        let path = write_file(&dir, "events-big.bin.gz", &bytes);

        let records: Vec<Record> =
            FramedGzDecoder::new().decode(&path).unwrap().collect();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn corrupt_payload_ends_stream_at_that_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = frame(&[sample_record(0)]);
        // Valid length prefix, payload that is not gzip.
        bytes.extend_from_slice(&8u32.to_be_bytes());
        bytes.extend_from_slice(b"notgzip!");
        bytes.extend(frame(&[sample_record(1)]));
        let path = write_file(&dir, "events-corrupt.bin.gz", &bytes);

        let records: Vec<Record> =
            FramedGzDecoder::new().decode(&path).unwrap().collect();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn empty_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "events-empty.bin.gz", &[]);
        let records: Vec<Record> =
            FramedGzDecoder::new().decode(&path).unwrap().collect();
        assert!(records.is_empty());
    }
}

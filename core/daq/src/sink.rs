// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Data sinks: durable recording of received state samples. Records are
//! length-prefixed, little-endian framed:
//!
//! ```text
//! u64 sequence | u64 timestamp_ns | u32 payload_len | payload bytes
//! ```
//!
//! The payload is the encoded state message, re-decodable with its
//! [`TypedState`] type.

// Standard library imports
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

// Third-party crates
use bytes::{Buf, Bytes};
use tracing::{debug, trace};

// Local crate
use crate::api::TypedState;
use crate::errors::DaqError;
use crate::subscriber::Sample;

const RECORD_HEADER_LEN: u64 = 8 + 8 + 4;

/// Destination for received samples, usually driven from a subscriber
/// callback.
pub trait DataSink<T: TypedState>: Send {
    fn record(&mut self, sample: &Sample<T>) -> Result<(), DaqError>;
    fn flush(&mut self) -> Result<(), DaqError>;
}

/// One framed record read back from a sink file.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub sequence: u64,
    pub timestamp_ns: u64,
    pub payload: Bytes,
}

impl Record {
    pub fn decode<T: TypedState>(&self) -> Result<T, DaqError> {
        Ok(T::decode(self.payload.clone())?)
    }
}

/// Append-only sink writing framed records to a single file.
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl FileSink {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, DaqError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        debug!(path = %path.display(), "file sink opened");
        Ok(FileSink {
            path,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes framed so far, including buffered ones.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn flush(&mut self) -> Result<(), DaqError> {
        self.writer.flush()?;
        Ok(())
    }

    fn write_record(
        &mut self,
        sequence: u64,
        timestamp_ns: u64,
        payload: &[u8],
    ) -> Result<(), DaqError> {
        self.writer.write_all(&sequence.to_le_bytes())?;
        self.writer.write_all(&timestamp_ns.to_le_bytes())?;
        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(payload)?;
        self.bytes_written += RECORD_HEADER_LEN + payload.len() as u64;
        Ok(())
    }
}

impl<T: TypedState> DataSink<T> for FileSink {
    fn record(&mut self, sample: &Sample<T>) -> Result<(), DaqError> {
        let payload = sample.state.encode_to_vec();
        self.write_record(sample.sequence, sample.timestamp_ns, &payload)
    }

    fn flush(&mut self) -> Result<(), DaqError> {
        FileSink::flush(self)
    }
}

/// File sink with size-based rotation. When a record would push the active
/// file past `max_bytes`, backups shift up one index (`base.1` is always the
/// most recent) and the oldest beyond `max_backups` is deleted.
pub struct RotatingFileSink {
    base: PathBuf,
    max_bytes: u64,
    max_backups: usize,
    active: FileSink,
}

impl RotatingFileSink {
    pub fn create(
        base: impl AsRef<Path>,
        max_bytes: u64,
        max_backups: usize,
    ) -> Result<Self, DaqError> {
        let base = base.as_ref().to_path_buf();
        let active = FileSink::create(&base)?;
        Ok(RotatingFileSink {
            base,
            max_bytes,
            max_backups,
            active,
        })
    }

    pub fn active_path(&self) -> &Path {
        self.active.path()
    }

    pub fn flush(&mut self) -> Result<(), DaqError> {
        self.active.flush()
    }

    fn indexed(&self, index: usize) -> PathBuf {
        let mut name = self.base.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> Result<(), DaqError> {
        self.active.flush()?;
        if self.max_backups > 0 {
            let oldest = self.indexed(self.max_backups);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..self.max_backups).rev() {
                let from = self.indexed(index);
                if from.exists() {
                    fs::rename(&from, self.indexed(index + 1))?;
                }
            }
            fs::rename(&self.base, self.indexed(1))?;
        }
        trace!(base = %self.base.display(), "sink rotated");
        self.active = FileSink::create(&self.base)?;
        Ok(())
    }
}

impl<T: TypedState> DataSink<T> for RotatingFileSink {
    fn record(&mut self, sample: &Sample<T>) -> Result<(), DaqError> {
        let payload = sample.state.encode_to_vec();
        let record_len = RECORD_HEADER_LEN + payload.len() as u64;
        if self.active.bytes_written() > 0
            && self.active.bytes_written() + record_len > self.max_bytes
        {
            self.rotate()?;
        }
        self.active
            .write_record(sample.sequence, sample.timestamp_ns, &payload)
    }

    fn flush(&mut self) -> Result<(), DaqError> {
        RotatingFileSink::flush(self)
    }
}

/// Read every framed record from a sink file. A truncated tail record is
/// ignored, not an error.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<Record>, DaqError> {
    let mut contents = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut contents)?;
    let mut buf = Bytes::from(contents);

    let mut records = Vec::new();
    while buf.remaining() >= RECORD_HEADER_LEN as usize {
        let sequence = buf.get_u64_le();
        let timestamp_ns = buf.get_u64_le();
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            break;
        }
        records.push(Record {
            sequence,
            timestamp_ns,
            payload: buf.copy_to_bytes(len),
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::JointState;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("robokit-sink-{}-{name}", std::process::id()))
    }

    fn sample(sequence: u64, position: Vec<f64>) -> Sample<JointState> {
        Sample {
            sequence,
            timestamp_ns: 1_000 + sequence,
            state: JointState {
                position,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_records_roundtrip_through_file() {
        let path = temp_path("roundtrip");
        let mut sink = FileSink::create(&path).unwrap();
        sink.record(&sample(1, vec![0.5])).unwrap();
        sink.record(&sample(2, vec![1.5, 2.5])).unwrap();
        sink.flush().unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[1].sequence, 2);
        let state: JointState = records[1].decode().unwrap();
        assert_eq!(state.position, vec![1.5, 2.5]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let path = temp_path("truncated");
        let mut sink = FileSink::create(&path).unwrap();
        sink.record(&sample(1, vec![0.5])).unwrap();
        sink.flush().unwrap();

        // append a header that promises more payload than exists
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&2u64.to_le_bytes()).unwrap();
        file.write_all(&0u64.to_le_bytes()).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(b"short").unwrap();
        drop(file);

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_rotation_shifts_backups() {
        let base = temp_path("rotating");
        // room for roughly one record per file
        let mut sink = RotatingFileSink::create(&base, 48, 2).unwrap();
        for sequence in 1..=4 {
            sink.record(&sample(sequence, vec![1.0, 2.0])).unwrap();
        }
        sink.flush().unwrap();

        // newest record in the active file, older ones shifted up
        let active = read_records(&base).unwrap();
        assert_eq!(active.last().unwrap().sequence, 4);
        let first_backup = read_records(sink.indexed(1)).unwrap();
        assert!(first_backup.last().unwrap().sequence < 4);
        assert!(sink.indexed(2).exists());
        assert!(!sink.indexed(3).exists());

        let _ = fs::remove_file(&base);
        let _ = fs::remove_file(sink.indexed(1));
        let _ = fs::remove_file(sink.indexed(2));
    }

    #[test]
    fn test_zero_backups_truncates_in_place() {
        let base = temp_path("truncate-rotate");
        let mut sink = RotatingFileSink::create(&base, 48, 0).unwrap();
        for sequence in 1..=3 {
            sink.record(&sample(sequence, vec![1.0, 2.0])).unwrap();
        }
        sink.flush().unwrap();

        let records = read_records(&base).unwrap();
        assert_eq!(records.last().unwrap().sequence, 3);
        assert!(!sink.indexed(1).exists());

        let _ = fs::remove_file(&base);
    }
}

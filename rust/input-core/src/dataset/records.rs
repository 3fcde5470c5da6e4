// rust/input-core/src/dataset/records.rs

//! Record boundaries and streaming record reads from storage.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{InputError, Result};
use crate::storage::{StorageBackend, StorageReader};

/// Describes how to find record boundaries
pub trait RecordFormat: Send + Sync {
    /// Find the end of the record that starts at or after `offset` in `data`.
    /// Returns the byte position after the record ends (exclusive end).
    /// Returns None if no complete record is found.
    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize>;

    /// Length of the record payload once delimiters are removed.
    fn body_len(&self, record: &[u8]) -> usize {
        record.len()
    }

    /// Whether unterminated bytes at end of file form a final record.
    fn allows_partial_tail(&self) -> bool {
        false
    }

    /// Name of this record format
    fn name(&self) -> &'static str;
}

/// Fixed-size records
#[derive(Debug, Clone)]
pub struct FixedSizeFormat {
    pub record_size: usize,
}

impl FixedSizeFormat {
    pub fn new(record_size: usize) -> Self {
        Self { record_size }
    }
}

impl RecordFormat for FixedSizeFormat {
    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize> {
        if self.record_size == 0 || offset >= data.len() {
            return None;
        }

        // Records start at multiples of record_size
        let end = (offset / self.record_size + 1) * self.record_size;
        if end <= data.len() {
            Some(end)
        } else {
            None
        }
    }

    fn name(&self) -> &'static str {
        "fixed-size"
    }
}

/// Newline-delimited records (CSV lines)
#[derive(Debug, Clone, Default)]
pub struct NewlineDelimitedFormat;

impl NewlineDelimitedFormat {
    pub fn new() -> Self {
        Self
    }
}

impl RecordFormat for NewlineDelimitedFormat {
    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize> {
        if offset >= data.len() {
            return None;
        }

        data[offset..]
            .iter()
            .position(|&byte| byte == b'\n')
            .map(|i| offset + i + 1) // Include the newline
    }

    fn body_len(&self, record: &[u8]) -> usize {
        let mut len = record.len();
        if len > 0 && record[len - 1] == b'\n' {
            len -= 1;
        }
        if len > 0 && record[len - 1] == b'\r' {
            len -= 1;
        }
        len
    }

    fn allows_partial_tail(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "newline-delimited"
    }
}

/// Streams the records of one file in `chunk_size` reads.
///
/// Empty records (blank lines) are yielded as empty bytes. Only an empty
/// tail after the last terminator ends the file quietly.
pub struct RecordReader {
    path: PathBuf,
    reader: Box<dyn StorageReader>,
    format: Arc<dyn RecordFormat>,
    chunk_size: usize,
    offset: u64,
    size: u64,
    pending: BytesMut,
    searched: usize,
    done: bool,
}

impl fmt::Debug for RecordReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordReader")
            .field("path", &self.path)
            .field("format", &self.format.name())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

impl RecordReader {
    /// Opens `path` for record-by-record reading.
    pub fn open(
        storage: &dyn StorageBackend,
        path: &Path,
        format: Arc<dyn RecordFormat>,
        chunk_size: usize,
    ) -> Result<Self> {
        let reader = storage.open_read(path)?;
        let size = reader.size();
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            format,
            chunk_size: chunk_size.max(1),
            offset: 0,
            size,
            pending: BytesMut::new(),
            searched: 0,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the next record, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(end) = self.format.find_record_end(&self.pending, self.searched) {
                let record = self.pending.split_to(end).freeze();
                self.searched = 0;
                let len = self.format.body_len(&record);
                return Ok(Some(record.slice(..len)));
            }
            self.searched = self.pending.len();

            if self.offset >= self.size {
                return self.finish_tail();
            }

            let remaining = self.size - self.offset;
            let length = (self.chunk_size as u64).min(remaining) as usize;
            let chunk = self.reader.read_range(self.offset, length)?;
            if chunk.is_empty() {
                return Err(InputError::storage(
                    &self.path,
                    format!("unexpected end of file at position {}", self.offset),
                ));
            }
            self.offset += chunk.len() as u64;
            self.pending.extend_from_slice(&chunk);
        }
    }

    fn finish_tail(&mut self) -> Result<Option<Bytes>> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let tail = self.pending.split().freeze();
        self.searched = 0;
        if !self.format.allows_partial_tail() {
            return Err(InputError::storage(
                &self.path,
                format!(
                    "trailing partial {} record of {} bytes",
                    self.format.name(),
                    tail.len()
                ),
            ));
        }

        let len = self.format.body_len(&tail);
        if len == 0 {
            return Ok(None);
        }
        Ok(Some(tail.slice(..len)))
    }
}

impl Iterator for RecordReader {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfig;
    use crate::storage::LocalStorage;
    use std::fs;
    use tempfile::TempDir;

    fn read_all(data: &[u8], format: Arc<dyn RecordFormat>, chunk: usize) -> Vec<Result<Bytes>> {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train-00000");
        fs::write(&path, data).unwrap();

        let storage = LocalStorage::new(&ReaderConfig::default());
        RecordReader::open(&storage, &path, format, chunk)
            .unwrap()
            .collect()
    }

    #[test]
    fn test_newline_find_record_end() {
        let format = NewlineDelimitedFormat::new();
        let data = b"ab\ncd\n";

        assert_eq!(format.find_record_end(data, 0), Some(3));
        assert_eq!(format.find_record_end(data, 3), Some(6));
        assert_eq!(format.find_record_end(b"abc", 0), None);
        assert_eq!(format.find_record_end(data, 6), None);
    }

    #[test]
    fn test_newline_body_len_strips_crlf() {
        let format = NewlineDelimitedFormat::new();
        assert_eq!(format.body_len(b"1,2\r\n"), 3);
        assert_eq!(format.body_len(b"1,2\n"), 3);
        assert_eq!(format.body_len(b"1,2"), 3);
    }

    #[test]
    fn test_fixed_find_record_end() {
        let format = FixedSizeFormat::new(4);
        let data = [0u8; 10];

        assert_eq!(format.find_record_end(&data, 0), Some(4));
        assert_eq!(format.find_record_end(&data, 2), Some(4));
        assert_eq!(format.find_record_end(&data, 4), Some(8));
        assert_eq!(format.find_record_end(&data, 8), None);
    }

    #[test]
    fn test_reader_newline_small_chunks() {
        let records = read_all(
            b"1,2,3\n4,5,6\r\n7,8,9",
            Arc::new(NewlineDelimitedFormat::new()),
            2,
        );
        let records: Vec<Bytes> = records.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            records,
            vec![
                Bytes::from_static(b"1,2,3"),
                Bytes::from_static(b"4,5,6"),
                Bytes::from_static(b"7,8,9"),
            ]
        );
    }

    #[test]
    fn test_reader_yields_blank_lines() {
        let records = read_all(
            b"1,2,3\n\n4,5,6\r\n\r\n7,8,9\n",
            Arc::new(NewlineDelimitedFormat::new()),
            3,
        );
        let records: Vec<Bytes> = records.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            records,
            vec![
                Bytes::from_static(b"1,2,3"),
                Bytes::new(),
                Bytes::from_static(b"4,5,6"),
                Bytes::new(),
                Bytes::from_static(b"7,8,9"),
            ]
        );
    }

    #[test]
    fn test_reader_fixed_size() {
        let data: Vec<u8> = (0..12).collect();
        let records = read_all(&data, Arc::new(FixedSizeFormat::new(4)), 5);
        let records: Vec<Bytes> = records.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[2][..], &[8, 9, 10, 11]);
    }

    #[test]
    fn test_reader_fixed_size_partial_tail_is_error() {
        let data: Vec<u8> = (0..10).collect();
        let records = read_all(&data, Arc::new(FixedSizeFormat::new(4)), 64);
        assert_eq!(records.len(), 3);
        assert!(records[0].is_ok());
        assert!(records[1].is_ok());
        assert!(matches!(records[2], Err(InputError::Storage { .. })));
    }

    #[test]
    fn test_reader_empty_file() {
        let records = read_all(b"", Arc::new(NewlineDelimitedFormat::new()), 64);
        assert!(records.is_empty());
    }

    #[test]
    fn test_open_missing_file() {
        let storage = LocalStorage::new(&ReaderConfig::default());
        let result = RecordReader::open(
            &storage,
            Path::new("/nonexistent/train-00000"),
            Arc::new(NewlineDelimitedFormat::new()),
            64,
        );
        assert!(result.is_err());
    }
}

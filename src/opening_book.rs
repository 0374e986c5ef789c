//! A persistent opening book mapping canonical position hashes to columns
//!
//! The book is a plain dictionary behind one mutex, shared by the engine's
//! book-building workers. On disk it is a flat sequence of little-endian
//! `(u64 hash, u8 column)` records; nothing else, so a truncated tail is
//! easy to detect and tolerate.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::info;

/// The canonical book file name
pub const BOOK_PATH: &str = "opening_book.bin";

/// A shared map from canonical position hash to best column
///
/// Stored columns are always in the canonical orientation: readers whose
/// position hashed through its mirror flip the column through `6 - c`
///
/// # Example
/// ```
/// use connect4_engine::{bitboard::BitBoard, opening_book::OpeningBook};
///
/// let book = OpeningBook::new();
/// let (hash, _) = BitBoard::new().hash();
/// book.insert(hash, 3);
///
/// assert_eq!(book.lookup(hash), Some(3));
/// ```
#[derive(Default)]
pub struct OpeningBook {
    entries: Mutex<HashMap<u64, u8>>,
}

impl OpeningBook {
    /// Creates an empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the records of a book file into the in-memory book
    ///
    /// A missing file is expected and non-fatal: the engine simply computes
    /// openings from scratch. A partial record at the end of the file is
    /// dropped; everything read before it is kept. Returns the number of
    /// records read
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("no opening book at {}, computing from scratch", path.display());
                return Ok(0);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open book {}", path.display()))
            }
        };

        let mut reader = BufReader::new(file);
        let mut entries = self.entries.lock().unwrap();
        let mut count = 0;
        loop {
            let mut hash_bytes = [0u8; 8];
            let mut column = [0u8; 1];
            // stop at the first record that cannot be completed
            if read_record(&mut reader, &mut hash_bytes, &mut column)
                .with_context(|| format!("failed to read book {}", path.display()))?
                .is_none()
            {
                break;
            }
            entries.insert(u64::from_le_bytes(hash_bytes), column[0]);
            count += 1;
        }
        drop(entries);

        info!("loaded {} opening moves from {}", count, path.display());
        Ok(count)
    }

    /// Writes every record of the in-memory book to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create book {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let entries = self.entries.lock().unwrap();
        for (&hash, &column) in entries.iter() {
            writer
                .write_all(&hash.to_le_bytes())
                .and_then(|_| writer.write_all(&[column]))
                .with_context(|| format!("failed to write book {}", path.display()))?;
        }
        drop(entries);

        writer
            .flush()
            .with_context(|| format!("failed to flush book {}", path.display()))?;
        Ok(())
    }

    /// Looks up the stored column for a canonical hash
    pub fn lookup(&self, hash: u64) -> Option<usize> {
        self.entries.lock().unwrap().get(&hash).map(|&column| column as usize)
    }

    /// Returns whether the book already covers a canonical hash
    pub fn contains(&self, hash: u64) -> bool {
        self.entries.lock().unwrap().contains_key(&hash)
    }

    /// Records the best column for a canonical hash, returning the number
    /// of entries in the book afterwards
    pub fn insert(&self, hash: u64, column: usize) -> usize {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(hash, column as u8);
        entries.len()
    }

    /// The number of positions in the book
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads one `(u64, u8)` record; `Ok(None)` means the stream ended before a
/// whole record was available
fn read_record(
    reader: &mut impl Read,
    hash_bytes: &mut [u8; 8],
    column: &mut [u8; 1],
) -> io::Result<Option<()>> {
    match reader.read_exact(hash_bytes) {
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        other => other?,
    }
    match reader.read_exact(column) {
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        other => other?,
    }
    Ok(Some(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_book() {
        let dir = tempfile::tempdir().unwrap();
        let book = OpeningBook::new();
        let count = book.load(dir.path().join("no_such_book.bin")).unwrap();
        assert_eq!(count, 0);
        assert!(book.is_empty());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.bin");

        let book = OpeningBook::new();
        book.insert(0x0123_4567_89AB_CDEF, 3);
        book.insert(0xFEDC_BA98_7654_3210, 0);
        book.insert(42, 6);
        book.save(&path).unwrap();

        let restored = OpeningBook::new();
        assert_eq!(restored.load(&path).unwrap(), 3);
        assert_eq!(restored.lookup(0x0123_4567_89AB_CDEF), Some(3));
        assert_eq!(restored.lookup(0xFEDC_BA98_7654_3210), Some(0));
        assert_eq!(restored.lookup(42), Some(6));
        assert_eq!(restored.len(), 3);
    }

    #[test]
    fn partial_trailing_record_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.bin");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        bytes.push(4);
        // a record cut off mid-hash
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        std::fs::write(&path, bytes).unwrap();

        let book = OpeningBook::new();
        assert_eq!(book.load(&path).unwrap(), 1);
        assert_eq!(book.lookup(0x1122_3344_5566_7788), Some(4));
    }

    #[test]
    fn record_with_hash_but_no_column_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_column.bin");
        std::fs::write(&path, 99u64.to_le_bytes()).unwrap();

        let book = OpeningBook::new();
        assert_eq!(book.load(&path).unwrap(), 0);
        assert_eq!(book.lookup(99), None);
    }

    #[test]
    fn load_merges_into_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.bin");

        let book = OpeningBook::new();
        book.insert(1, 1);
        book.save(&path).unwrap();

        let other = OpeningBook::new();
        other.insert(2, 2);
        other.load(&path).unwrap();
        assert_eq!(other.lookup(1), Some(1));
        assert_eq!(other.lookup(2), Some(2));
    }

    #[test]
    fn insert_reports_book_size() {
        let book = OpeningBook::new();
        assert_eq!(book.insert(1, 3), 1);
        assert_eq!(book.insert(2, 3), 2);
        // overwriting does not grow the book
        assert_eq!(book.insert(1, 4), 2);
    }
}

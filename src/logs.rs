/*!
The block-framed log file format shared by write-ahead logs and manifest files.

Log file contents are a series of 32 KiB blocks. Each record stored in a block carries a 7 byte
header: a 4 byte masked CRC of the payload, a 2 byte payload length, and a 1 byte fragment type.
A user record larger than the space remaining in a block is split into first/middle/last
fragments; a record that fits whole is written as a full fragment.

A record never starts within the last 6 bytes of a block (a header would not fit). Leftover
bytes there form a trailer of zero bytes that readers must skip.
*/

use crc::{Crc, CRC_32_ISCSI};
use integer_encoding::FixedInt;
use std::convert::{TryFrom, TryInto};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{
    LogCorruptionErrorMetadata, LogIOError, LogSerializationErrorKind,
};
use crate::fs::{FileSystem, RandomAccessFile, ReadonlyRandomAccessFile};
use crate::utils::crc::{mask_checksum, unmask_checksum};

/// The length of record headers: 4 byte checksum + 2 byte length + 1 byte fragment type.
const HEADER_LENGTH_BYTES: usize = 4 + 2 + 1;

/**
The size of blocks in the log file format.

This is set at 32 KiB.
*/
const BLOCK_SIZE_BYTES: usize = 32 * 1024;

/// CRC calculator using the iSCSI polynomial.
const CRC_CALCULATOR: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Alias for a [`Result`] that wraps a [`LogIOError`].
pub(crate) type LogIOResult<T> = Result<T, LogIOError>;

/**
Fragment types denote whether a stored chunk carries a whole user record or which part of a
split record it carries.
*/
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FragmentType {
    /// The chunk contains the entirety of a user record.
    Full = 0,

    /// The first fragment of a user record.
    First,

    /// An interior fragment of a user record.
    Middle,

    /// The last fragment of a user record.
    Last,
}

impl TryFrom<u8> for FragmentType {
    type Error = LogIOError;

    fn try_from(value: u8) -> LogIOResult<FragmentType> {
        match value {
            0 => Ok(FragmentType::Full),
            1 => Ok(FragmentType::First),
            2 => Ok(FragmentType::Middle),
            3 => Ok(FragmentType::Last),
            _ => Err(LogIOError::Serialization(LogSerializationErrorKind::Other(
                format!(
                    "There was a problem parsing the fragment type. The value received was \
                    {value}."
                ),
            ))),
        }
    }
}

/** Handles all write activity to a log file. */
pub(crate) struct LogWriter {
    /// The path to the log file.
    log_file_path: PathBuf,

    /// The underlying file representing the log.
    log_file: Box<dyn RandomAccessFile>,

    /**
    The offset within the current block being written to.

    This is not necessarily aligned to a block boundary.
    */
    current_block_offset: usize,
}

/// Crate-only methods
impl LogWriter {
    /**
    Construct a new [`LogWriter`].

    With `is_appending` set to true an existing log file is extended, otherwise any existing
    file is truncated.
    */
    pub(crate) fn new<P: AsRef<Path>>(
        fs: Arc<dyn FileSystem>,
        log_file_path: P,
        is_appending: bool,
    ) -> LogIOResult<Self> {
        log::debug!(
            "Creating/appending to a log file at {path}.",
            path = log_file_path.as_ref().to_string_lossy()
        );
        let log_file = fs.create_file(log_file_path.as_ref(), is_appending)?;
        let current_block_offset = (log_file.len()? as usize) % BLOCK_SIZE_BYTES;

        Ok(LogWriter {
            log_file_path: log_file_path.as_ref().to_path_buf(),
            log_file,
            current_block_offset,
        })
    }

    /// Append `data` to the log as a single record.
    pub(crate) fn append(&mut self, data: &[u8]) -> LogIOResult<()> {
        let mut remaining = data;
        let mut is_first_fragment = true;

        loop {
            let block_available_space = BLOCK_SIZE_BYTES - self.current_block_offset;
            if block_available_space < HEADER_LENGTH_BYTES {
                if block_available_space > 0 {
                    // Not enough room for a header; fill the trailer with zeroes
                    self.log_file.write_all(&vec![0; block_available_space])?;
                }
                self.current_block_offset = 0;
            }

            let space_for_payload =
                BLOCK_SIZE_BYTES - self.current_block_offset - HEADER_LENGTH_BYTES;
            let fragment_length = remaining.len().min(space_for_payload);
            let is_last_fragment = fragment_length == remaining.len();
            let fragment_type = match (is_first_fragment, is_last_fragment) {
                (true, true) => FragmentType::Full,
                (true, false) => FragmentType::First,
                (false, true) => FragmentType::Last,
                (false, false) => FragmentType::Middle,
            };

            self.emit_fragment(fragment_type, &remaining[..fragment_length])?;
            remaining = &remaining[fragment_length..];
            is_first_fragment = false;

            if remaining.is_empty() {
                // Loop structured so that appending an empty buffer still emits a zero-length
                // record
                break;
            }
        }

        Ok(())
    }

    /// Force all appended records down to persistent storage.
    pub(crate) fn sync(&mut self) -> LogIOResult<()> {
        self.log_file.sync()?;

        Ok(())
    }
}

/// Private methods
impl LogWriter {
    /// Write a single fragment out to the underlying file.
    fn emit_fragment(&mut self, fragment_type: FragmentType, payload: &[u8]) -> LogIOResult<()> {
        let payload_length = u16::try_from(payload.len())?;
        let checksum = mask_checksum(CRC_CALCULATOR.checksum(payload));

        let mut buffer: Vec<u8> = Vec::with_capacity(HEADER_LENGTH_BYTES + payload.len());
        buffer.extend_from_slice(&u32::encode_fixed_vec(checksum));
        buffer.extend_from_slice(&u16::encode_fixed_vec(payload_length));
        buffer.push(fragment_type as u8);
        buffer.extend_from_slice(payload);

        self.log_file.write_all(&buffer)?;
        self.log_file.flush()?;
        self.current_block_offset += buffer.len();

        Ok(())
    }
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogWriter")
            .field("log_file_path", &self.log_file_path)
            .finish()
    }
}

/** Handles all read activity on a log file. */
pub(crate) struct LogReader {
    /// The underlying file representing the log.
    log_file: Box<dyn ReadonlyRandomAccessFile>,

    /// The path to the log file.
    log_file_path: PathBuf,

    /// The byte offset the next physical read will occur at.
    cursor: usize,
}

/// Crate-only methods
impl LogReader {
    /// Construct a new [`LogReader`] over the file at `log_file_path`.
    pub(crate) fn new<P: AsRef<Path>>(
        fs: Arc<dyn FileSystem>,
        log_file_path: P,
    ) -> LogIOResult<Self> {
        log::debug!(
            "Reading the log file at {path}.",
            path = log_file_path.as_ref().to_string_lossy()
        );
        let log_file = fs.open_file(log_file_path.as_ref())?;

        Ok(Self {
            log_file,
            log_file_path: log_file_path.as_ref().to_path_buf(),
            cursor: 0,
        })
    }

    /**
    Read the next record from the log file.

    Returns [`None`] once the end of the log is reached cleanly. A record cut short by a crash
    mid-append surfaces as a [`LogIOError::Corruption`]; callers decide whether that is fatal
    (manifest reads with paranoid checks) or a truncation point (WAL replay).
    */
    pub(crate) fn read_record(&mut self) -> LogIOResult<Option<Vec<u8>>> {
        let mut assembled: Vec<u8> = vec![];
        let mut is_mid_record = false;

        loop {
            let fragment = match self.read_fragment()? {
                Some(fragment) => fragment,
                None => {
                    if is_mid_record {
                        return Err(self.corruption_error(
                            assembled.len() as u64,
                            "The log ended in the middle of a fragmented record.",
                        ));
                    }
                    return Ok(None);
                }
            };

            let (fragment_type, mut payload) = fragment;
            match fragment_type {
                FragmentType::Full => {
                    if is_mid_record {
                        return Err(self.corruption_error(
                            assembled.len() as u64,
                            "Found a full fragment in the middle of a fragmented record.",
                        ));
                    }
                    return Ok(Some(payload));
                }
                FragmentType::First => {
                    if is_mid_record {
                        return Err(self.corruption_error(
                            assembled.len() as u64,
                            "Found a first fragment in the middle of a fragmented record.",
                        ));
                    }
                    is_mid_record = true;
                    assembled.append(&mut payload);
                }
                FragmentType::Middle => {
                    if !is_mid_record {
                        return Err(self.corruption_error(
                            payload.len() as u64,
                            "Found a middle fragment without a preceding first fragment.",
                        ));
                    }
                    assembled.append(&mut payload);
                }
                FragmentType::Last => {
                    if !is_mid_record {
                        return Err(self.corruption_error(
                            payload.len() as u64,
                            "Found a last fragment without a preceding first fragment.",
                        ));
                    }
                    assembled.append(&mut payload);
                    return Ok(Some(assembled));
                }
            }
        }
    }
}

/// Private methods
impl LogReader {
    /**
    Read a single physical fragment from the file.

    Returns [`None`] at a clean end of file.
    */
    fn read_fragment(&mut self) -> LogIOResult<Option<(FragmentType, Vec<u8>)>> {
        let file_length = self.log_file.len()? as usize;

        loop {
            let offset_in_block = self.cursor % BLOCK_SIZE_BYTES;
            let remaining_in_block = BLOCK_SIZE_BYTES - offset_in_block;
            if remaining_in_block < HEADER_LENGTH_BYTES {
                // Skip over the zero-filled block trailer
                self.cursor += remaining_in_block;
                continue;
            }

            if self.cursor >= file_length {
                return Ok(None);
            }

            if self.cursor + HEADER_LENGTH_BYTES > file_length {
                // A header was cut short by a crash mid-append
                return Err(self.corruption_error(
                    (file_length - self.cursor) as u64,
                    "The log ended in the middle of a fragment header.",
                ));
            }

            let mut header = [0_u8; HEADER_LENGTH_BYTES];
            self.log_file.read_from(&mut header, self.cursor)?;

            let stored_checksum = unmask_checksum(u32::decode_fixed(&header[0..4]));
            let payload_length = u16::decode_fixed(&header[4..6]) as usize;
            let fragment_type: FragmentType = header[6].try_into()?;

            let payload_start = self.cursor + HEADER_LENGTH_BYTES;
            if payload_start + payload_length > file_length {
                return Err(self.corruption_error(
                    (file_length - self.cursor) as u64,
                    "The log ended in the middle of a fragment payload.",
                ));
            }

            let mut payload = vec![0_u8; payload_length];
            self.log_file.read_from(&mut payload, payload_start)?;

            let calculated_checksum = CRC_CALCULATOR.checksum(&payload);
            if calculated_checksum != stored_checksum {
                return Err(self.corruption_error(
                    (HEADER_LENGTH_BYTES + payload_length) as u64,
                    "The fragment checksum did not match its payload.",
                ));
            }

            self.cursor = payload_start + payload_length;
            return Ok(Some((fragment_type, payload)));
        }
    }

    /// Build a corruption error for the current read position.
    fn corruption_error(&self, bytes_corrupted: u64, reason: &str) -> LogIOError {
        log::error!(
            "Corruption detected in log file {path:?} at offset {offset}: {reason}",
            path = self.log_file_path,
            offset = self.cursor
        );

        LogIOError::Corruption(LogCorruptionErrorMetadata {
            bytes_corrupted,
            reason: reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::io::{Read, Write};

    use crate::fs::InMemoryFileSystem;

    use super::*;

    fn test_fs() -> Arc<dyn FileSystem> {
        let fs = InMemoryFileSystem::new();
        fs.create_dir_all(Path::new("/db")).unwrap();
        Arc::new(fs)
    }

    #[test]
    fn records_round_trip_in_order() {
        let fs = test_fs();
        let path = PathBuf::from("/db/000001.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &path, false).unwrap();
        writer.append(b"first record").unwrap();
        writer.append(b"second record").unwrap();
        writer.append(b"").unwrap();
        drop(writer);

        let mut reader = LogReader::new(fs, &path).unwrap();
        assert_eq!(reader.read_record().unwrap(), Some(b"first record".to_vec()));
        assert_eq!(
            reader.read_record().unwrap(),
            Some(b"second record".to_vec())
        );
        assert_eq!(reader.read_record().unwrap(), Some(vec![]));
        assert_eq!(reader.read_record().unwrap(), None);
    }

    #[test]
    fn large_records_are_fragmented_across_blocks() {
        let fs = test_fs();
        let path = PathBuf::from("/db/000001.log");

        // Three blocks worth of payload forces first/middle/last fragments
        let large_record: Vec<u8> = (0..(BLOCK_SIZE_BYTES * 3))
            .map(|idx| (idx % 251) as u8)
            .collect();
        let mut writer = LogWriter::new(Arc::clone(&fs), &path, false).unwrap();
        writer.append(&large_record).unwrap();
        writer.append(b"after the big one").unwrap();
        drop(writer);

        let mut reader = LogReader::new(fs, &path).unwrap();
        assert_eq!(reader.read_record().unwrap(), Some(large_record));
        assert_eq!(
            reader.read_record().unwrap(),
            Some(b"after the big one".to_vec())
        );
        assert_eq!(reader.read_record().unwrap(), None);
    }

    #[test]
    fn appending_continues_an_existing_log() {
        let fs = test_fs();
        let path = PathBuf::from("/db/000001.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &path, false).unwrap();
        writer.append(b"one").unwrap();
        drop(writer);

        let mut appender = LogWriter::new(Arc::clone(&fs), &path, true).unwrap();
        appender.append(b"two").unwrap();
        drop(appender);

        let mut reader = LogReader::new(fs, &path).unwrap();
        assert_eq!(reader.read_record().unwrap(), Some(b"one".to_vec()));
        assert_eq!(reader.read_record().unwrap(), Some(b"two".to_vec()));
        assert_eq!(reader.read_record().unwrap(), None);
    }

    #[test]
    fn a_truncated_record_surfaces_as_corruption() {
        let fs = test_fs();
        let path = PathBuf::from("/db/000001.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &path, false).unwrap();
        writer.append(b"this record will be cut short").unwrap();
        drop(writer);

        // Chop off the last few bytes to simulate a crash mid-append
        let mut truncated = vec![];
        fs.open_file(&path)
            .unwrap()
            .read_to_end(&mut truncated)
            .unwrap();
        truncated.truncate(truncated.len() - 4);
        fs.create_file(&path, false)
            .unwrap()
            .write_all(&truncated)
            .unwrap();

        let mut reader = LogReader::new(fs, &path).unwrap();
        let result = reader.read_record();
        assert!(matches!(result, Err(LogIOError::Corruption(_))));
    }

    #[test]
    fn a_corrupted_payload_fails_its_checksum() {
        let fs = test_fs();
        let path = PathBuf::from("/db/000001.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &path, false).unwrap();
        writer.append(b"payload under test").unwrap();
        drop(writer);

        let mut raw = vec![];
        fs.open_file(&path).unwrap().read_to_end(&mut raw).unwrap();
        // Flip a payload byte past the 7 byte header
        raw[10] ^= 0xff;
        fs.create_file(&path, false).unwrap().write_all(&raw).unwrap();

        let mut reader = LogReader::new(fs, &path).unwrap();
        let result = reader.read_record();
        assert!(matches!(result, Err(LogIOError::Corruption(_))));
    }
}

//! Binary log reader

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use lz4_flex::decompress_size_prepended;

use super::{LOG_MAGIC, LOG_VERSION, LogBody, LogFlags, LogFormatError, LogHeader};

/// Reader for the binary log format
pub struct LogReader<R: Read> {
    reader: R,
}

impl<R: Read> LogReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read a complete log
    pub fn read_log(&mut self) -> Result<(LogHeader, LogBody), LogFormatError> {
        let header = self.read_header()?;

        let len = self.reader.read_u32::<LittleEndian>()? as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;

        let encoded = if header.flags.contains(LogFlags::COMPRESSED) {
            decompress_size_prepended(&payload)?
        } else {
            payload
        };
        let body: LogBody = bincode::deserialize(&encoded).map_err(LogFormatError::Decode)?;

        if body.entries.len() as u64 != header.entry_count {
            return Err(LogFormatError::EntryCountMismatch {
                header: header.entry_count,
                body: body.entries.len() as u64,
            });
        }
        Ok((header, body))
    }

    /// Read and validate the 24-byte header
    pub fn read_header(&mut self) -> Result<LogHeader, LogFormatError> {
        let mut magic = [0u8; 4];
        self.reader.read_exact(&mut magic)?;
        if magic != LOG_MAGIC {
            return Err(LogFormatError::BadMagic(magic));
        }

        let version = self.reader.read_u16::<LittleEndian>()?;
        if version != LOG_VERSION {
            return Err(LogFormatError::UnsupportedVersion(version));
        }

        let flags = LogFlags::from_bits_truncate(self.reader.read_u16::<LittleEndian>()?);
        let entry_count = self.reader.read_u64::<LittleEndian>()?;
        let last_event_time = self.reader.read_i64::<LittleEndian>()?;

        Ok(LogHeader {
            magic,
            version,
            flags,
            entry_count,
            last_event_time,
        })
    }
}

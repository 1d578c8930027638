//! Binary log writer

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use lz4_flex::compress_prepend_size;

use super::{LogBody, LogFlags, LogFormatError, LogHeader};

/// Writer for the binary log format
pub struct LogWriter<W: Write> {
    writer: W,
}

impl<W: Write> LogWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a complete log
    pub fn write_log(&mut self, header: &LogHeader, body: &LogBody) -> Result<(), LogFormatError> {
        self.write_header(header)?;

        let encoded = bincode::serialize(body).map_err(LogFormatError::Encode)?;
        let payload = if header.flags.contains(LogFlags::COMPRESSED) {
            compress_prepend_size(&encoded)
        } else {
            encoded
        };

        let len = u32::try_from(payload.len())
            .map_err(|_| LogFormatError::BodyTooLarge(payload.len()))?;
        self.writer.write_u32::<LittleEndian>(len)?;
        self.writer.write_all(&payload)?;
        log::debug!(
            "Wrote log body: {} entries, {} bytes{}",
            body.entries.len(),
            payload.len(),
            if header.flags.contains(LogFlags::COMPRESSED) {
                " (compressed)"
            } else {
                ""
            }
        );
        Ok(())
    }

    /// Write the 24-byte header
    fn write_header(&mut self, header: &LogHeader) -> Result<(), LogFormatError> {
        self.writer.write_all(&header.magic)?;
        self.writer.write_u16::<LittleEndian>(header.version)?;
        self.writer.write_u16::<LittleEndian>(header.flags.bits())?;
        self.writer.write_u64::<LittleEndian>(header.entry_count)?;
        self.writer.write_i64::<LittleEndian>(header.last_event_time)?;
        Ok(())
    }

    /// Consume the writer and return the inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

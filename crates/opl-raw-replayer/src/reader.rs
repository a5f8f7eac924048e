//! Bounds-checked little-endian reads over a file image.

use opl_common::LoadError;

pub(crate) struct ByteReader<'a> {
    format: &'static str,
    data: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(format: &'static str, data: &'a [u8]) -> Self {
        Self { format, data }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    fn truncated(&self, offset: usize, needed: usize) -> LoadError {
        LoadError::invalid(
            self.format,
            format!("truncated at offset {offset}: need {needed} more byte(s)"),
        )
    }

    pub(crate) fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], LoadError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| self.truncated(offset, len))
    }

    pub(crate) fn read_u8(&self, offset: usize) -> Result<u8, LoadError> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub(crate) fn read_u16(&self, offset: usize) -> Result<u16, LoadError> {
        let bytes = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&self, offset: usize) -> Result<u32, LoadError> {
        let bytes = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// NUL-terminated string starting at `offset`, at most `max` bytes long.
    ///
    /// Returns the text and the offset just past the terminator (or past the
    /// last byte read when the string is unterminated).
    pub(crate) fn read_nt_string(&self, offset: usize, max: usize) -> (String, usize) {
        let tail = self.data.get(offset..).unwrap_or_default();
        let limit = tail.len().min(max);
        match tail[..limit].iter().position(|&b| b == 0) {
            Some(nul) => (decode_text(&tail[..nul]), offset + nul + 1),
            None => (decode_text(&tail[..limit]), offset + limit),
        }
    }
}

/// Latin-1 text as found in DOS-era tags.
fn decode_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

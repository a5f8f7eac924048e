//! Bounds-checked access to the music program buffer.

use opl_common::CorruptProgram;

type Result<T> = std::result::Result<T, CorruptProgram>;

/// Owned sound data: program table, instruments and program streams.
#[derive(Debug, Clone, Default)]
pub(crate) struct SoundData {
    bytes: Vec<u8>,
}

impl SoundData {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    fn out_of_bounds(&self, offset: usize) -> CorruptProgram {
        CorruptProgram::OutOfBounds {
            offset,
            len: self.bytes.len(),
        }
    }

    pub(crate) fn byte(&self, offset: usize) -> Result<u8> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or_else(|| self.out_of_bounds(offset))
    }

    /// Read the byte at `*pos` and advance.
    pub(crate) fn next(&self, pos: &mut usize) -> Result<u8> {
        let value = self.byte(*pos)?;
        *pos += 1;
        Ok(value)
    }

    pub(crate) fn le_u16(&self, offset: usize) -> Result<u16> {
        let lo = self.byte(offset)?;
        let hi = self.byte(offset + 1)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub(crate) fn be_u16(&self, offset: usize) -> Result<u16> {
        let hi = self.byte(offset)?;
        let lo = self.byte(offset + 1)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub(crate) fn set_byte(&mut self, offset: usize, value: u8) -> Result<u8> {
        let len = self.bytes.len();
        let slot = self
            .bytes
            .get_mut(offset)
            .ok_or(CorruptProgram::OutOfBounds { offset, len })?;
        Ok(std::mem::replace(slot, value))
    }

    /// Offset of program `id` from the program table.
    pub(crate) fn program_offset(&self, id: usize) -> Result<usize> {
        Ok(usize::from(self.le_u16(2 * id)?))
    }

    /// Move `pos` by a signed displacement, staying inside the buffer.
    pub(crate) fn displace(&self, pos: usize, by: i16) -> Result<usize> {
        pos.checked_add_signed(isize::from(by))
            .filter(|&target| target < self.bytes.len())
            .ok_or_else(|| self.out_of_bounds(pos.saturating_add_signed(isize::from(by))))
    }
}

//! Harmonic stereo transposition
//!
//! [`SurroundOpl`] drives two mono sinks. The left sink receives the register
//! stream unchanged; the right sink receives the same stream with every
//! channel frequency raised by a small ratio. Mixing the two as left/right
//! gives a wide, chorus-like stereo image instead of a doubled mono signal.
//!
//! The F-number is a 10-bit field, so a raised frequency can run out of range
//! near the top of a block. When that happens the note moves to the adjacent
//! block; at the outermost blocks the right sink plays the untransposed note.

use serde::{Deserialize, Serialize};

use crate::backend::RegisterSink;
use crate::registers::{self, FrequencyRegisters, BLOCK_MAX, FNUM_MAX, KEY_ON};
use crate::{OplError, Result};

/// Frames rendered per inner-sink call.
pub const SCRATCH_FRAMES: usize = 4096;

/// Tuning for the transposition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurroundConfig {
    /// Frequency divisor: the right sink plays `freq + freq / offset`
    pub offset: f64,
    /// Distance from either end of the F-number range that triggers a block change
    pub block_margin: u16,
}

impl Default for SurroundConfig {
    fn default() -> Self {
        Self {
            offset: 128.0,
            block_margin: 32,
        }
    }
}

impl SurroundConfig {
    /// Check that the configuration can be used.
    pub fn validate(&self) -> Result<()> {
        if !self.offset.is_finite() || self.offset == 0.0 {
            return Err(OplError::ConfigError(format!(
                "surround offset must be finite and non-zero, got {}",
                self.offset
            )));
        }
        if self.block_margin > FNUM_MAX / 2 {
            return Err(OplError::ConfigError(format!(
                "surround block margin {} leaves no usable F-number range",
                self.block_margin
            )));
        }
        Ok(())
    }
}

/// Compute the transposed F-number/block for `original`.
///
/// The key-on flag is carried over unchanged.
pub fn transpose_frequency(original: FrequencyRegisters, config: &SurroundConfig) -> FrequencyRegisters {
    let hz = original.frequency_hz();
    let target = hz + hz / config.offset;
    let margin = f64::from(config.block_margin);
    let fnum_at = |block: u8| registers::hz_to_fnum(target, block);

    let naive = fnum_at(original.block);
    let shifted = if naive > f64::from(FNUM_MAX) - margin {
        (original.block < BLOCK_MAX).then(|| (original.block + 1, fnum_at(original.block + 1)))
    } else if naive < margin {
        (original.block > 0).then(|| (original.block - 1, fnum_at(original.block - 1)))
    } else {
        Some((original.block, naive))
    };

    match shifted.and_then(|(block, fnum)| Some((block, chip_fnum(fnum)?))) {
        Some((block, fnum)) => FrequencyRegisters {
            fnum,
            block,
            key_on: original.key_on,
        },
        None => original,
    }
}

/// Truncate `fnum` to the chip's integer F-number, or `None` past its range.
fn chip_fnum(fnum: f64) -> Option<u16> {
    let truncated = fnum as u16;
    (truncated <= FNUM_MAX).then_some(truncated)
}

/// Stereo sink pairing an untouched chip with a transposed twin
pub struct SurroundOpl<A: RegisterSink, B: RegisterSink> {
    left: A,
    right: B,
    config: SurroundConfig,
    /// Register file as written by the replayer
    registers: [u8; 256],
    /// Register file as forwarded to the right sink
    tweaked: [u8; 256],
    left_buf: Vec<i16>,
    right_buf: Vec<i16>,
}

impl<A: RegisterSink, B: RegisterSink> SurroundOpl<A, B> {
    /// Wrap two mono sinks using the default configuration.
    pub fn new(left: A, right: B) -> Self {
        if left.is_stereo() || right.is_stereo() {
            log::warn!("SurroundOpl expects mono sinks; only the first channel of each is used");
        }
        Self {
            left,
            right,
            config: SurroundConfig::default(),
            registers: [0; 256],
            tweaked: [0; 256],
            left_buf: vec![0; SCRATCH_FRAMES],
            right_buf: vec![0; SCRATCH_FRAMES],
        }
    }

    /// Wrap two mono sinks with a custom configuration.
    pub fn with_config(left: A, right: B, config: SurroundConfig) -> Result<Self> {
        config.validate()?;
        let mut surround = Self::new(left, right);
        surround.config = config;
        Ok(surround)
    }

    /// Current configuration.
    pub fn config(&self) -> &SurroundConfig {
        &self.config
    }

    /// Change the frequency offset used for subsequent writes.
    pub fn set_offset(&mut self, offset: f64) -> Result<()> {
        let config = SurroundConfig {
            offset,
            ..self.config
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// The untouched sink.
    pub fn left(&self) -> &A {
        &self.left
    }

    /// The transposed sink.
    pub fn right(&self) -> &B {
        &self.right
    }

    /// Split back into the two inner sinks.
    pub fn into_inner(self) -> (A, B) {
        (self.left, self.right)
    }

    fn forward_right(&mut self, addr: u8, value: u8) {
        self.right.write_register(addr, value);
        self.tweaked[addr as usize] = value;
    }
}

impl<A: RegisterSink, B: RegisterSink> RegisterSink for SurroundOpl<A, B> {
    fn write_register(&mut self, addr: u8, value: u8) {
        self.left.write_register(addr, value);
        self.registers[addr as usize] = value;

        let channel = (addr & 0x0F) as usize;
        let is_low = (0xA0..=0xA8).contains(&addr);
        let is_high = (0xB0..=0xB8).contains(&addr);
        if !is_low && !is_high {
            self.forward_right(addr, value);
            return;
        }

        let high = self.registers[0xB0 + channel];
        let original = FrequencyRegisters::from_registers(self.registers[0xA0 + channel], high);
        let shifted = transpose_frequency(original, &self.config);

        if is_high {
            let low = shifted.low_byte();
            if self.tweaked[0xA0 + channel] != low {
                self.forward_right(0xA0 + channel as u8, low);
            }
            self.forward_right(addr, shifted.high_byte(value));
        } else {
            let new_high = shifted.high_byte(high);
            // Only re-key a note that is already sounding
            if new_high & KEY_ON != 0 && self.tweaked[0xB0 + channel] != new_high {
                self.forward_right(0xB0 + channel as u8, new_high);
            }
            self.forward_right(addr, shifted.low_byte());
        }
    }

    fn render(&mut self, buffer: &mut [i16]) {
        for chunk in buffer.chunks_mut(SCRATCH_FRAMES * 2) {
            let frames = chunk.len() / 2;
            let left = &mut self.left_buf[..frames];
            let right = &mut self.right_buf[..frames];
            self.left.render(left);
            self.right.render(right);
            for (frame, (&l, &r)) in chunk.chunks_exact_mut(2).zip(left.iter().zip(right.iter())) {
                frame[0] = l;
                frame[1] = r;
            }
        }
    }

    fn is_stereo(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.registers = [0; 256];
        self.tweaked = [0; 256];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegisterLog, RegisterLogEntry};

    fn surround() -> SurroundOpl<RegisterLog, RegisterLog> {
        SurroundOpl::new(RegisterLog::new(), RegisterLog::new())
    }

    #[test]
    fn test_left_receives_stream_verbatim() {
        let mut opl = surround();
        opl.write_register(0x20, 0x01);
        opl.write_register(0xA0, 0x41);
        opl.write_register(0xB0, 0x32);
        let writes: Vec<_> = opl.left().writes().collect();
        assert_eq!(writes, vec![(0x20, 0x01), (0xA0, 0x41), (0xB0, 0x32)]);
    }

    #[test]
    fn test_non_frequency_registers_pass_through() {
        let mut opl = surround();
        opl.write_register(0x43, 0x10);
        opl.write_register(0xBD, 0xC0);
        opl.write_register(0xC3, 0x01);
        let writes: Vec<_> = opl.right().writes().collect();
        assert_eq!(writes, vec![(0x43, 0x10), (0xBD, 0xC0), (0xC3, 0x01)]);
    }

    #[test]
    fn test_mid_range_note_is_raised() {
        let original = FrequencyRegisters {
            fnum: 512,
            block: 4,
            key_on: true,
        };
        let shifted = transpose_frequency(original, &SurroundConfig::default());
        assert_eq!(shifted.block, 4);
        assert_eq!(shifted.fnum, 516);
        assert!(shifted.key_on);
    }

    #[test]
    fn test_high_fnum_moves_up_a_block() {
        let original = FrequencyRegisters {
            fnum: 1000,
            block: 3,
            key_on: true,
        };
        let shifted = transpose_frequency(original, &SurroundConfig::default());
        assert_eq!(shifted.block, 4);
        assert_eq!(shifted.fnum, 503);
    }

    #[test]
    fn test_range_check_after_truncation() {
        assert_eq!(chip_fnum(1023.9), Some(1023));
        assert_eq!(chip_fnum(1024.0), None);
        assert_eq!(chip_fnum(0.5), Some(0));
    }

    #[test]
    fn test_top_block_falls_back_to_original() {
        for fnum in 992..=1023 {
            let original = FrequencyRegisters {
                fnum,
                block: 7,
                key_on: true,
            };
            assert_eq!(transpose_frequency(original, &SurroundConfig::default()), original);
        }
    }

    #[test]
    fn test_bottom_block_falls_back_to_original() {
        for fnum in 0..31 {
            let original = FrequencyRegisters {
                fnum,
                block: 0,
                key_on: false,
            };
            assert_eq!(transpose_frequency(original, &SurroundConfig::default()), original);
        }
    }

    #[test]
    fn test_low_fnum_moves_down_a_block() {
        let original = FrequencyRegisters {
            fnum: 20,
            block: 2,
            key_on: true,
        };
        let shifted = transpose_frequency(original, &SurroundConfig::default());
        assert_eq!(shifted.block, 1);
        assert_eq!(shifted.fnum, 40);
    }

    #[test]
    fn test_key_on_write_rewrites_block_and_low_byte() {
        let mut opl = surround();
        opl.write_register(0xA3, 0xE8); // fnum low of 1000
        opl.write_register(0xB3, 0x2F); // key on, block 3, fnum high 3
        let right: Vec<_> = opl.right().writes().collect();
        // fnum 1000 @ block 3 becomes 503 @ block 4
        assert_eq!(right.last(), Some(&(0xB3, 0x31)));
        assert!(right.contains(&(0xA3, 0xF7)));
        assert_eq!(opl.right().last_value(0xB3).map(|v| v & KEY_ON), Some(KEY_ON));
    }

    #[test]
    fn test_low_byte_write_updates_playing_note() {
        let mut opl = surround();
        opl.write_register(0xA0, 0x00);
        opl.write_register(0xB0, 0x32); // key on, block 4, fnum 0x200
        let before = opl.right().len();

        opl.write_register(0xA0, 0xE8); // fnum 0x2E8
        let added: Vec<_> = opl.right().entries()[before..].to_vec();
        assert_eq!(added.len(), 1);
        assert!(matches!(added[0], RegisterLogEntry::Write { reg: 0xA0, .. }));
    }

    #[test]
    fn test_low_byte_write_while_key_off_defers_block() {
        let mut opl = surround();
        opl.write_register(0xB1, 0x0F); // key off, block 3, fnum high 3
        let before = opl.right().len();
        opl.write_register(0xA1, 0xE8); // fnum 1000 needs block 4
        let added: Vec<_> = opl.right().writes().skip(before).collect();
        assert_eq!(added, vec![(0xA1, 0xF7)]);
    }

    #[test]
    fn test_render_interleaves() {
        let mut opl = surround();
        let mut buffer = [7i16; 10];
        opl.render(&mut buffer);
        assert!(buffer.iter().all(|&s| s == 0));
        assert!(opl.is_stereo());
    }

    #[test]
    fn test_config_validation() {
        assert!(SurroundConfig::default().validate().is_ok());
        let bad = SurroundConfig {
            offset: 0.0,
            ..SurroundConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(SurroundOpl::with_config(RegisterLog::new(), RegisterLog::new(), bad).is_err());

        let mut opl = surround();
        assert!(opl.set_offset(f64::NAN).is_err());
        assert!(opl.set_offset(64.0).is_ok());
        assert_eq!(opl.config().offset, 64.0);
    }

    #[test]
    fn test_config_from_json() {
        let config: SurroundConfig = serde_json::from_str(r#"{ "offset": 64.0 }"#).unwrap();
        assert_eq!(config.offset, 64.0);
        assert_eq!(config.block_margin, 32);
    }
}

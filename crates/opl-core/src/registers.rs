//! OPL2 register map helpers
//!
//! Register layout reference:
//!
//! | Range | Meaning |
//! |---|---|
//! | `0x01` | Test / waveform select enable (bit 5) |
//! | `0x02..=0x04` | Timers |
//! | `0x08` | CSM / note select |
//! | `0x20..=0x35` | AM / vibrato / EG type / KSR / multiplier (per operator) |
//! | `0x40..=0x55` | Key scale level / total level (per operator) |
//! | `0x60..=0x75` | Attack / decay (per operator) |
//! | `0x80..=0x95` | Sustain / release (per operator) |
//! | `0xA0..=0xA8` | F-number low byte (per channel) |
//! | `0xB0..=0xB8` | Key on (bit 5), block (bits 2-4), F-number high (bits 0-1) |
//! | `0xBD` | AM depth, vibrato depth, rhythm mode and instruments |
//! | `0xC0..=0xC8` | Feedback / connection (per channel) |
//! | `0xE0..=0xF5` | Waveform select (per operator) |

/// Internal sample clock of the chip in Hz (14.31818 MHz / 288).
pub const OPL_SAMPLE_CLOCK: f64 = 49_716.0;

/// Register offset of the first (modulator) operator of each channel.
///
/// The carrier operator of a channel sits 3 slots higher.
pub const OPERATOR_OFFSETS: [u8; 9] = [0x00, 0x01, 0x02, 0x08, 0x09, 0x0A, 0x10, 0x11, 0x12];

/// Key-on bit in the `0xB0+ch` register.
pub const KEY_ON: u8 = 0x20;

/// Largest value of the 10-bit F-number field.
pub const FNUM_MAX: u16 = 0x3FF;

/// Largest value of the 3-bit block field.
pub const BLOCK_MAX: u8 = 7;

/// Check whether an address maps to a register implemented by an OPL2 chip.
pub fn is_implemented(addr: u8) -> bool {
    match addr {
        0x01..=0x04 | 0x08 | 0xBD => true,
        0x20..=0x35 | 0x40..=0x55 | 0x60..=0x75 | 0x80..=0x95 | 0xE0..=0xF5 => {
            operator_slot(addr).is_some()
        }
        0xA0..=0xA8 | 0xB0..=0xB8 | 0xC0..=0xC8 => true,
        _ => false,
    }
}

/// Resolve an operator register to `(channel, is_carrier)`.
///
/// Returns `None` for addresses that are not per-operator registers or that
/// fall into one of the unused slots (`0x06`, `0x07`, `0x0E`, `0x0F`).
pub fn operator_slot(addr: u8) -> Option<(usize, bool)> {
    let slot = match addr {
        0x20..=0x35 | 0x40..=0x55 | 0x60..=0x75 | 0x80..=0x95 | 0xE0..=0xF5 => addr & 0x1F,
        _ => return None,
    };
    // Slots are laid out in three groups of six: 0-5, 8-13, 16-21.
    let group = slot / 8;
    let index = slot % 8;
    if index > 5 {
        return None;
    }
    let channel = (group * 3 + index % 3) as usize;
    Some((channel, index >= 3))
}

/// Decoded contents of a channel's `0xA0`/`0xB0` register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrequencyRegisters {
    /// 10-bit F-number
    pub fnum: u16,
    /// 3-bit block (octave)
    pub block: u8,
    /// Key-on flag
    pub key_on: bool,
}

impl FrequencyRegisters {
    /// Decode from the low byte (`0xA0+ch`) and high byte (`0xB0+ch`).
    pub fn from_registers(low: u8, high: u8) -> Self {
        Self {
            fnum: u16::from(low) | (u16::from(high & 0x03) << 8),
            block: (high >> 2) & BLOCK_MAX,
            key_on: high & KEY_ON != 0,
        }
    }

    /// Frequency in Hz produced by this F-number/block pair.
    pub fn frequency_hz(&self) -> f64 {
        fnum_to_hz(self.fnum, self.block)
    }

    /// Low register byte (`0xA0+ch`).
    pub fn low_byte(&self) -> u8 {
        (self.fnum & 0xFF) as u8
    }

    /// High register byte with F-number and block replaced, keeping the
    /// upper bits (key-on and above) of `previous`.
    pub fn high_byte(&self, previous: u8) -> u8 {
        (previous & !0x1F) | ((self.block & BLOCK_MAX) << 2) | ((self.fnum >> 8) & 0x03) as u8
    }
}

/// Convert an F-number/block pair to Hz: `49716 * fnum * 2^(block - 20)`.
pub fn fnum_to_hz(fnum: u16, block: u8) -> f64 {
    OPL_SAMPLE_CLOCK * f64::from(fnum) * block_scale(block)
}

/// F-number (unrounded) that produces `hz` at the given block.
pub fn hz_to_fnum(hz: f64, block: u8) -> f64 {
    hz / (OPL_SAMPLE_CLOCK * block_scale(block))
}

fn block_scale(block: u8) -> f64 {
    2f64.powi(i32::from(block) - 20)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fnum_to_hz() {
        // 577 at block 4 is the classic A4 approximation
        assert_relative_eq!(fnum_to_hz(577, 4), 437.716, epsilon = 0.001);
        assert_relative_eq!(fnum_to_hz(577, 5), 2.0 * fnum_to_hz(577, 4));
    }

    #[test]
    fn test_hz_to_fnum_inverts() {
        let hz = fnum_to_hz(345, 3);
        assert_relative_eq!(hz_to_fnum(hz, 3), 345.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frequency_registers_decode() {
        let regs = FrequencyRegisters::from_registers(0x41, 0x32);
        assert_eq!(regs.fnum, 0x241);
        assert_eq!(regs.block, 4);
        assert!(regs.key_on);
        assert_eq!(regs.low_byte(), 0x41);
        assert_eq!(regs.high_byte(0x20), 0x32);
    }

    #[test]
    fn test_high_byte_keeps_key_on() {
        let regs = FrequencyRegisters {
            fnum: 0x3FF,
            block: 7,
            key_on: false,
        };
        assert_eq!(regs.high_byte(0x20), 0x3F);
        assert_eq!(regs.high_byte(0x00), 0x1F);
    }

    #[test]
    fn test_operator_slot_mapping() {
        assert_eq!(operator_slot(0x40), Some((0, false)));
        assert_eq!(operator_slot(0x43), Some((0, true)));
        assert_eq!(operator_slot(0x48), Some((3, false)));
        assert_eq!(operator_slot(0x55), Some((8, true)));
        assert_eq!(operator_slot(0x46), None);
        assert_eq!(operator_slot(0xA0), None);
        for (channel, &offset) in OPERATOR_OFFSETS.iter().enumerate() {
            assert_eq!(operator_slot(0x40 + offset), Some((channel, false)));
            assert_eq!(operator_slot(0x43 + offset), Some((channel, true)));
        }
    }

    #[test]
    fn test_is_implemented() {
        assert!(is_implemented(0x01));
        assert!(is_implemented(0xB8));
        assert!(is_implemented(0xBD));
        assert!(!is_implemented(0xB9));
        assert!(!is_implemented(0xA9));
        assert!(!is_implemented(0x00));
        assert!(!is_implemented(0x26));
        assert!(!is_implemented(0xFF));
    }
}

//! OPL2 rhythm mode: percussion instruments on voices 6-8.

use opl::RegisterSink;

use super::{check_value, AdlibDriver, Result};

/// Operator level registers addressed by bits 0-4 of the rhythm level
/// opcodes: hi-hat, cymbal, tom-tom, snare and bass drum carrier.
const LEVEL_REGISTERS: [u8; 5] = [0x51, 0x55, 0x52, 0x54, 0x53];

/// Percussion state shared by all channels.
#[derive(Debug, Clone, Default)]
pub(crate) struct RhythmSection {
    /// Rhythm bits of `0xBD`; 0 while rhythm mode is off.
    pub(super) bits: u8,
    /// Instrument levels captured when the section is set up.
    base: [u8; 5],
    adjust: [u8; 5],
    level: [u8; 5],
}

impl RhythmSection {
    /// Slots selected by a 5-bit mask.
    fn selected(mask: u8) -> impl Iterator<Item = usize> {
        (0..LEVEL_REGISTERS.len()).filter(move |&slot| mask & (1 << slot) != 0)
    }
}

impl AdlibDriver {
    /// Load the three percussion instruments, program their frequencies and
    /// switch the chip into rhythm mode.
    pub(super) fn setup_rhythm_section(
        &mut self,
        sink: &mut dyn RegisterSink,
        ch: usize,
        ptr: &mut usize,
        bass_drum: u8,
    ) -> Result<()> {
        let offset = self.instrument_offset(bass_drum)?;
        self.setup_instrument(sink, 6, offset, ch)?;
        self.rhythm.base[4] = self.channels[ch].op_level2;

        let id = self.data.next(ptr)?;
        let offset = self.instrument_offset(id)?;
        self.setup_instrument(sink, 7, offset, ch)?;
        self.rhythm.base[0] = self.channels[ch].op_level1;
        self.rhythm.base[3] = self.channels[ch].op_level2;

        let id = self.data.next(ptr)?;
        let offset = self.instrument_offset(id)?;
        self.setup_instrument(sink, 8, offset, ch)?;
        self.rhythm.base[2] = self.channels[ch].op_level1;
        self.rhythm.base[1] = self.channels[ch].op_level2;

        for voice in 6..9u8 {
            let reg_b = self.data.next(ptr)? & 0x2F;
            self.channels[usize::from(voice)].reg_b = reg_b;
            sink.write_register(0xB0 + voice, reg_b);
            let reg_a = self.data.next(ptr)?;
            sink.write_register(0xA0 + voice, reg_a);
        }

        self.rhythm.bits = 0x20;
        log::debug!("rhythm section enabled by channel {ch}");
        Ok(())
    }

    /// Retrigger the instruments in `mask`.
    pub(super) fn play_rhythm(&mut self, sink: &mut dyn RegisterSink, mask: u8) {
        sink.write_register(0xBD, (self.rhythm.bits & !(mask & 0x1F)) | 0x20);
        self.rhythm.bits |= mask;
        sink.write_register(0xBD, self.vibrato_am_bits | 0x20 | self.rhythm.bits);
    }

    pub(super) fn remove_rhythm_section(&mut self, sink: &mut dyn RegisterSink) {
        self.rhythm.bits = 0;
        sink.write_register(0xBD, self.vibrato_am_bits);
    }

    /// Set the level of the selected instruments.
    pub(super) fn set_rhythm_level(&mut self, sink: &mut dyn RegisterSink, mask: u8, value: u8) {
        for slot in RhythmSection::selected(mask) {
            let rhythm = &mut self.rhythm;
            rhythm.level[slot] = value;
            let level = i16::from(value)
                + i16::from(rhythm.base[slot])
                + i16::from(rhythm.adjust[slot])
                + i16::from(rhythm.level[slot]);
            sink.write_register(LEVEL_REGISTERS[slot], check_value(level));
        }
    }

    /// Fold `value` into the adjustment of the selected instruments and
    /// write the result.
    pub(super) fn adjust_rhythm_level(&mut self, sink: &mut dyn RegisterSink, mask: u8, value: u8) {
        for slot in RhythmSection::selected(mask) {
            let rhythm = &mut self.rhythm;
            let level = i16::from(value)
                + i16::from(rhythm.base[slot])
                + i16::from(rhythm.adjust[slot])
                + i16::from(rhythm.level[slot]);
            rhythm.adjust[slot] = check_value(level);
            sink.write_register(LEVEL_REGISTERS[slot], rhythm.adjust[slot]);
        }
    }

    /// Replace the adjustment of the selected instruments.
    pub(super) fn assign_rhythm_adjust(&mut self, sink: &mut dyn RegisterSink, mask: u8, value: u8) {
        for slot in RhythmSection::selected(mask) {
            let rhythm = &mut self.rhythm;
            rhythm.adjust[slot] = value;
            let level = i16::from(value) + i16::from(rhythm.base[slot]) + i16::from(rhythm.level[slot]);
            sink.write_register(LEVEL_REGISTERS[slot], check_value(level));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opl::RegisterLog;

    /// Three instruments followed by a program that sets up rhythm mode.
    fn rhythm_driver() -> AdlibDriver {
        let mut data = vec![0u8; 8];
        // Program 0 at 40, instrument table at 2
        data[0] = 40;
        data[2] = 60;
        data[4] = 71;
        data[6] = 82;
        data.resize(40, 0);
        data.extend_from_slice(&[
            0x00, 0x01, // channel 0, priority 1
            0xC1, 0x00, 0x01, 0x02, // rhythm instruments 0, 1, 2
            0x25, 0x81, 0x26, 0x82, 0x27, 0x83, // B/A for voices 6-8
            0x40, 0x20, // note
        ]);
        data.resize(60, 0);
        for level in [(0x10u8, 0x11u8), (0x12, 0x13), (0x14, 0x15)] {
            let mut instrument = [0u8; 11];
            instrument[5] = level.0;
            instrument[6] = level.1;
            data.extend_from_slice(&instrument);
        }
        let mut driver = AdlibDriver::new();
        driver.set_sound_data(data, 2);
        driver
    }

    #[test]
    fn test_setup_rhythm_section() {
        let mut driver = rhythm_driver();
        let mut log = RegisterLog::new();
        driver.start_song(0).unwrap();
        driver.tick(&mut log).unwrap();

        assert_eq!(driver.rhythm_bits(), 0x20);
        assert_eq!(driver.rhythm.base, [0x12, 0x15, 0x14, 0x13, 0x11]);
        assert_eq!(log.last_value(0xB6), Some(0x25));
        assert_eq!(log.last_value(0xA7), Some(0x82));
        assert_eq!(driver.channels()[8].reg_b, 0x27);
        assert!(log.writes().any(|w| w == (0xC6, 0x00)));
    }

    #[test]
    fn test_play_and_remove_rhythm() {
        let mut driver = AdlibDriver::new();
        let mut log = RegisterLog::new();
        driver.rhythm.bits = 0x20;
        driver.vibrato_am_bits = 0x80;
        driver.play_rhythm(&mut log, 0x11);
        let writes: Vec<_> = log.writes().collect();
        assert_eq!(writes, vec![(0xBD, 0x20), (0xBD, 0xB1)]);

        driver.remove_rhythm_section(&mut log);
        assert_eq!(driver.rhythm_bits(), 0);
        assert_eq!(log.last_value(0xBD), Some(0x80));
    }

    #[test]
    fn test_rhythm_levels() {
        let mut driver = AdlibDriver::new();
        let mut log = RegisterLog::new();
        driver.rhythm.base = [0x05; 5];

        driver.set_rhythm_level(&mut log, 0x01, 0x04);
        assert_eq!(log.last_value(0x51), Some(0x05 + 0x04 + 0x04));

        driver.assign_rhythm_adjust(&mut log, 0x10, 0x02);
        assert_eq!(log.last_value(0x53), Some(0x05 + 0x02));

        driver.adjust_rhythm_level(&mut log, 0x10, 0x40);
        assert_eq!(driver.rhythm.adjust[4], 0x3F);
        assert_eq!(log.last_value(0x53), Some(0x3F));
        assert!(log.last_value(0x55).is_none());
    }
}

//! Per-tick channel effects.
//!
//! Effects advance an 8-bit accumulator by their rate and only act when it
//! wraps, so a rate of 0x40 acts every fourth tick.

use opl::{RegisterSink, VOICE_COUNT};
use opl_common::CorruptProgram;

use super::channel::{PrimaryEffect, SecondaryEffect};
use super::{AdlibDriver, Result};

/// F-number above which an upward slide moves up one block.
const SLIDE_UPPER_FNUM: u16 = 734;

/// F-number below which a downward slide moves down one block.
const SLIDE_LOWER_FNUM: u16 = 388;

impl AdlibDriver {
    /// Run the primary, then the secondary effect of channel `ch`.
    pub(super) fn run_effects(&mut self, sink: &mut dyn RegisterSink, ch: usize) -> Result<()> {
        match self.channels[ch].primary {
            PrimaryEffect::None => {}
            PrimaryEffect::Slide => self.slide(sink, ch),
            PrimaryEffect::Vibrato => self.vibrato(sink, ch),
        }
        match self.channels[ch].secondary {
            SecondaryEffect::None => Ok(()),
            SecondaryEffect::TableSweep => self.table_sweep(sink, ch),
        }
    }

    fn write_frequency(sink: &mut dyn RegisterSink, ch: usize, reg_a: u8, reg_b: u8) {
        if ch < VOICE_COUNT {
            sink.write_register(0xA0 + ch as u8, reg_a);
            sink.write_register(0xB0 + ch as u8, reg_b);
        }
    }

    /// Frequency slide that carries into the block bits at the F-number
    /// limits.
    fn slide(&mut self, sink: &mut dyn RegisterSink, ch: usize) {
        let channel = &mut self.channels[ch];
        let (acc, wrapped) = channel.slide.acc.overflowing_add(channel.slide.rate);
        channel.slide.acc = acc;
        if !wrapped {
            return;
        }

        let mut block = (u16::from(channel.reg_b & 0x20) << 8) | u16::from(channel.reg_b & 0x1C);
        let delta = channel.slide.delta as i16;
        let mut fnum = channel.fnum().wrapping_add(delta as u16);

        if delta >= 0 {
            if fnum >= SLIDE_UPPER_FNUM {
                fnum >>= 1;
                if fnum & 0x3FF == 0 {
                    fnum += 1;
                }
                block = (block & 0xFF00) | (block.wrapping_add(4) & 0xFF);
                block &= 0xFF1C;
            }
        } else if fnum < SLIDE_LOWER_FNUM {
            fnum <<= 1;
            if fnum & 0x3FF == 0 {
                fnum = fnum.wrapping_sub(1);
            }
            block = (block & 0xFF00) | (block.wrapping_sub(4) & 0xFF);
            block &= 0xFF1C;
        }
        fnum &= 0x3FF;

        channel.reg_a = fnum as u8;
        channel.reg_b = (fnum >> 8) as u8 | (block >> 8) as u8 | (block & 0xFF) as u8;
        Self::write_frequency(sink, ch, channel.reg_a, channel.reg_b);
    }

    /// Vibrato: after the delay, add the step each time the accumulator wraps
    /// and flip its sign every `length` steps.
    fn vibrato(&mut self, sink: &mut dyn RegisterSink, ch: usize) {
        let channel = &mut self.channels[ch];
        let vibrato = &mut channel.vibrato;
        if vibrato.delay_counter != 0 {
            vibrato.delay_counter -= 1;
            return;
        }

        let (acc, wrapped) = vibrato.acc.overflowing_add(vibrato.rate);
        vibrato.acc = acc;
        if !wrapped {
            return;
        }

        vibrato.countdown = vibrato.countdown.wrapping_sub(1);
        if vibrato.countdown == 0 {
            vibrato.step = vibrato.step.wrapping_neg();
            vibrato.countdown = vibrato.length;
        }
        let step = vibrato.step;

        let freq = ((u16::from(channel.reg_b) << 8 | u16::from(channel.reg_a)) & 0x3FF).wrapping_add(step);
        channel.reg_a = freq as u8;
        channel.reg_b = (channel.reg_b & 0xFC) | (freq >> 8) as u8;
        Self::write_frequency(sink, ch, channel.reg_a, channel.reg_b);
    }

    /// Write successive bytes of a table into an operator register of the
    /// executing voice.
    fn table_sweep(&mut self, sink: &mut dyn RegisterSink, ch: usize) -> Result<()> {
        let sweep = &mut self.channels[ch].sweep;
        let (acc, wrapped) = sweep.acc.overflowing_add(sweep.rate);
        sweep.acc = acc;
        if !wrapped {
            return Ok(());
        }

        sweep.index = sweep.index.wrapping_sub(1);
        if sweep.index < 0 {
            sweep.index = sweep.length;
        }

        let offset = isize::from(sweep.index) + sweep.table_offset as isize;
        let register = sweep.register.wrapping_add(self.cur_reg_offset);
        let offset = usize::try_from(offset).map_err(|_| CorruptProgram::TableIndex {
            table: "sweep",
            index: offset,
        })?;
        let value = self.data.byte(offset)?;
        sink.write_register(register, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{AdlibDriver, PrimaryEffect, SecondaryEffect};
    use opl::RegisterLog;

    fn slide_driver(fnum: u16, block: u8, delta: i16) -> AdlibDriver {
        let mut driver = AdlibDriver::new();
        let channel = &mut driver.channels[0];
        channel.reg_a = fnum as u8;
        channel.reg_b = 0x20 | (block << 2) | (fnum >> 8) as u8;
        channel.slide.rate = 0xFF;
        channel.slide.acc = 0xFF;
        channel.slide.delta = delta as u16;
        channel.primary = PrimaryEffect::Slide;
        driver
    }

    #[test]
    fn test_slide_up_carries_into_block() {
        let mut driver = slide_driver(730, 3, 10);
        let mut log = RegisterLog::new();
        driver.run_effects(&mut log, 0).unwrap();
        let channel = &driver.channels()[0];
        assert_eq!(channel.fnum(), 370);
        assert_eq!((channel.reg_b >> 2) & 7, 4);
        assert_eq!(channel.reg_b & 0x20, 0x20);
        assert_eq!(log.last_value(0xB0), Some(channel.reg_b));
    }

    #[test]
    fn test_slide_down_borrows_from_block() {
        let mut driver = slide_driver(390, 3, -10);
        let mut log = RegisterLog::new();
        driver.run_effects(&mut log, 0).unwrap();
        let channel = &driver.channels()[0];
        assert_eq!(channel.fnum(), 760);
        assert_eq!((channel.reg_b >> 2) & 7, 2);
    }

    #[test]
    fn test_slide_waits_for_accumulator() {
        let mut driver = slide_driver(500, 3, 10);
        driver.channels[0].slide.rate = 0x80;
        driver.channels[0].slide.acc = 0;
        let mut log = RegisterLog::new();
        driver.run_effects(&mut log, 0).unwrap();
        assert!(log.is_empty());
        driver.run_effects(&mut log, 0).unwrap();
        assert_eq!(driver.channels()[0].fnum(), 510);
    }

    #[test]
    fn test_vibrato_oscillates() {
        let mut driver = AdlibDriver::new();
        let channel = &mut driver.channels[1];
        channel.reg_a = 0x00;
        channel.reg_b = 0x22;
        channel.vibrato.rate = 0xFF;
        channel.vibrato.acc = 0xFF;
        channel.vibrato.step = 4;
        channel.vibrato.countdown = 2;
        channel.vibrato.length = 2;
        channel.vibrato.delay_counter = 1;
        channel.primary = PrimaryEffect::Vibrato;

        let mut log = RegisterLog::new();
        driver.run_effects(&mut log, 1).unwrap();
        assert_eq!(driver.channels()[1].fnum(), 0x200);
        assert!(log.is_empty());

        driver.run_effects(&mut log, 1).unwrap();
        assert_eq!(driver.channels()[1].fnum(), 0x204);
        driver.run_effects(&mut log, 1).unwrap();
        assert_eq!(driver.channels()[1].fnum(), 0x200);
        driver.run_effects(&mut log, 1).unwrap();
        assert_eq!(driver.channels()[1].fnum(), 0x1FC);
        assert_eq!(log.last_value(0xA1), Some(0xFC));
        assert_eq!(driver.channels()[1].reg_b & 0x20, 0x20);
    }

    #[test]
    fn test_table_sweep_cycles() {
        let mut driver = AdlibDriver::new();
        driver.set_sound_data(vec![0x10, 0x11, 0x12], 0);
        driver.cur_reg_offset = 0x08;
        let channel = &mut driver.channels[3];
        channel.sweep.rate = 0xFF;
        channel.sweep.acc = 0xFF;
        channel.sweep.length = 2;
        channel.sweep.index = 2;
        channel.sweep.register = 0x40;
        channel.secondary = SecondaryEffect::TableSweep;

        let mut log = RegisterLog::new();
        for _ in 0..4 {
            driver.run_effects(&mut log, 3).unwrap();
        }
        let written: Vec<_> = log.writes().collect();
        assert_eq!(written, vec![(0x48, 0x11), (0x48, 0x10), (0x48, 0x12), (0x48, 0x11)]);
    }

    #[test]
    fn test_table_sweep_out_of_bounds() {
        let mut driver = AdlibDriver::new();
        driver.set_sound_data(vec![0x10], 0);
        let channel = &mut driver.channels[0];
        channel.sweep.rate = 0xFF;
        channel.sweep.acc = 0xFF;
        channel.sweep.length = 4;
        channel.sweep.index = 4;
        channel.secondary = SecondaryEffect::TableSweep;
        let mut log = RegisterLog::new();
        assert!(driver.run_effects(&mut log, 0).is_err());
    }
}

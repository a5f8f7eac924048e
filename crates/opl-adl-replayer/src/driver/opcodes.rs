//! Function opcodes.
//!
//! A byte with the top bit set selects entry `byte & 0x7F` of [`OPCODE_TABLE`];
//! indices past the end select the last entry. The following byte is the
//! parameter. Opcodes that take no parameter step the cursor back so the
//! parameter byte is read again as the next opcode.

use opl::{RegisterSink, OPERATOR_OFFSETS};
use opl_common::CorruptProgram;

use super::channel::{PrimaryEffect, SecondaryEffect};
use super::tables::WAVE_TABLES;
use super::{AdlibDriver, DriverFlags, Result, CONTROL_CHANNEL};

/// How the program scan continues after an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Read the next opcode.
    Continue,
    /// End the scan, then run effects.
    Stop,
    /// End the scan and skip effects this tick.
    Yield,
    /// Like [`Flow::Yield`], and the program is finished.
    Halt,
}

impl Flow {
    fn stop_if(cond: bool) -> Self {
        if cond {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

/// Function opcodes, by behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Load the repeat counter.
    SetRepeat,
    /// Count down the repeat counter and jump back while it is non-zero.
    CheckRepeat,
    /// Start another program.
    SetupProgram,
    /// Duration at which the note is released.
    SetNoteSpacing,
    /// Relative jump.
    Jump,
    /// Relative call.
    JumpToSubroutine,
    /// Return from a call.
    ReturnFromSubroutine,
    /// Octave offset added to notes.
    SetBaseOctave,
    /// End this program.
    StopChannel,
    /// Key off and wait.
    PlayRest,
    /// Raw register write.
    WriteRegister,
    /// Set up a note, then its duration.
    SetupNoteAndDuration,
    /// Semitone offset added to notes.
    SetBaseNote,
    /// Start the table sweep effect.
    SetupTableSweep,
    /// End another channel's program.
    StopOtherChannel,
    /// Wait until another program has finished.
    WaitForEndOfProgram,
    /// Load an instrument on this voice.
    SetupInstrument,
    /// Start the frequency slide effect.
    SetupSlide,
    /// End the frequency slide effect.
    RemoveSlide,
    /// F-number offset added to notes.
    SetBaseFreq,
    /// Start the vibrato effect.
    SetupVibrato,
    /// Set the channel priority.
    SetPriority,
    /// Configure the beat clock.
    SetBeatDivider,
    /// Wait until the beat clock matches a mask.
    WaitForBeat,
    /// Set the first level offset and refresh the volume.
    SetExtraLevel1,
    /// Set the duration without a new note.
    SetupDuration,
    /// Key on the current note.
    PlayNote,
    /// Release point as eighths of the duration.
    SetFractionalSpacing,
    /// Global tempo.
    SetTempo,
    /// End the table sweep effect.
    RemoveTableSweep,
    /// Channel tempo.
    SetChannelTempo,
    /// Set the third level offset.
    SetExtraLevel3,
    /// Set another channel's second level offset.
    SetExtraLevel2,
    /// Add to another channel's second level offset.
    ChangeExtraLevel2,
    /// Tremolo depth bit of `0xBD`.
    SetAmDepth,
    /// Vibrato depth bit of `0xBD`.
    SetVibratoDepth,
    /// Add to the first level offset and refresh the volume.
    ChangeExtraLevel1,
    /// Stop another channel and silence its voice.
    SilenceChannel,
    /// Write a randomly detuned frequency.
    RandomDetune,
    /// End the vibrato effect.
    RemoveVibrato,
    /// Set the warp and re-apply the current note.
    SetWarp,
    /// Copy the global tempo to the channel.
    ResetToGlobalTempo,
    /// Does nothing.
    Nop,
    /// Random jitter added to durations.
    SetDurationRandomness,
    /// Add a signed amount to the channel tempo.
    ChangeChannelTempo,
    /// Select a pair of wave tables.
    SelectWaveTables,
    /// Load the percussion instruments and enable rhythm mode.
    SetupRhythmSection,
    /// Trigger percussion instruments.
    PlayRhythm,
    /// Disable rhythm mode.
    RemoveRhythmSection,
    /// Set percussion levels.
    SetRhythmLevel,
    /// Accumulate into percussion level adjustments.
    AdjustRhythmLevel,
    /// Replace percussion level adjustments.
    AssignRhythmAdjust,
    /// Value exposed to the host.
    SetSoundTrigger,
    /// Follow the global tempo on every tick.
    SetTempoReset,
    /// Store two bytes in the channel.
    StoreBytes,
}

use Opcode::*;

/// Dispatch table indexed by `opcode & 0x7F`.
pub const OPCODE_TABLE: [Opcode; 75] = [
    // 0x00
    SetRepeat,
    CheckRepeat,
    SetupProgram,
    SetNoteSpacing,
    Jump,
    JumpToSubroutine,
    ReturnFromSubroutine,
    SetBaseOctave,
    // 0x08
    StopChannel,
    PlayRest,
    WriteRegister,
    SetupNoteAndDuration,
    SetBaseNote,
    SetupTableSweep,
    StopOtherChannel,
    WaitForEndOfProgram,
    // 0x10
    SetupInstrument,
    SetupSlide,
    RemoveSlide,
    SetBaseFreq,
    StopChannel,
    SetupVibrato,
    StopChannel,
    StopChannel,
    // 0x18
    StopChannel,
    StopChannel,
    SetPriority,
    StopChannel,
    SetBeatDivider,
    WaitForBeat,
    SetExtraLevel1,
    StopChannel,
    // 0x20
    SetupDuration,
    PlayNote,
    StopChannel,
    StopChannel,
    SetFractionalSpacing,
    StopChannel,
    SetTempo,
    RemoveTableSweep,
    // 0x28
    StopChannel,
    SetChannelTempo,
    StopChannel,
    SetExtraLevel3,
    SetExtraLevel2,
    ChangeExtraLevel2,
    SetAmDepth,
    SetVibratoDepth,
    // 0x30
    ChangeExtraLevel1,
    StopChannel,
    StopChannel,
    SilenceChannel,
    StopChannel,
    RandomDetune,
    RemoveVibrato,
    StopChannel,
    // 0x38
    StopChannel,
    SetWarp,
    ResetToGlobalTempo,
    Nop,
    SetDurationRandomness,
    ChangeChannelTempo,
    StopChannel,
    SelectWaveTables,
    // 0x40
    Nop,
    SetupRhythmSection,
    PlayRhythm,
    RemoveRhythmSection,
    SetRhythmLevel,
    AdjustRhythmLevel,
    AssignRhythmAdjust,
    SetSoundTrigger,
    // 0x48
    SetTempoReset,
    StoreBytes,
    StopChannel,
];

impl Opcode {
    /// Opcode for a 7-bit index, clamped to the last entry.
    pub fn from_index(index: u8) -> Self {
        OPCODE_TABLE[usize::from(index).min(OPCODE_TABLE.len() - 1)]
    }
}

impl AdlibDriver {
    /// Execute `op` for channel `ch`. `ptr` points just past the parameter.
    pub(super) fn dispatch(
        &mut self,
        sink: &mut dyn RegisterSink,
        ch: usize,
        op: Opcode,
        ptr: &mut usize,
        value: u8,
    ) -> Result<Flow> {
        match op {
            SetRepeat => self.channels[ch].repeat_counter = value,
            CheckRepeat => {
                *ptr += 1;
                let channel = &mut self.channels[ch];
                channel.repeat_counter = channel.repeat_counter.wrapping_sub(1);
                if channel.repeat_counter != 0 {
                    let by = self.data.le_u16(*ptr - 2)? as i16;
                    *ptr = self.data.displace(*ptr, by)?;
                }
            }
            SetupProgram => {
                if value != 0xFF && self.start_program(sink, u16::from(value))? {
                    self.flag_trigger = 1;
                    self.flags.insert(DriverFlags::BUSY);
                }
            }
            SetNoteSpacing => self.channels[ch].spacing1 = value,
            Jump => {
                *ptr -= 1;
                let by = self.data.le_u16(*ptr)? as i16;
                *ptr = self.data.displace(*ptr + 2, by)?;
            }
            JumpToSubroutine => {
                *ptr -= 1;
                let by = self.data.le_u16(*ptr)? as i16;
                *ptr += 2;
                self.channels[ch].push_return(*ptr, ch)?;
                *ptr = self.data.displace(*ptr, by)?;
            }
            ReturnFromSubroutine => {
                *ptr = self.channels[ch].pop_return(ch)?;
            }
            SetBaseOctave => self.channels[ch].base_octave = value as i8,
            StopChannel => {
                self.channels[ch].priority = 0;
                if ch != CONTROL_CHANNEL {
                    self.note_off(sink, ch);
                }
                return Ok(Flow::Halt);
            }
            PlayRest => {
                self.setup_duration(ch, value);
                self.note_off(sink, ch);
                return Ok(Flow::stop_if(value != 0));
            }
            WriteRegister => {
                let data = self.data.next(ptr)?;
                sink.write_register(value, data);
            }
            SetupNoteAndDuration => {
                self.setup_note(sink, ch, value, false)?;
                let duration = self.data.next(ptr)?;
                self.setup_duration(ch, duration);
                return Ok(Flow::stop_if(duration != 0));
            }
            SetBaseNote => self.channels[ch].base_note = value as i8,
            SetupTableSweep => {
                let length = self.data.next(ptr)? as i8;
                let register = self.data.next(ptr)?;
                let table_offset = self.data.le_u16(*ptr)?;
                *ptr += 2;

                let channel = &mut self.channels[ch];
                channel.sweep.acc = value;
                channel.sweep.rate = value;
                channel.sweep.length = length;
                channel.sweep.index = length;
                channel.sweep.register = register;
                channel.sweep.table_offset = table_offset;
                channel.secondary = SecondaryEffect::TableSweep;
            }
            StopOtherChannel => self.channel_mut(usize::from(value))?.halt(),
            WaitForEndOfProgram => {
                let target = usize::from(self.read_program_byte(u16::from(value), 0)?);
                let busy = self
                    .channels
                    .get(target)
                    .ok_or(CorruptProgram::BadChannel { index: target })?
                    .is_active();
                if busy {
                    *ptr -= 2;
                    return Ok(Flow::Yield);
                }
            }
            SetupInstrument => {
                let offset = self.instrument_offset(value)?;
                self.setup_instrument(sink, ch, offset, ch)?;
            }
            SetupSlide => {
                let delta = self.data.be_u16(*ptr)?;
                *ptr += 2;
                let channel = &mut self.channels[ch];
                channel.slide.rate = value;
                channel.slide.delta = delta;
                channel.slide.acc = 0xFF;
                channel.primary = PrimaryEffect::Slide;
            }
            RemoveSlide => {
                *ptr -= 1;
                let channel = &mut self.channels[ch];
                channel.primary = PrimaryEffect::None;
                channel.slide.delta = 0;
            }
            SetBaseFreq => self.channels[ch].base_freq = value,
            SetupVibrato => {
                let depth_shift = self.data.next(ptr)?;
                let length = self.data.next(ptr)?;
                let delay = self.data.next(ptr)?;

                let vibrato = &mut self.channels[ch].vibrato;
                vibrato.rate = value;
                vibrato.depth_shift = depth_shift;
                vibrato.countdown = length.wrapping_add(1);
                vibrato.length = length << 1;
                vibrato.delay = delay;
                self.channels[ch].primary = PrimaryEffect::Vibrato;
            }
            SetPriority => self.channels[ch].priority = value,
            SetBeatDivider => {
                let divider = value >> 1;
                self.beat.divider = divider;
                self.beat.countdown = divider;
                self.beat.counter = 0xFF;
                self.beat.beat = 0;
                self.beat.misses = 0;
            }
            WaitForBeat => {
                if self.beat.misses != 0 && self.beat.beat & value != 0 {
                    self.beat.misses = 0;
                    return Ok(Flow::Continue);
                }
                if self.beat.beat & value == 0 {
                    self.beat.misses = self.beat.misses.wrapping_add(1);
                }
                *ptr -= 2;
                self.channels[ch].duration = 1;
                return Ok(Flow::Yield);
            }
            SetExtraLevel1 => {
                self.channels[ch].extra_level1 = value;
                self.adjust_volume(sink, ch);
            }
            SetupDuration => {
                self.setup_duration(ch, value);
                return Ok(Flow::stop_if(value != 0));
            }
            PlayNote => {
                self.setup_duration(ch, value);
                self.note_on(sink, ch);
                return Ok(Flow::stop_if(value != 0));
            }
            SetFractionalSpacing => self.channels[ch].fractional_spacing = value & 7,
            SetTempo => self.tempo = value,
            RemoveTableSweep => {
                *ptr -= 1;
                self.channels[ch].secondary = SecondaryEffect::None;
            }
            SetChannelTempo => self.channels[ch].tempo = value,
            SetExtraLevel3 => self.channels[ch].extra_level3 = value,
            SetExtraLevel2 => {
                let target = usize::from(value);
                let level = self.data.next(ptr)?;
                self.channel_mut(target)?.extra_level2 = level;
                self.adjust_volume(sink, target);
            }
            ChangeExtraLevel2 => {
                let target = usize::from(value);
                let delta = self.data.next(ptr)?;
                let channel = self.channel_mut(target)?;
                channel.extra_level2 = channel.extra_level2.wrapping_add(delta);
                self.adjust_volume(sink, target);
            }
            SetAmDepth => {
                self.set_depth_bit(sink, 0x80, value);
            }
            SetVibratoDepth => {
                self.set_depth_bit(sink, 0x40, value);
            }
            ChangeExtraLevel1 => {
                let channel = &mut self.channels[ch];
                channel.extra_level1 = channel.extra_level1.wrapping_add(value);
                self.adjust_volume(sink, ch);
            }
            SilenceChannel => {
                let target = usize::from(value);
                let channel = self.channel_mut(target)?;
                channel.halt();
                channel.extra_level2 = 0;
                if target != CONTROL_CHANNEL {
                    let op = OPERATOR_OFFSETS[target];
                    sink.write_register(0xC0 + value, 0x00);
                    sink.write_register(0x43 + op, 0x3F);
                    sink.write_register(0x83 + op, 0xFF);
                    sink.write_register(0xB0 + value, 0x00);
                }
            }
            RandomDetune => {
                let low = self.data.next(ptr)?;
                let mask = u16::from_be_bytes([value, low]) & self.random();
                let channel = &self.channels[ch];
                let mut freq = (u16::from(channel.reg_b & 0x1F) << 8) | u16::from(channel.reg_a);
                freq = freq.wrapping_add(mask);
                freq |= u16::from(channel.reg_b & 0x20) << 8;
                if ch != CONTROL_CHANNEL {
                    let [hi, lo] = freq.to_be_bytes();
                    sink.write_register(0xA0 + ch as u8, lo);
                    sink.write_register(0xB0 + ch as u8, hi);
                }
            }
            RemoveVibrato => {
                *ptr -= 1;
                self.channels[ch].primary = PrimaryEffect::None;
            }
            SetWarp => {
                let channel = &mut self.channels[ch];
                channel.warp = value as i8;
                let raw = channel.raw_note;
                self.setup_note(sink, ch, raw, true)?;
            }
            ResetToGlobalTempo => {
                *ptr -= 1;
                self.channels[ch].tempo = self.tempo;
            }
            Nop => *ptr -= 1,
            SetDurationRandomness => self.channels[ch].duration_randomness = value,
            ChangeChannelTempo => {
                let channel = &mut self.channels[ch];
                let tempo = i16::from(channel.tempo) + i16::from(value as i8);
                channel.tempo = tempo.clamp(1, 0xFF) as u8;
            }
            SelectWaveTables => {
                let entry = usize::from(self.data.next(ptr)?);
                let (Some(_), Some(second)) = (WAVE_TABLES.get(entry), WAVE_TABLES.get(entry + 1)) else {
                    return Err(CorruptProgram::TableIndex {
                        table: "wave",
                        index: entry as isize,
                    });
                };
                self.wave_tables = Some((entry, entry + 1));
                if value == 2 {
                    sink.write_register(0xA0, second[0]);
                }
            }
            SetupRhythmSection => self.setup_rhythm_section(sink, ch, ptr, value)?,
            PlayRhythm => self.play_rhythm(sink, value),
            RemoveRhythmSection => {
                *ptr -= 1;
                self.remove_rhythm_section(sink);
            }
            SetRhythmLevel => {
                let level = self.data.next(ptr)?;
                self.set_rhythm_level(sink, value, level);
            }
            AdjustRhythmLevel => {
                let level = self.data.next(ptr)?;
                self.adjust_rhythm_level(sink, value, level);
            }
            AssignRhythmAdjust => {
                let level = self.data.next(ptr)?;
                self.assign_rhythm_adjust(sink, value, level);
            }
            SetSoundTrigger => self.sound_trigger = value,
            SetTempoReset => self.channels[ch].tempo_reset = value,
            StoreBytes => {
                let second = self.data.next(ptr)?;
                self.channels[ch].stored = [value, second];
            }
        }
        Ok(Flow::Continue)
    }

    /// Set or clear one depth bit of `0xBD`.
    ///
    /// Only the depth bits are written, so the write also clears any rhythm
    /// key bits on the chip until the rhythm section writes `0xBD` again.
    fn set_depth_bit(&mut self, sink: &mut dyn RegisterSink, bit: u8, value: u8) {
        if value & 1 != 0 {
            self.vibrato_am_bits |= bit;
        } else {
            self.vibrato_am_bits &= !bit;
        }
        sink.write_register(0xBD, self.vibrato_am_bits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opl::RegisterLog;

    #[test]
    fn test_table_layout() {
        assert_eq!(Opcode::from_index(0), SetRepeat);
        assert_eq!(Opcode::from_index(8), StopChannel);
        assert_eq!(Opcode::from_index(16), SetupInstrument);
        assert_eq!(Opcode::from_index(38), SetTempo);
        assert_eq!(Opcode::from_index(59), Nop);
        assert_eq!(Opcode::from_index(64), Nop);
        assert_eq!(Opcode::from_index(65), SetupRhythmSection);
        assert_eq!(Opcode::from_index(73), StoreBytes);
        assert_eq!(Opcode::from_index(74), StopChannel);
        assert_eq!(Opcode::from_index(0x7F), StopChannel);
    }

    #[test]
    fn test_stop_aliases() {
        let stops: Vec<usize> = OPCODE_TABLE
            .iter()
            .enumerate()
            .filter(|(_, op)| **op == StopChannel)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(
            stops,
            vec![8, 20, 22, 23, 24, 25, 27, 31, 34, 35, 37, 40, 42, 49, 50, 52, 55, 56, 62, 74]
        );
    }

    fn run(program: &[u8]) -> (AdlibDriver, RegisterLog) {
        let mut data = vec![0x02, 0x00];
        data.extend_from_slice(program);
        let mut driver = AdlibDriver::new();
        driver.set_sound_data(data, 0);
        let mut log = RegisterLog::new();
        driver.start_song(0).unwrap();
        driver.tick(&mut log).unwrap();
        (driver, log)
    }

    #[test]
    fn test_write_register_opcode() {
        let (_, log) = run(&[0x00, 0x01, 0x8A, 0xBD, 0x2A, 0x88, 0x00]);
        assert_eq!(log.last_value(0xBD), Some(0x2A));
    }

    #[test]
    fn test_jump_back_within_data() {
        // Jump over a stop to a long note
        let (driver, _) = run(&[0x00, 0x01, 0x84, 0x02, 0x00, 0x88, 0x00, 0x40, 0x20]);
        let channel = &driver.channels()[0];
        assert!(channel.is_active());
        assert_eq!(channel.duration, 0x20);
    }

    #[test]
    fn test_jump_outside_data_is_corrupt() {
        let mut data = vec![0x02, 0x00, 0x00, 0x01, 0x84, 0x00, 0x10];
        data.push(0x00);
        let mut driver = AdlibDriver::new();
        driver.set_sound_data(data, 0);
        let mut log = RegisterLog::new();
        driver.start_song(0).unwrap();
        assert!(matches!(
            driver.tick(&mut log),
            Err(CorruptProgram::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_subroutine_call_and_return() {
        // 4: call +4, 7: note, 9: stop, 11: set tempo, 13: return
        let (driver, _) = run(&[
            0x00, 0x01, 0x85, 0x04, 0x00, 0x40, 0x10, 0x88, 0x00, 0xA6, 0x55, 0x86, 0x00,
        ]);
        assert_eq!(driver.tempo(), 0x55);
        assert_eq!(driver.channels()[0].duration, 0x10);
        assert_eq!(driver.channels()[0].data_ptr, Some(9));
    }

    #[test]
    fn test_repeat_loop() {
        // Repeat a zero-length rest three times, then stop
        let (driver, _) = run(&[0x00, 0x01, 0x80, 0x03, 0x89, 0x00, 0x81, 0xFB, 0xFF, 0x88, 0x00]);
        assert_eq!(driver.channels()[0].repeat_counter, 0);
        assert!(!driver.channels()[0].is_active());
    }

    #[test]
    fn test_stop_channel_halts() {
        let (driver, log) = run(&[0x02, 0x07, 0x88, 0x00]);
        let channel = &driver.channels()[2];
        assert!(!channel.is_active());
        assert_eq!(channel.priority(), 0);
        assert_eq!(log.last_value(0xB2), Some(0x00));
    }

    #[test]
    fn test_change_channel_tempo_clamps() {
        let (driver, _) = run(&[0x00, 0x01, 0xA9, 0x02, 0xBD, 0xF0, 0x40, 0x10]);
        assert_eq!(driver.channels()[0].tempo, 1);
    }

    #[test]
    fn test_am_depth_bits() {
        let (driver, log) = run(&[0x00, 0x01, 0xAE, 0x01, 0xAF, 0x01, 0xAE, 0x00, 0x40, 0x10]);
        assert_eq!(driver.vibrato_am_bits, 0x40);
        assert_eq!(log.last_value(0xBD), Some(0x40));
    }

    #[test]
    fn test_am_depth_drops_rhythm_bits() {
        // Key the bass drum, then turn AM depth on
        let (driver, log) = run(&[0x00, 0x01, 0xC2, 0x01, 0xAE, 0x01, 0x40, 0x10]);
        let bd: Vec<u8> = log
            .writes()
            .filter(|&(addr, _)| addr == 0xBD)
            .map(|(_, value)| value)
            .collect();
        assert_eq!(bd, vec![0x20, 0x21, 0x80]);
        assert_eq!(driver.rhythm.bits, 0x01);
    }

    #[test]
    fn test_select_wave_tables() {
        let (driver, log) = run(&[0x00, 0x01, 0xBF, 0x02, 0x03, 0x40, 0x10]);
        assert_eq!(driver.wave_tables, Some((3, 4)));
        assert!(log.writes().any(|w| w == (0xA0, 0x40)));

        let mut data = vec![0x02, 0x00, 0x00, 0x01, 0xBF, 0x00, 0x05, 0x40, 0x10];
        data.push(0);
        let mut driver = AdlibDriver::new();
        driver.set_sound_data(data, 0);
        let mut log = RegisterLog::new();
        driver.start_song(0).unwrap();
        assert!(matches!(
            driver.tick(&mut log),
            Err(CorruptProgram::TableIndex { table: "wave", index: 5 })
        ));
    }

    #[test]
    fn test_store_bytes_and_trigger() {
        let (driver, _) = run(&[0x00, 0x01, 0xC9, 0x11, 0x22, 0xC7, 0x05, 0x40, 0x10]);
        assert_eq!(driver.channels()[0].stored, [0x11, 0x22]);
        assert_eq!(driver.sound_trigger(), 5);
    }
}

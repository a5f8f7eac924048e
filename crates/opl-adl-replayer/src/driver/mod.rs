//! ADL music program interpreter.
//!
//! # Overview
//!
//! The driver runs one bytecode program per logical channel. Channels 0-8 map
//! to the nine OPL2 voices; channel 9 is a control channel that never sounds
//! but starts, stops and synchronises the others.
//!
//! Each [`tick`](AdlibDriver::tick) (72 per second):
//!
//! 1. Counts down the busy flag trigger.
//! 2. Starts queued programs whose priority is at least the incumbent's.
//! 3. Runs channels 9 down to 0. A channel's `position` advances by its
//!    `tempo`; only on 8-bit wrap does its `duration` count down, and only at
//!    zero are new opcodes read.
//! 4. Runs the channel's effects unless the last opcode yielded.
//! 5. Advances the slow beat clock used by "wait for beat".
//!
//! # Programs
//!
//! A program starts with `[channel][priority]`. The stream that follows mixes
//! notes (top bit clear, next byte is the duration) with function opcodes
//! (top bit set, low 7 bits index [`opcodes`], next byte is the parameter).
//! Opcodes without a parameter step the cursor back by one.
//!
//! Every read goes through a bounds-checked buffer: data that points outside
//! the sound data ends the song with [`CorruptProgram`] instead of panicking.

use std::ops::RangeInclusive;

use bitflags::bitflags;
use opl::{RegisterSink, OPERATOR_OFFSETS, VOICE_COUNT};
use opl_common::CorruptProgram;

pub mod channel;
mod effects;
pub mod opcodes;
mod rhythm;
mod sound_data;
pub(crate) mod tables;

pub use channel::{Channel, PrimaryEffect, SecondaryEffect};
pub use opcodes::Opcode;

use opcodes::Flow;
use rhythm::RhythmSection;
use sound_data::SoundData;
use tables::{warp_offset, NOTE_FNUM};

type Result<T> = std::result::Result<T, CorruptProgram>;

/// Driver tick rate in Hz.
pub const CALLBACKS_PER_SECOND: f32 = 72.0;

/// Logical channels: nine voices plus the control channel.
pub const CHANNEL_COUNT: usize = 10;

/// Index of the control channel.
pub const CONTROL_CHANNEL: usize = 9;

/// Pending start requests held between ticks.
const SOUND_QUEUE_LEN: usize = 16;

/// Opcodes one channel may execute in a single tick before it is suspended
/// until the next tick.
pub const MAX_STEPS_PER_TICK: usize = 1024;

bitflags! {
    /// Driver state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriverFlags: u8 {
        /// Ignore start requests for voice programs (id != 0)
        const BLOCK_SFX = 0x01;
        /// Ignore start requests for control channel programs (id != 0)
        const BLOCK_MUSIC = 0x02;
        /// Driver initialised
        const INITIALIZED = 0x04;
        /// A program was started recently
        const BUSY = 0x08;
    }
}

/// Slow clock counting beats for the "wait for beat" opcode.
#[derive(Debug, Clone, Copy)]
struct BeatClock {
    divider: u8,
    countdown: u8,
    counter: u8,
    beat: u8,
    misses: u8,
}

impl Default for BeatClock {
    fn default() -> Self {
        Self {
            divider: 0,
            countdown: 0,
            counter: 0xFF,
            beat: 0,
            misses: 0,
        }
    }
}

impl BeatClock {
    fn advance(&mut self, tempo: u8) {
        let (counter, wrapped) = self.counter.overflowing_add(tempo);
        self.counter = counter;
        if wrapped {
            self.countdown = self.countdown.wrapping_sub(1);
            if self.countdown == 0 {
                self.countdown = self.divider;
                self.beat = self.beat.wrapping_add(1);
            }
        }
    }
}

/// The ADL music program interpreter
pub struct AdlibDriver {
    data: SoundData,
    instrument_base: usize,
    channels: [Channel; CHANNEL_COUNT],
    sound_queue: [u16; SOUND_QUEUE_LEN],
    queue_head: usize,
    queue_tail: usize,
    flag_trigger: i8,
    flags: DriverFlags,
    rnd: u16,
    beat: BeatClock,
    rhythm: RhythmSection,
    vibrato_am_bits: u8,
    cur_reg_offset: u8,
    tempo: u8,
    sound_trigger: u8,
    wave_tables: Option<(usize, usize)>,
}

impl Default for AdlibDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AdlibDriver {
    /// Create a driver with no sound data and all channels idle.
    pub fn new() -> Self {
        Self {
            data: SoundData::default(),
            instrument_base: 0,
            channels: std::array::from_fn(|_| Channel::new()),
            sound_queue: [0; SOUND_QUEUE_LEN],
            queue_head: 0,
            queue_tail: 0,
            flag_trigger: 0,
            flags: DriverFlags::empty(),
            rnd: 0x1234,
            beat: BeatClock::default(),
            rhythm: RhythmSection::default(),
            vibrato_am_bits: 0,
            cur_reg_offset: 0,
            tempo: 0,
            sound_trigger: 0,
            wave_tables: None,
        }
    }

    /// Install sound data. Instruments are looked up through the `u16` table
    /// at `instrument_base`.
    pub fn set_sound_data(&mut self, data: Vec<u8>, instrument_base: usize) {
        self.data = SoundData::new(data);
        self.instrument_base = instrument_base;
    }

    /// Length of the installed sound data.
    pub fn sound_data_len(&self) -> usize {
        self.data.len()
    }

    /// Reset the driver and put the chip into a known state.
    pub fn init(&mut self, sink: &mut dyn RegisterSink) {
        self.queue_head = 0;
        self.queue_tail = 0;
        self.rnd = 0x1234;

        // Waveform select enable, FM mode, rhythm off
        sink.write_register(0x01, 0x20);
        sink.write_register(0x08, 0x00);
        sink.write_register(0xBD, 0x00);

        for ch in (0..CHANNEL_COUNT).rev() {
            if ch != CONTROL_CHANNEL {
                let offset = OPERATOR_OFFSETS[ch];
                sink.write_register(0x40 + offset, 0x3F);
                sink.write_register(0x43 + offset, 0x3F);
            }
            self.channels[ch].reinit();
        }
        self.flags.insert(DriverFlags::INITIALIZED);
    }

    /// Queue program `id` to be started on the next tick.
    ///
    /// Requests for ids other than 0 are dropped while the matching block
    /// flag is set.
    pub fn start_song(&mut self, id: u16) -> Result<()> {
        self.flags.insert(DriverFlags::BUSY);
        self.flag_trigger = 1;

        let chan = usize::from(self.read_program_byte(id, 0)?);
        if id != 0 {
            let block = if chan == CONTROL_CHANNEL {
                DriverFlags::BLOCK_MUSIC
            } else {
                DriverFlags::BLOCK_SFX
            };
            if self.flags.contains(block) {
                log::trace!("start of program {id} blocked by {block:?}");
                return Ok(());
            }
        }

        self.sound_queue[self.queue_tail] = id;
        self.queue_tail = (self.queue_tail + 1) % SOUND_QUEUE_LEN;
        Ok(())
    }

    /// Stop the programs on `channels` and key their voices off.
    pub fn stop_channels(&mut self, channels: RangeInclusive<usize>, sink: &mut dyn RegisterSink) {
        let (start, end) = channels.into_inner();
        for ch in start..=end.min(CONTROL_CHANNEL) {
            let channel = &mut self.channels[ch];
            channel.priority = 0;
            channel.data_ptr = None;
            if ch != CONTROL_CHANNEL {
                self.note_off(sink, ch);
            }
        }
    }

    /// Byte `offset` of program `id`.
    pub fn read_program_byte(&self, id: u16, offset: usize) -> Result<u8> {
        let start = self.data.program_offset(usize::from(id))?;
        self.data.byte(start + offset)
    }

    /// Overwrite byte `offset` of program `id`, returning the old value.
    pub fn write_program_byte(&mut self, id: u16, offset: usize, value: u8) -> Result<u8> {
        let start = self.data.program_offset(usize::from(id))?;
        self.data.set_byte(start + offset, value)
    }

    /// Set flags, returning the previous set.
    pub fn set_flags(&mut self, flags: DriverFlags) -> DriverFlags {
        let old = self.flags;
        self.flags.insert(flags);
        old
    }

    /// Clear flags, returning the previous set.
    pub fn clear_flags(&mut self, flags: DriverFlags) -> DriverFlags {
        let old = self.flags;
        self.flags.remove(flags);
        old
    }

    /// Current flags.
    pub fn flags(&self) -> DriverFlags {
        self.flags
    }

    /// All channels, control channel last.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Whether no channel is running a program.
    pub fn is_idle(&self) -> bool {
        self.channels.iter().all(|c| !c.is_active())
    }

    /// Global tempo.
    pub fn tempo(&self) -> u8 {
        self.tempo
    }

    /// Beats counted by the beat clock since it was last configured.
    pub fn beat(&self) -> u8 {
        self.beat.beat
    }

    /// Value last set by the sound trigger opcode.
    pub fn sound_trigger(&self) -> u8 {
        self.sound_trigger
    }

    /// Rhythm section bits as last written to `0xBD` (0 when disabled).
    pub fn rhythm_bits(&self) -> u8 {
        self.rhythm.bits
    }

    /// Run one driver tick.
    pub fn tick(&mut self, sink: &mut dyn RegisterSink) -> Result<()> {
        self.flag_trigger = self.flag_trigger.wrapping_sub(1);
        if self.flag_trigger < 0 {
            self.flags.remove(DriverFlags::BUSY);
        }

        self.setup_programs(sink)?;
        self.execute_programs(sink)?;
        self.beat.advance(self.tempo);
        Ok(())
    }

    fn setup_programs(&mut self, sink: &mut dyn RegisterSink) -> Result<()> {
        while self.queue_head != self.queue_tail {
            let id = self.sound_queue[self.queue_head];
            self.queue_head = (self.queue_head + 1) % SOUND_QUEUE_LEN;
            self.start_program(sink, id)?;
        }
        Ok(())
    }

    /// Start program `id` on the channel named in its header if its priority
    /// is at least the incumbent's. Returns whether it started.
    pub(crate) fn start_program(&mut self, sink: &mut dyn RegisterSink, id: u16) -> Result<bool> {
        let mut ptr = self.data.program_offset(usize::from(id))?;
        let chan = usize::from(self.data.next(&mut ptr)?);
        let priority = self.data.next(&mut ptr)?;

        let channel = self
            .channels
            .get_mut(chan)
            .ok_or(CorruptProgram::BadChannel { index: chan })?;
        if priority < channel.priority {
            log::trace!(
                "program {id} (priority {priority}) ignored on channel {chan} (priority {})",
                channel.priority
            );
            return Ok(false);
        }

        channel.reinit();
        channel.priority = priority;
        channel.data_ptr = Some(ptr);
        channel.tempo = 0xFF;
        channel.position = 0xFF;
        channel.duration = 1;
        self.clear_voice(sink, chan);
        Ok(true)
    }

    /// Silence a voice before a new program takes it over.
    fn clear_voice(&mut self, sink: &mut dyn RegisterSink, chan: usize) {
        if chan >= VOICE_COUNT || (self.rhythm.bits != 0 && chan >= 6) {
            return;
        }
        let offset = OPERATOR_OFFSETS[chan];
        let chan = chan as u8;

        sink.write_register(0x60 + offset, 0xFF);
        sink.write_register(0x63 + offset, 0xFF);
        sink.write_register(0x80 + offset, 0xFF);
        sink.write_register(0x83 + offset, 0xFF);
        sink.write_register(0xB0 + chan, 0x00);
        // Re-key with block and high F-number bits cleared
        sink.write_register(0xB0 + chan, 0x20);
    }

    fn execute_programs(&mut self, sink: &mut dyn RegisterSink) -> Result<()> {
        for ch in (0..CHANNEL_COUNT).rev() {
            let Some(start) = self.channels[ch].data_ptr else {
                continue;
            };
            if ch < VOICE_COUNT {
                self.cur_reg_offset = OPERATOR_OFFSETS[ch];
            }

            let global_tempo = self.tempo;
            let channel = &mut self.channels[ch];
            if channel.tempo_reset != 0 {
                channel.tempo = global_tempo;
            }
            let (position, wrapped) = channel.position.overflowing_add(channel.tempo);
            channel.position = position;

            let mut flow = Flow::Stop;
            if wrapped {
                channel.duration = channel.duration.wrapping_sub(1);
                if channel.duration != 0 {
                    let (duration, spacing1, spacing2) =
                        (channel.duration, channel.spacing1, channel.spacing2);
                    if duration == spacing2 {
                        self.note_off(sink, ch);
                    }
                    if duration == spacing1 && ch != CONTROL_CHANNEL {
                        self.note_off(sink, ch);
                    }
                } else {
                    flow = self.run_program(sink, ch, start)?;
                }
            }

            if flow == Flow::Stop {
                self.run_effects(sink, ch)?;
            }
        }
        Ok(())
    }

    /// Interpret opcodes from `start` until one ends the scan.
    fn run_program(&mut self, sink: &mut dyn RegisterSink, ch: usize, start: usize) -> Result<Flow> {
        let mut ptr = start;
        let mut flow = Flow::Stop;

        for _ in 0..MAX_STEPS_PER_TICK {
            let opcode = self.data.next(&mut ptr)?;
            let param = self.data.next(&mut ptr)?;

            if opcode & 0x80 != 0 {
                let op = Opcode::from_index(opcode & 0x7F);
                flow = self.dispatch(sink, ch, op, &mut ptr, param)?;
                self.channels[ch].data_ptr = if flow == Flow::Halt { None } else { Some(ptr) };
                if flow != Flow::Continue {
                    return Ok(flow);
                }
            } else {
                self.setup_note(sink, ch, opcode, false)?;
                self.note_on(sink, ch);
                self.setup_duration(ch, param);
                if param != 0 {
                    self.channels[ch].data_ptr = Some(ptr);
                    return Ok(flow);
                }
            }
        }

        log::warn!(
            "channel {ch} ran {MAX_STEPS_PER_TICK} opcodes without yielding, suspending until next tick"
        );
        let channel = &mut self.channels[ch];
        channel.data_ptr = Some(ptr);
        channel.duration = 1;
        Ok(Flow::Yield)
    }

    fn random(&mut self) -> u16 {
        self.rnd = self.rnd.wrapping_add(0x9248).rotate_right(3);
        self.rnd
    }

    fn setup_duration(&mut self, ch: usize, duration: u8) {
        let randomness = self.channels[ch].duration_randomness;
        if randomness != 0 {
            let jitter = (self.random() & u16::from(randomness)) as u8;
            self.channels[ch].duration = duration.wrapping_add(jitter);
            return;
        }
        let channel = &mut self.channels[ch];
        if channel.fractional_spacing != 0 {
            channel.spacing2 = (duration >> 3).wrapping_mul(channel.fractional_spacing);
        }
        channel.duration = duration;
    }

    /// Key the voice on and prime the vibrato from the new frequency.
    fn note_on(&mut self, sink: &mut dyn RegisterSink, ch: usize) {
        let channel = &mut self.channels[ch];
        channel.reg_b |= 0x20;
        if ch < VOICE_COUNT {
            sink.write_register(0xB0 + ch as u8, channel.reg_b);
        }

        let shift = 9i8.wrapping_sub(channel.vibrato.depth_shift as i8);
        let fnum = u32::from(channel.fnum());
        channel.vibrato.step = (fnum.wrapping_shr(shift as i32 as u32) & 0xFF) as u16;
        channel.vibrato.delay_counter = channel.vibrato.delay;
    }

    fn note_off(&mut self, sink: &mut dyn RegisterSink, ch: usize) {
        if ch >= VOICE_COUNT || (self.rhythm.bits != 0 && ch >= 6) {
            return;
        }
        let channel = &mut self.channels[ch];
        channel.reg_b &= 0xDF;
        sink.write_register(0xB0 + ch as u8, channel.reg_b);
    }

    /// Compute and write the frequency of `raw` on channel `ch`.
    ///
    /// `forced` applies the warp table even when the warp is zero.
    fn setup_note(&mut self, sink: &mut dyn RegisterSink, ch: usize, raw: u8, forced: bool) -> Result<()> {
        let channel = &mut self.channels[ch];
        channel.raw_note = raw;

        let semitone = usize::from(raw & 0x0F);
        let note = semitone as i32 + i32::from(channel.base_note);
        let mut octave = ((i32::from(raw) + i32::from(channel.base_octave)) >> 4) & 0x0F;
        octave += note.div_euclid(12);
        let note = note.rem_euclid(12) as usize;

        let mut freq = NOTE_FNUM[note].wrapping_add(u16::from(channel.base_freq));

        if channel.warp != 0 || forced {
            let warp = channel.warp;
            let (table, index) = if warp >= 0 {
                (semitone + 2, warp as usize)
            } else {
                (semitone, usize::from(warp.unsigned_abs()))
            };
            let offset = warp_offset(table, index).ok_or(CorruptProgram::TableIndex {
                table: "warp",
                index: (table * 32 + index) as isize,
            })?;
            freq = if warp >= 0 {
                freq.wrapping_add(u16::from(offset))
            } else {
                freq.wrapping_sub(u16::from(offset))
            };
        }

        channel.reg_a = (freq & 0xFF) as u8;
        channel.reg_b = ((i32::from(channel.reg_b & 0x20) | (octave << 2) | i32::from((freq >> 8) & 0x03))
            & 0xFF) as u8;

        if ch < VOICE_COUNT {
            sink.write_register(0xA0 + ch as u8, channel.reg_a);
            sink.write_register(0xB0 + ch as u8, channel.reg_b);
        }
        Ok(())
    }

    fn instrument_offset(&self, id: u8) -> Result<usize> {
        let entry = self.instrument_base + 2 * usize::from(id);
        Ok(usize::from(self.data.le_u16(entry)?))
    }

    /// Load the 11-byte instrument at `offset` onto `voice`, storing its
    /// levels in channel `target`.
    fn setup_instrument(
        &mut self,
        sink: &mut dyn RegisterSink,
        voice: usize,
        offset: usize,
        target: usize,
    ) -> Result<()> {
        let mut bytes = [0u8; 11];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.data.byte(offset + i)?;
        }
        let [am_mod, am_car, feedback, wave_mod, wave_car, level1, level2, ad_mod, ad_car, sr_mod, sr_car] =
            bytes;

        let channel = &mut self.channels[target];
        channel.two_op = feedback & 0x01 != 0;
        channel.op_level1 = level1;
        channel.op_level2 = level2;

        if voice >= VOICE_COUNT {
            return Ok(());
        }
        let op = OPERATOR_OFFSETS[voice];
        sink.write_register(0x20 + op, am_mod);
        sink.write_register(0x23 + op, am_car);
        sink.write_register(0xC0 + voice as u8, feedback);
        sink.write_register(0xE0 + op, wave_mod);
        sink.write_register(0xE3 + op, wave_car);
        sink.write_register(0x40 + op, op_level1(channel));
        sink.write_register(0x43 + op, op_level2(channel));
        sink.write_register(0x60 + op, ad_mod);
        sink.write_register(0x63 + op, ad_car);
        sink.write_register(0x80 + op, sr_mod);
        sink.write_register(0x83 + op, sr_car);
        Ok(())
    }

    /// Rewrite the output levels of channel `ch` after an extra level change.
    fn adjust_volume(&mut self, sink: &mut dyn RegisterSink, ch: usize) {
        if ch >= VOICE_COUNT {
            return;
        }
        let channel = &self.channels[ch];
        let op = OPERATOR_OFFSETS[ch];
        sink.write_register(0x43 + op, op_level2(channel));
        if channel.two_op {
            sink.write_register(0x40 + op, op_level1(channel));
        }
    }

    fn channel_mut(&mut self, index: usize) -> Result<&mut Channel> {
        self.channels
            .get_mut(index)
            .ok_or(CorruptProgram::BadChannel { index })
    }
}

/// Clamp an attenuation to the 6-bit total level range.
pub(crate) fn check_value(value: i16) -> u8 {
    value.clamp(0, 0x3F) as u8
}

fn summed_level(base: u8, channel: &Channel) -> i8 {
    ((base & 0x3F) as i8)
        .wrapping_add(channel.extra_level1 as i8)
        .wrapping_add(channel.extra_level2 as i8)
        .wrapping_add(channel.extra_level3 as i8)
}

/// Modulator level; extra levels only apply in additive mode.
fn op_level1(channel: &Channel) -> u8 {
    let value = if channel.two_op {
        summed_level(channel.op_level1, channel)
    } else {
        (channel.op_level1 & 0x3F) as i8
    };
    check_value(i16::from(value)) | (channel.op_level1 & 0xC0)
}

/// Carrier level with all extra levels applied.
fn op_level2(channel: &Channel) -> u8 {
    let value = summed_level(channel.op_level2, channel);
    check_value(i16::from(value)) | (channel.op_level2 & 0xC0)
}

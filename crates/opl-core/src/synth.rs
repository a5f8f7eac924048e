//! Preview synthesizer sink
//!
//! A small two-operator FM renderer that reads the OPL2 register file and
//! produces something recognisable. It is intentionally not an accurate chip
//! model: envelopes are a fixed attack/release ramp, feedback and the rhythm
//! section are ignored, and every waveform is a sine.

use std::f32::consts::TAU;

use crate::backend::RegisterSink;
use crate::registers::{self, FrequencyRegisters, KEY_ON};
use crate::VOICE_COUNT;

/// Frequency multiplier table for the `MULT` field of `0x20..=0x35`.
const MULTIPLIERS: [f32; 16] = [
    0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 10.0, 12.0, 12.0, 15.0, 15.0,
];

/// Per-sample envelope increment while a key is held.
const ATTACK_STEP: f32 = 0.01;
/// Per-sample envelope decay factor after key-off.
const RELEASE_COEF: f32 = 0.9995;
/// Phase modulation depth applied by the modulator in FM mode.
const MOD_INDEX: f32 = 2.0;
/// Output gain applied to the voice sum before conversion.
const MIX_GAIN: f32 = 0.3;

#[derive(Clone, Copy, Default)]
struct SynthVoice {
    phase_inc: f32,
    mod_phase: f32,
    car_phase: f32,
    mod_mult: f32,
    car_mult: f32,
    mod_amp: f32,
    car_amp: f32,
    additive: bool,
    key_on: bool,
    env: f32,
}

impl SynthVoice {
    fn advance(&mut self) -> f32 {
        if self.key_on {
            self.env = (self.env + ATTACK_STEP).min(1.0);
        } else {
            self.env *= RELEASE_COEF;
            if self.env < 1e-4 {
                self.env = 0.0;
                return 0.0;
            }
        }

        self.mod_phase = (self.mod_phase + self.phase_inc * self.mod_mult).fract();
        self.car_phase = (self.car_phase + self.phase_inc * self.car_mult).fract();

        let modulator = (TAU * self.mod_phase).sin() * self.mod_amp;
        let out = if self.additive {
            ((TAU * self.car_phase).sin() * self.car_amp + modulator) * 0.5
        } else {
            (TAU * self.car_phase + modulator * MOD_INDEX).sin() * self.car_amp
        };
        out * self.env
    }
}

/// Non-accurate OPL2 preview synthesizer (mono)
///
/// Keeps a shadow copy of the register file and derives a simple voice model
/// from it on every relevant write.
pub struct OplSynth {
    sample_rate: u32,
    registers: [u8; 256],
    voices: [SynthVoice; VOICE_COUNT],
}

impl OplSynth {
    /// Create a synthesizer rendering at `sample_rate` Hz.
    pub fn new(sample_rate: u32) -> Self {
        let mut synth = Self {
            sample_rate: sample_rate.max(1),
            registers: [0; 256],
            voices: [SynthVoice::default(); VOICE_COUNT],
        };
        for channel in 0..VOICE_COUNT {
            synth.refresh_voice(channel);
        }
        synth
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current value of a register as last written.
    pub fn register(&self, addr: u8) -> u8 {
        self.registers[addr as usize]
    }

    /// Whether the key-on bit of `channel` is set.
    pub fn is_key_on(&self, channel: usize) -> bool {
        self.voices.get(channel).is_some_and(|v| v.key_on)
    }

    fn refresh_voice(&mut self, channel: usize) {
        let op = registers::OPERATOR_OFFSETS[channel] as usize;
        let regs = &self.registers;
        let freq = FrequencyRegisters::from_registers(regs[0xA0 + channel], regs[0xB0 + channel]);
        let sample_rate = self.sample_rate as f32;
        let voice = &mut self.voices[channel];

        voice.phase_inc = freq.frequency_hz() as f32 / sample_rate;
        voice.key_on = freq.key_on;
        voice.mod_mult = MULTIPLIERS[(regs[0x20 + op] & 0x0F) as usize];
        voice.car_mult = MULTIPLIERS[(regs[0x23 + op] & 0x0F) as usize];
        voice.mod_amp = level_to_amplitude(regs[0x40 + op]);
        voice.car_amp = level_to_amplitude(regs[0x43 + op]);
        voice.additive = regs[0xC0 + channel] & 0x01 != 0;
    }
}

impl Default for OplSynth {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SAMPLE_RATE)
    }
}

/// Total level is an attenuation in 0.75 dB steps.
fn level_to_amplitude(value: u8) -> f32 {
    let attenuation_db = f32::from(value & 0x3F) * 0.75;
    10f32.powf(-attenuation_db / 20.0)
}

impl RegisterSink for OplSynth {
    fn write_register(&mut self, addr: u8, value: u8) {
        if !registers::is_implemented(addr) {
            log::debug!("write to unimplemented OPL2 register {addr:#04x} <- {value:#04x}");
        }
        self.registers[addr as usize] = value;

        let channel = match addr {
            0xA0..=0xA8 | 0xB0..=0xB8 | 0xC0..=0xC8 => Some((addr & 0x0F) as usize),
            _ => registers::operator_slot(addr).map(|(channel, _)| channel),
        };
        if let Some(channel) = channel {
            let was_on = self.voices[channel].key_on;
            self.refresh_voice(channel);
            if !was_on && value & KEY_ON != 0 && addr >= 0xB0 {
                // Restart the oscillators on a fresh key-on
                self.voices[channel].mod_phase = 0.0;
                self.voices[channel].car_phase = 0.0;
            }
        }
    }

    fn render(&mut self, buffer: &mut [i16]) {
        for sample in buffer.iter_mut() {
            let mix: f32 = self.voices.iter_mut().map(SynthVoice::advance).sum();
            let scaled = (mix * MIX_GAIN).clamp(-1.0, 1.0);
            *sample = (scaled * f32::from(i16::MAX)) as i16;
        }
    }

    fn is_stereo(&self) -> bool {
        false
    }

    fn reset(&mut self) {
        *self = Self::new(self.sample_rate);
    }
}

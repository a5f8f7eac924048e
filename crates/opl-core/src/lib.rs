//! OPL2 register sink abstraction
//!
//! Building blocks shared by every OPL replayer in the workspace: the
//! [`RegisterSink`] capability a chip emulation exposes, helpers for the
//! OPL2 register map, and the sinks shipped with the crate.
//!
//! # Sinks
//! - [`OplSynth`]: lightweight preview synthesizer (non-accurate, mono)
//! - [`RegisterLog`]: records every register write, renders silence
//! - [`SurroundOpl`]: wraps two sinks and feeds the second one a transposed
//!   copy of the register stream for a harmonic stereo image
//!
//! # Quick start
//! ```
//! use opl::{OplSynth, RegisterSink};
//!
//! let mut chip = OplSynth::new(44_100);
//! chip.write_register(0x43, 0x00); // Channel 0 carrier: full level
//! chip.write_register(0xA0, 0x41); // F-number low
//! chip.write_register(0xB0, 0x32); // Key on, block 4
//!
//! let mut pcm = [0i16; 512];
//! chip.render(&mut pcm);
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod register_log;
pub mod registers;
pub mod surround;
pub mod synth;

/// Error types for the OPL core crate
#[derive(thiserror::Error, Debug)]
pub enum OplError {
    /// IO error while writing a register dump
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, OplError>;

// Public API exports
pub use backend::RegisterSink;
pub use register_log::{RegisterLog, RegisterLogEntry};
pub use registers::{FrequencyRegisters, OPL_SAMPLE_CLOCK, OPERATOR_OFFSETS};
pub use surround::{SurroundConfig, SurroundOpl};
pub use synth::OplSynth;

/// Standard audio sample rate (44.1 kHz CD quality).
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Number of melodic voices on an OPL2 chip.
pub const VOICE_COUNT: usize = 9;

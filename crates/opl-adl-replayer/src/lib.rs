//! Westwood ADL music replayer for OPL2
//!
//! ADL files carry bytecode programs for the AdLib sound driver used by
//! several early-90s adventure games. This crate interprets them and emits the
//! register writes the original driver would have sent to the chip.
//!
//! # Layers
//!
//! - [`AdlibDriver`]: the program interpreter (10 channels, priorities,
//!   effects, rhythm section), usable on its own with any sound data
//! - [`AdlFile`]: track table and version detection
//! - [`AdlPlayer`]: a [`MusicDriver`] mapping subsongs onto programs
//!
//! # Example
//!
//! ```no_run
//! use opl::OplSynth;
//! use opl_adl_replayer::AdlPlayer;
//! use opl_common::{OplPlayer, Replayer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = std::fs::read("intro.adl")?;
//! let mut player = Replayer::load(AdlPlayer::new(), &data, OplSynth::new(44_100), 44_100)?;
//! player.play();
//! let samples = player.generate_samples(44_100);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod driver;
pub mod format;
mod player;

pub use driver::{AdlibDriver, Channel, DriverFlags, Opcode, PrimaryEffect, SecondaryEffect};
pub use format::{AdlFile, AdlVersion};
pub use player::{AdlPlayer, DEFAULT_SUBSONG};

pub use opl_common::{CorruptProgram, LoadError, MusicDriver, PlaybackError};

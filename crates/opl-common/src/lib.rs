//! Common traits and types for OPL chiptune replayers.
//!
//! This crate sits between the format-specific drivers (ADL, IMF, DRO) and
//! whatever consumes PCM: it defines the driver contract, the clock that
//! interleaves driver ticks with sink rendering, the player facade and the
//! buffer ring used by the playback thread.
//!
//! # Traits
//!
//! - [`MusicDriver`] - Turns music data into timed register writes
//! - [`OplPlayer`] - Object-safe player interface for front ends
//!
//! # Example
//!
//! ```ignore
//! use opl::OplSynth;
//! use opl_common::{OplPlayer, Replayer};
//!
//! let mut player = Replayer::load(driver, &data, OplSynth::new(44_100), 44_100)?;
//! player.play();
//!
//! let mut buffer = vec![0i16; 4096];
//! while player.is_playing() {
//!     player.generate_samples_into(&mut buffer);
//!     // ... send buffer to audio device
//! }
//! ```

#![warn(missing_docs)]

mod driver;
pub mod error;
#[cfg(feature = "export-wav")]
pub mod export;
mod player;
mod sample_clock;
pub mod stream;

pub use driver::MusicDriver;
pub use error::{CorruptProgram, LoadError, PlaybackError, Result};
pub use player::{OplPlayer, PlaybackState, Replayer};
pub use sample_clock::SampleClock;
pub use stream::{BufferRing, PcmBuffer, PlaybackThread, RingStats, StreamConfig};

pub use opl::{RegisterSink, DEFAULT_SAMPLE_RATE};

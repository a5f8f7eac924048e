//! Driver-facing contract.
//!
//! A [`MusicDriver`] turns music data into timed register writes. It knows
//! nothing about sample rates: the [`SampleClock`](crate::SampleClock) calls
//! [`tick`](MusicDriver::tick) at the rate the driver asks for and renders the
//! sink in between.

use opl::RegisterSink;

use crate::error::{LoadError, PlaybackError};

/// A replayer for one music format
pub trait MusicDriver: Send {
    /// Parse `data` and prepare the first subsong.
    fn load(&mut self, data: &[u8]) -> Result<(), LoadError>;

    /// Ticks per second requested by the driver right now.
    ///
    /// May change after every tick (raw register streams encode their delays
    /// this way).
    fn refresh_rate(&self) -> f32;

    /// Advance one tick, writing registers into `sink`.
    ///
    /// Returns `Ok(false)` once the song has ended.
    fn tick(&mut self, sink: &mut dyn RegisterSink) -> Result<bool, PlaybackError>;

    /// Restart playback at `subsong` (0-based). `None` picks the default.
    fn rewind(&mut self, subsong: Option<usize>, sink: &mut dyn RegisterSink);

    /// Number of subsongs in the loaded data.
    fn subsong_count(&self) -> usize {
        1
    }

    /// Currently selected subsong (0-based).
    fn current_subsong(&self) -> usize {
        0
    }

    /// Short human readable format name.
    fn format_name(&self) -> &'static str;
}

impl<D: MusicDriver + ?Sized> MusicDriver for Box<D> {
    fn load(&mut self, data: &[u8]) -> Result<(), LoadError> {
        (**self).load(data)
    }

    fn refresh_rate(&self) -> f32 {
        (**self).refresh_rate()
    }

    fn tick(&mut self, sink: &mut dyn RegisterSink) -> Result<bool, PlaybackError> {
        (**self).tick(sink)
    }

    fn rewind(&mut self, subsong: Option<usize>, sink: &mut dyn RegisterSink) {
        (**self).rewind(subsong, sink);
    }

    fn subsong_count(&self) -> usize {
        (**self).subsong_count()
    }

    fn current_subsong(&self) -> usize {
        (**self).current_subsong()
    }

    fn format_name(&self) -> &'static str {
        (**self).format_name()
    }
}

//! High-level player interface.
//!
//! [`OplPlayer`] is the object-safe surface front ends program against.
//! [`Replayer`] implements it for any driver/sink pair through a
//! [`SampleClock`].

use opl::RegisterSink;

use crate::driver::MusicDriver;
use crate::error::{LoadError, PlaybackError};
use crate::sample_clock::SampleClock;

/// Playback state for OPL players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Player is stopped (at beginning or end).
    #[default]
    Stopped,
    /// Player is actively playing.
    Playing,
    /// Player is paused (can resume).
    Paused,
}

/// Object-safe player trait.
///
/// # Example
///
/// ```ignore
/// use opl_common::{OplPlayer, PlaybackState};
///
/// fn play_any(player: &mut dyn OplPlayer) {
///     player.play();
///     let mut buffer = vec![0i16; 1024];
///     while player.state() == PlaybackState::Playing {
///         player.generate_samples_into(&mut buffer);
///         // ... send buffer to audio device
///     }
/// }
/// ```
pub trait OplPlayer: Send {
    /// Start or resume playback.
    fn play(&mut self);

    /// Pause playback (keeps position).
    fn pause(&mut self);

    /// Stop playback and reset to beginning.
    fn stop(&mut self);

    /// Get current playback state.
    fn state(&self) -> PlaybackState;

    /// Check if currently playing.
    fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Generate samples into an existing buffer.
    ///
    /// Fills the entire buffer. When stopped, paused or past the end of the
    /// song, the remainder is silence.
    fn generate_samples_into(&mut self, buffer: &mut [i16]);

    /// Generate samples into a new buffer.
    fn generate_samples(&mut self, count: usize) -> Vec<i16> {
        let mut buffer = vec![0; count];
        self.generate_samples_into(&mut buffer);
        buffer
    }

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Interleaved channels per frame (1 or 2).
    fn channels(&self) -> usize {
        1
    }

    /// Elapsed playback time in seconds.
    fn elapsed_seconds(&self) -> f32 {
        0.0
    }

    /// Number of subsongs.
    fn subsong_count(&self) -> usize {
        1
    }

    /// Current subsong (1-based).
    fn current_subsong(&self) -> usize {
        1
    }

    /// Switch to a subsong by 1-based index.
    ///
    /// Returns `true` if the index was valid.
    fn set_subsong(&mut self, _index: usize) -> bool {
        false
    }

    /// Check if this player has multiple subsongs.
    fn has_subsongs(&self) -> bool {
        self.subsong_count() > 1
    }

    /// Short format name of the loaded music.
    fn format_name(&self) -> &'static str;
}

/// Player owning a driver, a sink and the clock between them
pub struct Replayer<D, S> {
    clock: SampleClock<D, S>,
    state: PlaybackState,
    samples_played: u64,
    needs_rewind: bool,
    last_error: Option<PlaybackError>,
}

impl<D: MusicDriver, S: RegisterSink> Replayer<D, S> {
    /// Wrap an already loaded driver.
    pub fn new(driver: D, sink: S, sample_rate: u32) -> Self {
        Self {
            clock: SampleClock::new(driver, sink, sample_rate),
            state: PlaybackState::Stopped,
            samples_played: 0,
            needs_rewind: false,
            last_error: None,
        }
    }

    /// Load `data` into `driver` and wrap it.
    pub fn load(mut driver: D, data: &[u8], sink: S, sample_rate: u32) -> Result<Self, LoadError> {
        driver.load(data)?;
        log::debug!(
            "loaded {} data, {} subsong(s)",
            driver.format_name(),
            driver.subsong_count()
        );
        Ok(Self::new(driver, sink, sample_rate))
    }

    /// Error that ended playback, if any.
    pub fn last_error(&self) -> Option<&PlaybackError> {
        self.last_error.as_ref()
    }

    /// Borrow the clock.
    pub fn clock(&self) -> &SampleClock<D, S> {
        &self.clock
    }

    /// Mutably borrow the clock.
    pub fn clock_mut(&mut self) -> &mut SampleClock<D, S> {
        &mut self.clock
    }

    /// Give up the player and return its clock.
    pub fn into_clock(self) -> SampleClock<D, S> {
        self.clock
    }

    fn restart(&mut self, subsong: Option<usize>) {
        self.clock.rewind(subsong);
        self.samples_played = 0;
        self.last_error = None;
        self.needs_rewind = false;
    }
}

impl<D: MusicDriver, S: RegisterSink> OplPlayer for Replayer<D, S> {
    fn play(&mut self) {
        if self.needs_rewind {
            let subsong = self.clock.driver().current_subsong();
            self.restart(Some(subsong));
        }
        self.state = PlaybackState::Playing;
    }

    fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.needs_rewind = true;
    }

    fn state(&self) -> PlaybackState {
        self.state
    }

    fn generate_samples_into(&mut self, buffer: &mut [i16]) {
        let written = if self.state == PlaybackState::Playing {
            match self.clock.fill(buffer) {
                Ok(written) => written,
                Err(err) => {
                    self.last_error = Some(err);
                    0
                }
            }
        } else {
            0
        };

        self.samples_played += written as u64;
        if written < buffer.len() {
            buffer[written..].fill(0);
            if self.state == PlaybackState::Playing && self.clock.is_finished() {
                self.state = PlaybackState::Stopped;
                self.needs_rewind = true;
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    fn channels(&self) -> usize {
        self.clock.channels()
    }

    fn elapsed_seconds(&self) -> f32 {
        let frames = self.samples_played as f64 / self.clock.channels() as f64;
        (frames / f64::from(self.clock.sample_rate())) as f32
    }

    fn subsong_count(&self) -> usize {
        self.clock.driver().subsong_count()
    }

    fn current_subsong(&self) -> usize {
        self.clock.driver().current_subsong() + 1
    }

    fn set_subsong(&mut self, index: usize) -> bool {
        if index == 0 || index > self.subsong_count() {
            return false;
        }
        self.restart(Some(index - 1));
        true
    }

    fn format_name(&self) -> &'static str {
        self.clock.driver().format_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_clock::tests::CountingDriver;
    use approx::assert_relative_eq;
    use opl::RegisterLog;

    fn replayer(length: u32) -> Replayer<CountingDriver, RegisterLog> {
        Replayer::new(CountingDriver::new(100.0, length), RegisterLog::new(), 1000)
    }

    #[test]
    fn test_silence_when_stopped() {
        let mut player = replayer(10);
        let buffer = player.generate_samples(64);
        assert!(buffer.iter().all(|&s| s == 0));
        assert_eq!(player.clock().ticks(), 0);
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_play_pause() {
        let mut player = replayer(1000);
        player.play();
        assert!(player.is_playing());
        player.generate_samples(500);
        assert_relative_eq!(player.elapsed_seconds(), 0.5);

        player.pause();
        let ticks = player.clock().ticks();
        player.generate_samples(500);
        assert_eq!(player.clock().ticks(), ticks);
        assert_eq!(player.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_stops_at_end() {
        let mut player = replayer(5);
        player.play();
        player.generate_samples(1000);
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(player.last_error().is_none());

        player.play();
        assert!(player.is_playing());
        assert_relative_eq!(player.elapsed_seconds(), 0.0);
    }

    #[test]
    fn test_error_is_kept() {
        let mut driver = CountingDriver::new(100.0, 50);
        driver.fail_at = Some(1);
        let mut player = Replayer::new(driver, RegisterLog::new(), 1000);
        player.play();
        player.generate_samples(200);
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(matches!(
            player.last_error(),
            Some(PlaybackError::CorruptProgram(_))
        ));
    }

    #[test]
    fn test_subsong_bounds() {
        let mut player = replayer(10);
        assert_eq!(player.current_subsong(), 1);
        assert!(!player.has_subsongs());
        assert!(!player.set_subsong(0));
        assert!(!player.set_subsong(2));
        assert!(player.set_subsong(1));
        assert_eq!(player.format_name(), "test");
    }
}

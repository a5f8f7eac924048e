//! Fractional tick scheduling.
//!
//! The clock interleaves driver ticks with sink rendering so that a driver
//! running at `refresh` Hz produces `sample_rate / refresh` frames per tick on
//! average, without drift. The carry accumulator counts in units of
//! `sample_rate * ticks`: each tick adds the sample rate, each rendered frame
//! consumes `refresh`.

use opl::RegisterSink;

use crate::driver::MusicDriver;
use crate::error::PlaybackError;

/// Drives a [`MusicDriver`] against a [`RegisterSink`] at a fixed output rate
pub struct SampleClock<D, S> {
    driver: D,
    sink: S,
    sample_rate: u32,
    carry: f64,
    ended: bool,
    ticks: u64,
}

impl<D: MusicDriver, S: RegisterSink> SampleClock<D, S> {
    /// Create a clock rendering `sink` at `sample_rate` Hz.
    pub fn new(driver: D, sink: S, sample_rate: u32) -> Self {
        Self {
            driver,
            sink,
            sample_rate: sample_rate.max(1),
            carry: 0.0,
            ended: false,
            ticks: 0,
        }
    }

    /// Fill `buffer` with PCM, ticking the driver as needed.
    ///
    /// Returns the number of samples written (frames times channels). A short
    /// count means the song ended; every later call returns 0 without calling
    /// the driver until [`reset`](Self::reset).
    pub fn fill(&mut self, buffer: &mut [i16]) -> Result<usize, PlaybackError> {
        if self.ended {
            return Ok(0);
        }

        let channels = self.sink.channels();
        let frames = buffer.len() / channels;
        let mut remaining = frames;
        let mut pos = 0;

        while remaining > 0 {
            while self.carry < 0.0 {
                self.carry += f64::from(self.sample_rate);
                self.ticks += 1;
                match self.driver.tick(&mut self.sink) {
                    Ok(true) => {}
                    Ok(false) => {
                        log::debug!("song ended after {} ticks", self.ticks);
                        self.ended = true;
                        return Ok(pos);
                    }
                    Err(err) => {
                        log::warn!("stopping playback: {err}");
                        self.ended = true;
                        return Err(err);
                    }
                }
            }

            let refresh = f64::from(self.driver.refresh_rate());
            if !refresh.is_finite() || refresh <= 0.0 {
                log::warn!("driver reported refresh rate {refresh}, holding clock");
                self.ended = true;
                return Ok(pos);
            }

            let chunk = remaining.min(((self.carry / refresh + 4.0) as usize) & !3);
            let len = chunk * channels;
            self.sink.render(&mut buffer[pos..pos + len]);
            pos += len;
            remaining -= chunk;
            self.carry -= refresh * chunk as f64;
        }

        Ok(pos)
    }

    /// Clear the end-of-stream flag and the carry.
    pub fn reset(&mut self) {
        self.carry = 0.0;
        self.ended = false;
    }

    /// Restart the driver at `subsong` and reset the clock.
    pub fn rewind(&mut self, subsong: Option<usize>) {
        self.driver.rewind(subsong, &mut self.sink);
        self.reset();
    }

    /// Whether the stream has ended.
    pub fn is_finished(&self) -> bool {
        self.ended
    }

    /// Driver ticks performed since creation.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved channels produced per frame.
    pub fn channels(&self) -> usize {
        self.sink.channels()
    }

    /// Borrow the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutably borrow the driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Borrow the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutably borrow the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Split into driver and sink.
    pub fn into_parts(self) -> (D, S) {
        (self.driver, self.sink)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{CorruptProgram, LoadError};
    use opl::RegisterLog;

    /// Driver writing its tick number to register 0xA0 and ending after
    /// `length` ticks.
    pub(crate) struct CountingDriver {
        pub refresh: f32,
        pub length: u32,
        pub ticks: u32,
        pub fail_at: Option<u32>,
    }

    impl CountingDriver {
        pub(crate) fn new(refresh: f32, length: u32) -> Self {
            Self {
                refresh,
                length,
                ticks: 0,
                fail_at: None,
            }
        }
    }

    impl MusicDriver for CountingDriver {
        fn load(&mut self, _data: &[u8]) -> Result<(), LoadError> {
            Ok(())
        }

        fn refresh_rate(&self) -> f32 {
            self.refresh
        }

        fn tick(&mut self, sink: &mut dyn RegisterSink) -> Result<bool, PlaybackError> {
            if self.fail_at == Some(self.ticks) {
                return Err(CorruptProgram::OutOfBounds { offset: 9, len: 4 }.into());
            }
            if self.ticks >= self.length {
                return Ok(false);
            }
            sink.write_register(0xA0, self.ticks as u8);
            self.ticks += 1;
            Ok(true)
        }

        fn rewind(&mut self, _subsong: Option<usize>, sink: &mut dyn RegisterSink) {
            sink.write_register(0x01, 0x20);
            self.ticks = 0;
        }

        fn format_name(&self) -> &'static str {
            "test"
        }
    }

    #[test]
    fn test_one_second_at_72hz() {
        let mut clock = SampleClock::new(CountingDriver::new(72.0, 1000), RegisterLog::new(), 44_100);
        let mut buffer = vec![0i16; 44_100];
        let written = clock.fill(&mut buffer).unwrap();
        assert_eq!(written, 44_100);
        assert!(clock.ticks() <= 73, "ticks {}", clock.ticks());
        assert!(clock.ticks() >= 72);
    }

    #[test]
    fn test_never_more_than_requested() {
        let mut clock = SampleClock::new(CountingDriver::new(700.0, 10_000), RegisterLog::new(), 44_100);
        for len in [1usize, 3, 17, 63, 64, 1000] {
            let mut buffer = vec![0i16; len];
            assert_eq!(clock.fill(&mut buffer).unwrap(), len);
        }
    }

    #[test]
    fn test_end_is_sticky() {
        let mut clock = SampleClock::new(CountingDriver::new(100.0, 3), RegisterLog::new(), 1000);
        let mut buffer = vec![0i16; 1000];
        let written = clock.fill(&mut buffer).unwrap();
        assert!(written < 1000);
        assert!(clock.is_finished());

        let ticks = clock.ticks();
        assert_eq!(clock.fill(&mut buffer).unwrap(), 0);
        assert_eq!(clock.ticks(), ticks);
    }

    #[test]
    fn test_zero_refresh_holds() {
        let mut clock = SampleClock::new(CountingDriver::new(0.0, 100), RegisterLog::new(), 44_100);
        let mut buffer = vec![0i16; 512];
        assert_eq!(clock.fill(&mut buffer).unwrap(), 0);
        assert!(clock.is_finished());

        let mut clock = SampleClock::new(CountingDriver::new(f32::NAN, 100), RegisterLog::new(), 44_100);
        assert_eq!(clock.fill(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_corrupt_program_ends_stream() {
        let mut driver = CountingDriver::new(50.0, 100);
        driver.fail_at = Some(2);
        let mut clock = SampleClock::new(driver, RegisterLog::new(), 1000);
        let mut buffer = vec![0i16; 1000];
        let err = clock.fill(&mut buffer).unwrap_err();
        assert!(matches!(err, PlaybackError::CorruptProgram(_)));
        assert_eq!(clock.fill(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_rewind_restarts() {
        let mut clock = SampleClock::new(CountingDriver::new(100.0, 2), RegisterLog::new(), 1000);
        let mut buffer = vec![0i16; 100];
        while clock.fill(&mut buffer).unwrap() == buffer.len() {}
        assert!(clock.is_finished());

        clock.rewind(None);
        assert!(!clock.is_finished());
        assert_eq!(clock.sink().last_value(0x01), Some(0x20));
        assert_eq!(clock.fill(&mut buffer[..10]).unwrap(), 10);
    }
}

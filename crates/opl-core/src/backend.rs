//! Register sink trait
//!
//! This module defines the interface a chip implementation exposes to the
//! replayers: register writes go in, PCM comes out. Sinks can be accurate
//! emulations, preview synthesizers, recorders or wrappers around other sinks.

/// Capability exposed by an OPL chip implementation
///
/// Replayers only ever talk to the chip through this trait, which allows:
/// - Swapping the emulation without touching the replayers
/// - Recording register streams for tests ([`crate::RegisterLog`])
/// - Layering post-processors over other sinks ([`crate::SurroundOpl`])
///
/// # Example
///
/// ```
/// use opl::{RegisterSink, RegisterLog};
///
/// fn key_on<S: RegisterSink + ?Sized>(chip: &mut S, channel: u8) {
///     chip.write_register(0xA0 + channel, 0x41);
///     chip.write_register(0xB0 + channel, 0x32);
/// }
///
/// let mut log = RegisterLog::new();
/// key_on(&mut log, 3);
/// assert_eq!(log.len(), 2);
/// ```
pub trait RegisterSink: Send {
    /// Write to a chip register
    ///
    /// # Arguments
    ///
    /// * `addr` - Register address (0x00-0xFF)
    /// * `value` - Register value (0x00-0xFF)
    ///
    /// Addresses the chip does not implement are still accepted. Sinks log a
    /// diagnostic for them instead of failing.
    fn write_register(&mut self, addr: u8, value: u8);

    /// Render PCM reflecting every write applied so far
    ///
    /// Fills `buffer.len() / self.channels()` frames. Stereo sinks write
    /// interleaved left/right samples.
    fn render(&mut self, buffer: &mut [i16]);

    /// Whether the sink produces interleaved stereo output
    fn is_stereo(&self) -> bool;

    /// Number of interleaved output channels (1 or 2)
    fn channels(&self) -> usize {
        if self.is_stereo() {
            2
        } else {
            1
        }
    }

    /// Reset the sink to its power-on state
    ///
    /// Default implementation does nothing.
    fn reset(&mut self) {}
}

impl<S: RegisterSink + ?Sized> RegisterSink for Box<S> {
    fn write_register(&mut self, addr: u8, value: u8) {
        (**self).write_register(addr, value);
    }

    fn render(&mut self, buffer: &mut [i16]) {
        (**self).render(buffer);
    }

    fn is_stereo(&self) -> bool {
        (**self).is_stereo()
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}

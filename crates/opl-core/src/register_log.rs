//! Register write recorder
//!
//! [`RegisterLog`] is a sink that keeps every write in order and renders
//! silence. It is the reference tool for checking that a replayer produces
//! byte-identical register streams, and for dumping streams to text.

use std::fmt::Write as _;
use std::io::Write;

use crate::backend::RegisterSink;
use crate::Result;

/// One recorded event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterLogEntry {
    /// Register write
    Write {
        /// Register address
        reg: u8,
        /// Written value
        value: u8,
    },
    /// Refresh-rate marker recorded between ticks
    Refresh(f32),
}

/// Sink recording register writes
#[derive(Debug, Clone, Default)]
pub struct RegisterLog {
    entries: Vec<RegisterLogEntry>,
}

impl RegisterLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty log with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// All recorded entries in order.
    pub fn entries(&self) -> &[RegisterLogEntry] {
        &self.entries
    }

    /// Recorded writes as `(reg, value)` pairs, skipping refresh markers.
    pub fn writes(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.entries.iter().filter_map(|entry| match *entry {
            RegisterLogEntry::Write { reg, value } => Some((reg, value)),
            RegisterLogEntry::Refresh(_) => None,
        })
    }

    /// Last value written to `reg`, if any.
    pub fn last_value(&self, reg: u8) -> Option<u8> {
        self.writes()
            .filter(|&(r, _)| r == reg)
            .map(|(_, value)| value)
            .last()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget all recorded entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Record the refresh rate reported by a driver after a tick.
    pub fn mark_refresh(&mut self, rate: f32) {
        self.entries.push(RegisterLogEntry::Refresh(rate));
    }

    /// Render the log as text: `reg <- val` lines in hex, `r<rate>` markers.
    pub fn dump(&self) -> String {
        let mut out = String::with_capacity(self.entries.len() * 8);
        for entry in &self.entries {
            // Writing into a String cannot fail
            let _ = match *entry {
                RegisterLogEntry::Write { reg, value } => writeln!(out, "{reg:x} <- {value:x}"),
                RegisterLogEntry::Refresh(rate) => writeln!(out, "r{rate:.2}"),
            };
        }
        out
    }

    /// Write the text dump to `writer`.
    pub fn write_dump<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(self.dump().as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

impl RegisterSink for RegisterLog {
    fn write_register(&mut self, addr: u8, value: u8) {
        if !crate::registers::is_implemented(addr) {
            log::trace!("recording write to unimplemented register {addr:#04x}");
        }
        self.entries.push(RegisterLogEntry::Write { reg: addr, value });
    }

    fn render(&mut self, buffer: &mut [i16]) {
        buffer.fill(0);
    }

    fn is_stereo(&self) -> bool {
        false
    }

    fn reset(&mut self) {
        self.entries.clear();
    }
}

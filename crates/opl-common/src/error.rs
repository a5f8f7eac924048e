//! Error types shared by every OPL replayer.

use thiserror::Error;

/// Result type for loading music data.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Malformed or truncated input.
///
/// Recoverable: the probe layer tries the next decoder on any of these.
#[derive(Error, Debug)]
pub enum LoadError {
    /// File shorter than the format allows.
    #[error("{format} file too short: {actual} bytes (minimum {minimum})")]
    TooShort {
        /// Format name.
        format: &'static str,
        /// Actual length in bytes.
        actual: usize,
        /// Minimum accepted length.
        minimum: usize,
    },

    /// Header or layout does not match the format.
    #[error("Invalid {format} data: {reason}")]
    InvalidFormat {
        /// Format name.
        format: &'static str,
        /// What did not match.
        reason: String,
    },

    /// No decoder accepted the input.
    #[error("Unsupported input: {0}")]
    Unsupported(String),

    /// Free-form parser message.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// I/O error while reading the input.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Shorthand for [`LoadError::InvalidFormat`].
    pub fn invalid(format: &'static str, reason: impl Into<String>) -> Self {
        LoadError::InvalidFormat {
            format,
            reason: reason.into(),
        }
    }
}

impl From<String> for LoadError {
    fn from(s: String) -> Self {
        LoadError::InvalidData(s)
    }
}

impl From<&str> for LoadError {
    fn from(s: &str) -> Self {
        LoadError::InvalidData(s.to_string())
    }
}

/// A music program referenced data it does not own.
///
/// Fatal for the current song. Raised instead of panicking whenever an index
/// computed from program data leaves its buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptProgram {
    /// Byte offset outside the music data.
    #[error("offset {offset} outside {len}-byte music data")]
    OutOfBounds {
        /// Offending offset.
        offset: usize,
        /// Length of the buffer.
        len: usize,
    },

    /// Program header names a channel that does not exist.
    #[error("program targets channel {index}")]
    BadChannel {
        /// Channel byte read from the program.
        index: usize,
    },

    /// Subroutine call with a full return stack.
    #[error("return stack overflow on channel {channel}")]
    StackOverflow {
        /// Channel running the program.
        channel: usize,
    },

    /// Return without a matching call.
    #[error("return stack underflow on channel {channel}")]
    StackUnderflow {
        /// Channel running the program.
        channel: usize,
    },

    /// Lookup past the end of a static table.
    #[error("index {index} outside table {table}")]
    TableIndex {
        /// Table name.
        table: &'static str,
        /// Offending index.
        index: isize,
    },
}

/// Errors surfaced while producing audio.
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// The running program is corrupt; the song has ended.
    #[error("Corrupt program: {0}")]
    CorruptProgram(#[from] CorruptProgram),

    /// No buffer was ready when the consumer asked. Retryable.
    #[error("Playback stall: no buffer ready")]
    PlaybackStall,

    /// Error reported by the output device.
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Playback thread could not be started.
    #[error("Failed to spawn playback thread: {0}")]
    Spawn(String),
}

impl PlaybackError {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlaybackError::PlaybackStall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_short_message() {
        let err = LoadError::TooShort {
            format: "ADL",
            actual: 300,
            minimum: 720,
        };
        assert_eq!(
            err.to_string(),
            "ADL file too short: 300 bytes (minimum 720)"
        );
    }

    #[test]
    fn test_string_conversion() {
        let err: LoadError = "bad track table".into();
        assert!(matches!(err, LoadError::InvalidData(ref msg) if msg == "bad track table"));
    }

    #[test]
    fn test_corrupt_program_wraps() {
        let err: PlaybackError = CorruptProgram::OutOfBounds { offset: 900, len: 800 }.into();
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "Corrupt program: offset 900 outside 800-byte music data"
        );
        assert!(PlaybackError::PlaybackStall.is_transient());
    }
}

//! DOSBox raw OPL capture, version 1 (DRO).
//!
//! Layout: `"DBRAWOPL"`, `u32` version `0x10000`, `u32` length in
//! milliseconds, `u32` stream length in bytes, the hardware type, the
//! command stream and an optional tag block. Early captures store the
//! hardware type in one byte, later ones in four, without a version change;
//! a zero among the three bytes after the first tells the long form apart.
//!
//! Stream commands:
//!
//! | Byte | Meaning                                  |
//! |------|------------------------------------------|
//! | 0x00 | delay of `next + 1` ms                   |
//! | 0x01 | delay of `u16 LE + 1` ms                 |
//! | 0x02 | select low chip (ignored)                |
//! | 0x03 | select high chip (ignored)               |
//! | 0x04 | escape: the next two bytes are reg, val  |
//! | else | register, followed by the value          |

use opl::RegisterSink;
use opl_common::{CorruptProgram, LoadError, MusicDriver, PlaybackError};

use crate::reader::ByteReader;

/// Format name used in load errors.
pub const FORMAT_NAME: &str = "DRO";

/// File signature.
pub const MAGIC: &[u8; 8] = b"DBRAWOPL";

const VERSION_1: u32 = 0x10000;

/// Offset of the hardware type byte.
const HARDWARE_OFFSET: usize = 20;

const CMD_DELAY_SHORT: u8 = 0x00;
const CMD_DELAY_LONG: u8 = 0x01;
const CMD_CHIP_LOW: u8 = 0x02;
const CMD_CHIP_HIGH: u8 = 0x03;
const CMD_ESCAPE: u8 = 0x04;

const TAG_MAGIC: [u8; 3] = [0xFF, 0xFF, 0x1A];
const TAG_AUTHOR: u8 = 0x1B;
const TAG_DESCRIPTION: u8 = 0x1C;
const TITLE_MAX: usize = 40;
const AUTHOR_MAX: usize = 40;
const DESCRIPTION_MAX: usize = 1023;

/// Chip configuration the capture was made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DroHardware {
    /// Single OPL2.
    #[default]
    Opl2,
    /// OPL3.
    Opl3,
    /// Two OPL2 chips.
    DualOpl2,
    /// Unknown type byte.
    Other(u8),
}

impl From<u8> for DroHardware {
    fn from(value: u8) -> Self {
        match value {
            0 => DroHardware::Opl2,
            1 => DroHardware::Opl3,
            2 => DroHardware::DualOpl2,
            other => DroHardware::Other(other),
        }
    }
}

/// Header fields and tags of a capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DroMetadata {
    /// Length in milliseconds as recorded by DOSBox.
    pub length_ms: u32,
    /// Chip configuration.
    pub hardware: DroHardware,
    /// Title tag.
    pub title: String,
    /// Author tag.
    pub author: String,
    /// Description tag.
    pub description: String,
}

/// A parsed DRO capture.
#[derive(Debug, Clone)]
pub struct DroSong {
    /// Raw command stream.
    pub stream: Vec<u8>,
    /// Header fields and tags.
    pub metadata: DroMetadata,
}

impl DroSong {
    /// Parse a version 1 capture.
    pub fn parse(data: &[u8]) -> Result<Self, LoadError> {
        if !data.starts_with(MAGIC) {
            return Err(LoadError::invalid(FORMAT_NAME, "missing DBRAWOPL signature"));
        }
        let reader = ByteReader::new(FORMAT_NAME, data);

        let version = reader.read_u32(8)?;
        if version != VERSION_1 {
            return Err(LoadError::invalid(
                FORMAT_NAME,
                format!("unsupported version {version:#x}"),
            ));
        }

        let mut metadata = DroMetadata {
            length_ms: reader.read_u32(12)?,
            hardware: DroHardware::from(reader.read_u8(HARDWARE_OFFSET)?),
            ..DroMetadata::default()
        };
        let length = reader.read_u32(16)? as usize;

        let start = if reader.slice(HARDWARE_OFFSET + 1, 3)?.contains(&0) {
            HARDWARE_OFFSET + 4
        } else {
            HARDWARE_OFFSET + 1
        };
        let stream = reader.slice(start, length)?.to_vec();

        let tags = start + length;
        if reader.slice(tags, TAG_MAGIC.len()).is_ok_and(|magic| magic == TAG_MAGIC) {
            let (title, next) = reader.read_nt_string(tags + 3, TITLE_MAX + 1);
            metadata.title = title;

            let mut next = next;
            if reader.read_u8(next).is_ok_and(|tag| tag == TAG_AUTHOR) {
                let (author, after) = reader.read_nt_string(next + 1, AUTHOR_MAX + 1);
                metadata.author = author;
                next = after;
            }
            if reader.read_u8(next).is_ok_and(|tag| tag == TAG_DESCRIPTION) {
                let (description, _) = reader.read_nt_string(next + 1, DESCRIPTION_MAX + 1);
                metadata.description = description;
            }
        }

        log::debug!(
            "DRO: {} ms, {:?}, {} stream byte(s)",
            metadata.length_ms,
            metadata.hardware,
            stream.len()
        );

        Ok(Self { stream, metadata })
    }
}

/// Plays DRO captures.
///
/// Each tick applies writes up to the next delay command; the refresh rate
/// is then `1000 / delay` Hz.
#[derive(Default)]
pub struct DroPlayer {
    song: Option<DroSong>,
    pos: usize,
    delay: u32,
    started: bool,
}

impl DroPlayer {
    /// Create an empty player.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loaded capture, if any.
    pub fn song(&self) -> Option<&DroSong> {
        self.song.as_ref()
    }

    /// Header fields and tags of the loaded capture.
    pub fn metadata(&self) -> Option<&DroMetadata> {
        self.song.as_ref().map(|song| &song.metadata)
    }
}

fn next_byte(stream: &[u8], pos: &mut usize) -> Result<u8, CorruptProgram> {
    let byte = stream.get(*pos).copied().ok_or(CorruptProgram::OutOfBounds {
        offset: *pos,
        len: stream.len(),
    })?;
    *pos += 1;
    Ok(byte)
}

impl MusicDriver for DroPlayer {
    fn load(&mut self, data: &[u8]) -> Result<(), LoadError> {
        *self = Self {
            song: Some(DroSong::parse(data)?),
            ..Self::default()
        };
        Ok(())
    }

    fn refresh_rate(&self) -> f32 {
        if self.delay > 0 {
            1000.0 / self.delay as f32
        } else {
            1000.0
        }
    }

    fn tick(&mut self, sink: &mut dyn RegisterSink) -> Result<bool, PlaybackError> {
        if !self.started {
            self.rewind(None, sink);
        }
        let Some(song) = self.song.as_ref() else {
            return Ok(false);
        };
        let stream = song.stream.as_slice();

        while self.pos < stream.len() {
            let command = next_byte(stream, &mut self.pos)?;
            match command {
                CMD_DELAY_SHORT => {
                    self.delay = u32::from(next_byte(stream, &mut self.pos)?) + 1;
                    return Ok(true);
                }
                CMD_DELAY_LONG => {
                    let low = next_byte(stream, &mut self.pos)?;
                    let high = next_byte(stream, &mut self.pos)?;
                    self.delay = u32::from(u16::from_le_bytes([low, high])) + 1;
                    return Ok(true);
                }
                CMD_CHIP_LOW | CMD_CHIP_HIGH => {
                    log::trace!("DRO chip select {} ignored", command - CMD_CHIP_LOW);
                }
                _ => {
                    let register = if command == CMD_ESCAPE {
                        next_byte(stream, &mut self.pos)?
                    } else {
                        command
                    };
                    let value = next_byte(stream, &mut self.pos)?;
                    sink.write_register(register, value);
                }
            }
        }

        log::debug!("DRO stream ended");
        Ok(false)
    }

    fn rewind(&mut self, _subsong: Option<usize>, sink: &mut dyn RegisterSink) {
        self.pos = 0;
        self.delay = 0;
        self.started = true;
        sink.write_register(0x01, 0x20);
    }

    fn format_name(&self) -> &'static str {
        FORMAT_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use opl::RegisterLog;

    /// Capture with the four-byte hardware type.
    fn capture(stream: &[u8], tags: &[u8]) -> Vec<u8> {
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(&VERSION_1.to_le_bytes());
        data.extend_from_slice(&1234u32.to_le_bytes());
        data.extend_from_slice(&(stream.len() as u32).to_le_bytes());
        data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        data.extend_from_slice(stream);
        data.extend_from_slice(tags);
        data
    }

    #[test]
    fn test_parse_long_hardware_type() {
        let song = DroSong::parse(&capture(&[0xA0, 0x44, 0x00, 0x09], &[])).unwrap();
        assert_eq!(song.stream, vec![0xA0, 0x44, 0x00, 0x09]);
        assert_eq!(song.metadata.length_ms, 1234);
        assert_eq!(song.metadata.hardware, DroHardware::Opl3);
    }

    #[test]
    fn test_parse_short_hardware_type() {
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(&VERSION_1.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&[0x00, 0xA0, 0x44, 0xB0, 0x31]);
        let song = DroSong::parse(&data).unwrap();
        assert_eq!(song.stream, vec![0xA0, 0x44, 0xB0, 0x31]);
        assert_eq!(song.metadata.hardware, DroHardware::Opl2);
    }

    #[test]
    fn test_parse_tags() {
        let tags = b"\xff\xff\x1aTitle\0\x1bAuthor\0\x1cAbout\0";
        let song = DroSong::parse(&capture(&[0xA0, 0x44], tags)).unwrap();
        assert_eq!(song.metadata.title, "Title");
        assert_eq!(song.metadata.author, "Author");
        assert_eq!(song.metadata.description, "About");

        // Description without an author
        let tags = b"\xff\xff\x1aTitle\0\x1cAbout\0";
        let song = DroSong::parse(&capture(&[0xA0, 0x44], tags)).unwrap();
        assert!(song.metadata.author.is_empty());
        assert_eq!(song.metadata.description, "About");

        // Anything else after the stream is ignored
        let song = DroSong::parse(&capture(&[0xA0, 0x44], b"junk")).unwrap();
        assert!(song.metadata.title.is_empty());
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(DroSong::parse(b"DBRAWOP").is_err());
        let mut data = capture(&[0xA0, 0x44], &[]);
        data[10] = 0x02;
        assert!(matches!(
            DroSong::parse(&data),
            Err(LoadError::InvalidFormat { format: "DRO", .. })
        ));

        let mut data = capture(&[0xA0, 0x44], &[]);
        data[16] = 0x40;
        assert!(DroSong::parse(&data).is_err());
    }

    #[test]
    fn test_commands() {
        let stream = [
            0xA0, 0x44, // write
            0x02, // chip select, ignored
            0x04, 0x01, 0x20, // escaped write to register 1
            0x00, 0x09, // 10 ms
            0xB0, 0x31, //
            0x01, 0xE7, 0x03, // 1000 ms
            0xB0, 0x11,
        ];
        let mut player = DroPlayer::new();
        player.load(&capture(&stream, &[])).unwrap();
        let mut log = RegisterLog::new();

        assert!(player.tick(&mut log).unwrap());
        let writes: Vec<_> = log.writes().collect();
        assert_eq!(writes, vec![(0x01, 0x20), (0xA0, 0x44), (0x01, 0x20)]);
        assert_relative_eq!(player.refresh_rate(), 100.0);

        assert!(player.tick(&mut log).unwrap());
        assert_relative_eq!(player.refresh_rate(), 1.0);
        assert_eq!(log.last_value(0xB0), Some(0x31));

        assert!(!player.tick(&mut log).unwrap());
        assert_eq!(log.last_value(0xB0), Some(0x11));
    }

    #[test]
    fn test_truncated_command_is_corrupt() {
        let mut player = DroPlayer::new();
        player.load(&capture(&[0xA0, 0x44, 0xB0], &[])).unwrap();
        let mut log = RegisterLog::new();
        assert!(matches!(
            player.tick(&mut log),
            Err(PlaybackError::CorruptProgram(CorruptProgram::OutOfBounds { offset: 3, len: 3 }))
        ));
    }

    #[test]
    fn test_rewind_resets_delay() {
        let mut player = DroPlayer::new();
        player.load(&capture(&[0x00, 0x04, 0xA0, 0x44], &[])).unwrap();
        let mut log = RegisterLog::new();
        player.tick(&mut log).unwrap();
        assert_relative_eq!(player.refresh_rate(), 200.0);
        player.rewind(None, &mut log);
        assert_relative_eq!(player.refresh_rate(), 1000.0);
    }
}

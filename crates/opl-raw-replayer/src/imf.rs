//! id Software Music Format (IMF).
//!
//! An IMF song is a flat list of 4-byte records `[register][value][delay]`,
//! the delay being a little-endian `u16` in ticks of the base rate: 560 Hz
//! for `.imf` files and 700 Hz for `.wlf` files.
//!
//! Three layouts are in use:
//!
//! - type 0: no length prefix, the whole file is records
//! - type 1: a `u16` byte length, the records, then an optional footer
//! - headered: `"ADLIB\x01"`, title and game strings, a reserved byte, then a
//!   `u32` byte length and the rest as in type 1
//!
//! A zero length prefix marks type 0 data.

use opl::RegisterSink;
use opl_common::{LoadError, MusicDriver, PlaybackError};

use crate::reader::ByteReader;

/// Format name used in load errors.
pub const FORMAT_NAME: &str = "IMF";

/// Tick rate of `.imf` files.
pub const IMF_RATE: f32 = 560.0;

/// Tick rate of `.wlf` files and of files without a known extension.
pub const WLF_RATE: f32 = 700.0;

const HEADER_MAGIC: &[u8] = b"ADLIB";
const HEADER_VERSION: u8 = 1;
const RECORD_LEN: usize = 4;

/// First byte of a tagged footer (title, author, remarks).
const FOOTER_TAG: u8 = 0x1A;

/// One register write followed by a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImfRecord {
    /// OPL register address.
    pub register: u8,
    /// Value written.
    pub value: u8,
    /// Ticks to wait after the write.
    pub delay: u16,
}

/// Text found in the header and footer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImfMetadata {
    /// Track title.
    pub title: String,
    /// Game the track comes from.
    pub game: String,
    /// Composer.
    pub author: String,
    /// Free-form remarks.
    pub remarks: String,
    /// Untagged footer text.
    pub footer: Option<String>,
}

/// A parsed IMF song.
#[derive(Debug, Clone)]
pub struct ImfSong {
    /// Register records in playback order.
    pub records: Vec<ImfRecord>,
    /// Header and footer text.
    pub metadata: ImfMetadata,
}

impl ImfSong {
    /// Parse any of the three IMF layouts.
    pub fn parse(data: &[u8]) -> Result<Self, LoadError> {
        let reader = ByteReader::new(FORMAT_NAME, data);
        let mut metadata = ImfMetadata::default();

        let headered = data.starts_with(HEADER_MAGIC) && data.get(5) == Some(&HEADER_VERSION);
        let length_offset = if headered {
            let (title, next) = reader.read_nt_string(6, data.len());
            let (game, next) = reader.read_nt_string(next, data.len());
            metadata.title = title;
            metadata.game = game;
            // Skip the reserved byte
            next + 1
        } else {
            0
        };

        let declared = if headered {
            reader.read_u32(length_offset)? as usize
        } else {
            usize::from(reader.read_u16(length_offset)?)
        };

        let (start, count) = match (declared, headered) {
            // Type 0: the zero prefix is part of the first record
            (0, false) => (0, data.len() / RECORD_LEN),
            (0, true) => (
                length_offset,
                data.len().saturating_sub(length_offset + 2) / RECORD_LEN,
            ),
            (len, _) => {
                let start = length_offset + if headered { 4 } else { 2 };
                reader.slice(start, len)?;
                (start, len / RECORD_LEN)
            }
        };

        if count == 0 {
            return Err(LoadError::invalid(FORMAT_NAME, "no register records"));
        }

        let records = reader
            .slice(start, count * RECORD_LEN)?
            .chunks_exact(RECORD_LEN)
            .map(|chunk| ImfRecord {
                register: chunk[0],
                value: chunk[1],
                delay: u16::from_le_bytes([chunk[2], chunk[3]]),
            })
            .collect();

        let footer_offset = start + declared;
        if declared != 0 && footer_offset < data.len() {
            if data[footer_offset] == FOOTER_TAG {
                let (title, next) = reader.read_nt_string(footer_offset + 1, data.len());
                let (author, next) = reader.read_nt_string(next, data.len());
                let (remarks, _) = reader.read_nt_string(next, data.len());
                metadata.title = title;
                metadata.author = author;
                metadata.remarks = remarks;
            } else {
                let (footer, _) = reader.read_nt_string(footer_offset, data.len());
                metadata.footer = Some(footer);
            }
        }

        log::debug!(
            "IMF: {count} record(s){}{}",
            if headered { ", ADLIB header" } else { "" },
            if declared == 0 { ", type 0" } else { "" }
        );

        Ok(Self { records, metadata })
    }
}

/// Tick rate implied by a file extension (with or without the dot).
pub fn rate_for_extension(extension: Option<&str>) -> f32 {
    match extension.map(|ext| ext.trim_start_matches('.').to_ascii_lowercase()) {
        Some(ext) if ext == "imf" => IMF_RATE,
        _ => WLF_RATE,
    }
}

/// Plays IMF register streams.
///
/// The refresh rate follows the record delays: after a record with delay
/// `d` the next tick comes `d` base-rate ticks later.
pub struct ImfPlayer {
    base_rate: f32,
    song: Option<ImfSong>,
    pos: usize,
    refresh: f32,
    started: bool,
}

impl ImfPlayer {
    /// Create a player ticking at `base_rate` Hz.
    pub fn with_rate(base_rate: f32) -> Self {
        Self {
            base_rate,
            song: None,
            pos: 0,
            refresh: base_rate,
            started: false,
        }
    }

    /// Create a player with the rate implied by `extension`.
    pub fn for_extension(extension: Option<&str>) -> Self {
        Self::with_rate(rate_for_extension(extension))
    }

    /// Base tick rate in Hz.
    pub fn base_rate(&self) -> f32 {
        self.base_rate
    }

    /// Loaded song, if any.
    pub fn song(&self) -> Option<&ImfSong> {
        self.song.as_ref()
    }

    /// Header and footer text of the loaded song.
    pub fn metadata(&self) -> Option<&ImfMetadata> {
        self.song.as_ref().map(|song| &song.metadata)
    }
}

impl Default for ImfPlayer {
    fn default() -> Self {
        Self::with_rate(WLF_RATE)
    }
}

impl MusicDriver for ImfPlayer {
    fn load(&mut self, data: &[u8]) -> Result<(), LoadError> {
        let song = ImfSong::parse(data)?;
        *self = Self {
            song: Some(song),
            ..Self::with_rate(self.base_rate)
        };
        Ok(())
    }

    fn refresh_rate(&self) -> f32 {
        self.refresh
    }

    fn tick(&mut self, sink: &mut dyn RegisterSink) -> Result<bool, PlaybackError> {
        if !self.started {
            self.rewind(None, sink);
        }
        let Some(song) = self.song.as_ref() else {
            return Ok(false);
        };
        let records = &song.records;

        let mut delay = 0;
        while delay == 0 && self.pos < records.len() {
            let record = records[self.pos];
            sink.write_register(record.register, record.value);
            delay = record.delay;
            self.pos += 1;
        }

        if self.pos >= records.len() {
            log::debug!("IMF song ended after {} record(s)", records.len());
            self.pos = 0;
            return Ok(false);
        }
        self.refresh = self.base_rate / f32::from(delay);
        Ok(true)
    }

    fn rewind(&mut self, _subsong: Option<usize>, sink: &mut dyn RegisterSink) {
        self.pos = 0;
        self.refresh = self.base_rate;
        self.started = true;
        sink.write_register(0x01, 0x20);
    }

    fn format_name(&self) -> &'static str {
        FORMAT_NAME
    }
}

//! ADL file layout.
//!
//! An ADL file is a track table followed by the sound data the driver runs.
//! Three revisions exist and none carries a version field, so the revision is
//! inferred from the value ranges found in the tables:
//!
//! | Version | Track table      | Programs | Instrument table |
//! |---------|------------------|----------|------------------|
//! | 1       | 120 × `u8`       | 150      | sound data + 300 |
//! | 2       | 120 × `u8`       | 250      | sound data + 500 |
//! | 3       | 250 × `u16` LE   | 500      | sound data + 1000 |
//!
//! The sound data starts with the program table (`u16` LE offsets into the
//! sound data), followed by the instrument table and the program streams.

use opl_common::LoadError;

/// Format name used in load errors.
pub const FORMAT_NAME: &str = "ADL";

/// Smallest file accepted at all.
pub const MIN_FILE_SIZE: usize = 720;

/// Byte-sized track table entry marking an unused track.
const NO_TRACK_U8: u8 = 0xFF;

/// Word-sized track table entry marking an unused track.
const NO_TRACK_U16: u16 = 0xFFFF;

/// ADL file revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdlVersion {
    /// Byte track table, 150 programs
    V1,
    /// Byte track table, 250 programs
    V2,
    /// Word track table, 500 programs
    V3,
}

impl AdlVersion {
    /// Revision number (1-3).
    pub fn number(self) -> u8 {
        match self {
            AdlVersion::V1 => 1,
            AdlVersion::V2 => 2,
            AdlVersion::V3 => 3,
        }
    }

    /// Number of program table entries.
    pub fn program_count(self) -> usize {
        match self {
            AdlVersion::V1 => 150,
            AdlVersion::V2 => 250,
            AdlVersion::V3 => 500,
        }
    }

    /// Offset of the instrument table within the sound data.
    pub fn instrument_base(self) -> usize {
        self.program_count() * 2
    }

    /// Size of the track table in bytes.
    pub fn track_table_size(self) -> usize {
        match self {
            AdlVersion::V1 | AdlVersion::V2 => 120,
            AdlVersion::V3 => 500,
        }
    }

    /// Smallest file of this revision.
    pub fn min_file_size(self) -> usize {
        match self {
            AdlVersion::V1 => MIN_FILE_SIZE,
            AdlVersion::V2 => 1120,
            AdlVersion::V3 => 2500,
        }
    }

    /// Infer the revision from the table contents.
    ///
    /// Version 3 track entries are words below 500 (or `0xFFFF`); anything else
    /// in the first 120 bytes means a byte table. Versions 1 and 2 are told
    /// apart by the lowest program offset: at least 600 in version 1 and at
    /// least 1000 in version 2. Offsets below 600 cannot belong to either.
    pub fn detect(data: &[u8]) -> Result<Self, LoadError> {
        if data.len() < MIN_FILE_SIZE {
            return Err(LoadError::TooShort {
                format: FORMAT_NAME,
                actual: data.len(),
                minimum: MIN_FILE_SIZE,
            });
        }

        let words = |start: usize, count: usize| {
            data[start..start + count * 2]
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        };

        if !words(0, 60).any(|w| (500..0xFFFF).contains(&w)) {
            return Ok(AdlVersion::V3);
        }

        let mut version = AdlVersion::V2;
        for w in words(120, 75) {
            if (1..600).contains(&w) {
                return Err(LoadError::invalid(
                    FORMAT_NAME,
                    format!("program offset {w} below the version 1 minimum of 600"),
                ));
            }
            if (1..1000).contains(&w) {
                version = AdlVersion::V1;
            }
        }
        Ok(version)
    }
}

/// A parsed ADL file.
#[derive(Debug, Clone)]
pub struct AdlFile {
    version: AdlVersion,
    tracks: Vec<u16>,
    sound_data: Vec<u8>,
    subsong_count: usize,
}

impl AdlFile {
    /// Parse a complete ADL file.
    pub fn parse(data: &[u8]) -> Result<Self, LoadError> {
        let version = AdlVersion::detect(data)?;
        if data.len() < version.min_file_size() {
            return Err(LoadError::TooShort {
                format: FORMAT_NAME,
                actual: data.len(),
                minimum: version.min_file_size(),
            });
        }

        let (table, sound_data) = data.split_at(version.track_table_size());
        let tracks: Vec<u16> = match version {
            AdlVersion::V1 | AdlVersion::V2 => table
                .iter()
                .map(|&entry| if entry == NO_TRACK_U8 { NO_TRACK_U16 } else { u16::from(entry) })
                .collect(),
            AdlVersion::V3 => table
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        };

        let max_program = version.program_count() - 1;
        let subsong_count = tracks
            .iter()
            .rposition(|&entry| usize::from(entry) <= max_program)
            .map(|last| last + 1)
            .ok_or_else(|| LoadError::invalid(FORMAT_NAME, "track table has no playable entry"))?;

        log::debug!(
            "ADL version {}, {} subsong(s), {} bytes of sound data",
            version.number(),
            subsong_count,
            sound_data.len()
        );

        Ok(Self {
            version,
            tracks,
            sound_data: sound_data.to_vec(),
            subsong_count,
        })
    }

    /// Detected revision.
    pub fn version(&self) -> AdlVersion {
        self.version
    }

    /// Number of subsongs (index of the last playable track plus one).
    pub fn subsong_count(&self) -> usize {
        self.subsong_count
    }

    /// Program started by `track`, or `None` for unused and out-of-range
    /// tracks.
    pub fn program_for(&self, track: usize) -> Option<u16> {
        self.tracks.get(track).copied().filter(|&id| id != NO_TRACK_U16)
    }

    /// The sound data handed to the driver.
    pub fn sound_data(&self) -> &[u8] {
        &self.sound_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v3_file(len: usize) -> Vec<u8> {
        let mut data = vec![0xFF; 500];
        data[0] = 0x00;
        data[1] = 0x00;
        data[2] = 0x05;
        data[3] = 0x00;
        data.resize(len, 0);
        data
    }

    #[test]
    fn test_detect_v3() {
        let data = v3_file(2500);
        assert_eq!(AdlVersion::detect(&data).unwrap(), AdlVersion::V3);
        let file = AdlFile::parse(&data).unwrap();
        assert_eq!(file.subsong_count(), 2);
        assert_eq!(file.program_for(1), Some(5));
        assert_eq!(file.program_for(2), None);
        assert_eq!(file.program_for(400), None);
        assert_eq!(file.sound_data().len(), 2000);
    }

    #[test]
    fn test_v3_minimum_size() {
        let data = v3_file(2000);
        match AdlFile::parse(&data) {
            Err(LoadError::TooShort { minimum, actual, .. }) => {
                assert_eq!(minimum, 2500);
                assert_eq!(actual, 2000);
            }
            other => panic!("expected TooShort, got {other:?}"),
        }
    }

    #[test]
    fn test_detect_v1_and_v2() {
        let mut data = vec![0xFFu8; 120];
        data[0] = 0x00;
        data[1] = 0x02;
        data.resize(1200, 0);
        // Program table of the sound data: offsets of at least 1000
        data[120] = 0xE8;
        data[121] = 0x03;
        assert_eq!(AdlVersion::detect(&data).unwrap(), AdlVersion::V2);

        data[122] = 0x58;
        data[123] = 0x02;
        assert_eq!(AdlVersion::detect(&data).unwrap(), AdlVersion::V1);

        data[124] = 0x10;
        data[125] = 0x00;
        assert!(matches!(
            AdlVersion::detect(&data),
            Err(LoadError::InvalidFormat { format: "ADL", .. })
        ));
    }

    #[test]
    fn test_byte_tracks() {
        let mut data = vec![0xFFu8; 120];
        data[0] = 0x00;
        data[1] = 0x02;
        data[2] = 200;
        data.resize(1200, 0);
        data[120] = 0xE8;
        data[121] = 0x03;
        let file = AdlFile::parse(&data).unwrap();
        assert_eq!(file.version(), AdlVersion::V2);
        // 200 is a valid version 2 program id
        assert_eq!(file.subsong_count(), 3);
        assert_eq!(file.program_for(3), None);
        assert_eq!(file.version().instrument_base(), 500);
    }

    #[test]
    fn test_too_short() {
        let err = AdlFile::parse(&[0u8; 300]).unwrap_err();
        assert_eq!(err.to_string(), "ADL file too short: 300 bytes (minimum 720)");
    }

    #[test]
    fn test_no_playable_track() {
        let mut data = vec![0xFFu8; 500];
        data.resize(2500, 0);
        // Every track entry unused
        assert!(matches!(
            AdlFile::parse(&data),
            Err(LoadError::InvalidFormat { .. })
        ));
    }
}

//! ADL file player.
//!
//! Maps subsongs onto driver programs through the file's track table and
//! drives the interpreter at its fixed 72 Hz rate.

use opl::RegisterSink;
use opl_common::{CorruptProgram, LoadError, MusicDriver, PlaybackError};

use crate::driver::{AdlibDriver, CALLBACKS_PER_SECOND, CONTROL_CHANNEL};
use crate::format::{AdlFile, AdlVersion, FORMAT_NAME};

/// Subsong started when playback begins without an explicit choice.
pub const DEFAULT_SUBSONG: usize = 2;

/// Program bytes patched while a voice program is playing as a subsong.
#[derive(Debug, Clone, Copy)]
struct SfxBackup {
    program: u16,
    priority: u8,
    extra_level: u8,
}

/// Plays ADL files through an [`AdlibDriver`].
///
/// Chip initialisation needs a sink, so it happens on the first
/// [`rewind`](MusicDriver::rewind) or [`tick`](MusicDriver::tick) after
/// [`load`](MusicDriver::load).
#[derive(Default)]
pub struct AdlPlayer {
    driver: AdlibDriver,
    file: Option<AdlFile>,
    current: Option<usize>,
    sfx: Option<SfxBackup>,
    chip_ready: bool,
    pending: Option<CorruptProgram>,
}

impl AdlPlayer {
    /// Create an empty player.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `data` and create a player for it.
    pub fn from_bytes(data: &[u8]) -> Result<Self, LoadError> {
        let mut player = Self::new();
        player.load(data)?;
        Ok(player)
    }

    /// The interpreter.
    pub fn driver(&self) -> &AdlibDriver {
        &self.driver
    }

    /// Mutable access to the interpreter, e.g. to set block flags.
    pub fn driver_mut(&mut self) -> &mut AdlibDriver {
        &mut self.driver
    }

    /// Revision of the loaded file.
    pub fn version(&self) -> Option<AdlVersion> {
        self.file.as_ref().map(AdlFile::version)
    }

    fn ensure_chip(&mut self, sink: &mut dyn RegisterSink) {
        if !self.chip_ready {
            self.driver.init(sink);
            self.chip_ready = true;
        }
    }

    /// Queue the program behind `track`.
    ///
    /// Voice programs played this way start with a reduced priority and a
    /// softer extra level; the original bytes are put back when the next
    /// track starts.
    fn play_track(&mut self, track: usize) -> Result<(), CorruptProgram> {
        let Some(program) = self.file.as_ref().and_then(|file| file.program_for(track)) else {
            log::debug!("ADL track {track} is unused");
            return Ok(());
        };

        if let Some(backup) = self.sfx.take() {
            self.driver.write_program_byte(backup.program, 1, backup.priority)?;
            self.driver.write_program_byte(backup.program, 3, backup.extra_level)?;
        }

        let chan = usize::from(self.driver.read_program_byte(program, 0)?);
        if chan != CONTROL_CHANNEL {
            let priority = self.driver.read_program_byte(program, 1)?;
            let extra_level = self.driver.read_program_byte(program, 3)?;
            self.sfx = Some(SfxBackup {
                program,
                priority,
                extra_level,
            });

            let softened = (((63 - i32::from(extra_level)) * 0xFF) >> 8) & 0xFF;
            self.driver.write_program_byte(program, 3, (63 - softened) as u8)?;
            let lowered = ((i32::from(priority) * 0xFF) >> 8) & 0xFF;
            self.driver.write_program_byte(program, 1, lowered as u8)?;
        }

        self.driver.start_song(program)
    }
}

impl MusicDriver for AdlPlayer {
    fn load(&mut self, data: &[u8]) -> Result<(), LoadError> {
        let file = AdlFile::parse(data)?;
        let mut driver = AdlibDriver::new();
        driver.set_sound_data(file.sound_data().to_vec(), file.version().instrument_base());

        *self = Self {
            driver,
            file: Some(file),
            ..Self::default()
        };
        Ok(())
    }

    fn refresh_rate(&self) -> f32 {
        CALLBACKS_PER_SECOND
    }

    fn tick(&mut self, sink: &mut dyn RegisterSink) -> Result<bool, PlaybackError> {
        if self.file.is_none() {
            return Ok(false);
        }
        if self.current.is_none() {
            self.rewind(None, sink);
        }
        if let Some(err) = self.pending.take() {
            log::warn!("ADL playback stopped: {err}");
            return Err(err.into());
        }

        if let Err(err) = self.driver.tick(sink) {
            log::warn!("ADL playback stopped: {err}");
            return Err(err.into());
        }
        Ok(!self.driver.is_idle())
    }

    /// Restart at `subsong`, or at the current one.
    ///
    /// Every channel is stopped first, including the control channel, so the
    /// new track never competes on priority with the previous one.
    fn rewind(&mut self, subsong: Option<usize>, sink: &mut dyn RegisterSink) {
        if self.file.is_none() {
            return;
        }
        self.ensure_chip(sink);

        let subsong = subsong.or(self.current).unwrap_or(DEFAULT_SUBSONG);
        self.driver.stop_channels(0..=CONTROL_CHANNEL, sink);
        self.pending = None;

        sink.write_register(0x01, 0x20);
        let result = self
            .play_track(subsong)
            .and_then(|()| self.driver.tick(sink));
        self.current = Some(subsong);
        if let Err(err) = result {
            self.pending = Some(err);
        }
    }

    fn subsong_count(&self) -> usize {
        self.file.as_ref().map_or(0, AdlFile::subsong_count)
    }

    fn current_subsong(&self) -> usize {
        self.current.unwrap_or(DEFAULT_SUBSONG)
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

    /// Version 3 file whose track 0 plays program 0 on voice 1 and track 1
    /// plays program 1 on the control channel.
    fn test_file() -> Vec<u8> {
        let mut data = vec![0xFFu8; 500];
        data[0..4].copy_from_slice(&[0x00, 0x00, 0x01, 0x00]);
        let mut sound = vec![0u8; 2000];
        // Program table
        sound[0..2].copy_from_slice(&1200u16.to_le_bytes());
        sound[2..4].copy_from_slice(&1220u16.to_le_bytes());
        // Voice program: priority 0x40, fourth byte (extra level 3) 0x10
        sound[1200..1208].copy_from_slice(&[0x01, 0x40, 0xAB, 0x10, 0x40, 0x08, 0x88, 0x00]);
        // Control program: short rest then stop
        sound[1220..1224].copy_from_slice(&[0x09, 0x10, 0x89, 0x02]);
        sound[1224..1226].copy_from_slice(&[0x88, 0x00]);
        data.extend_from_slice(&sound);
        data
    }

    #[test]
    fn test_load_reports_subsongs() {
        let player = AdlPlayer::from_bytes(&test_file()).unwrap();
        assert_eq!(player.subsong_count(), 2);
        assert_eq!(player.version(), Some(AdlVersion::V3));
        assert_eq!(player.format_name(), "ADL");
        assert_relative_eq!(player.refresh_rate(), 72.0);
    }

    #[test]
    fn test_rewind_initialises_chip_first() {
        let mut player = AdlPlayer::from_bytes(&test_file()).unwrap();
        let mut log = RegisterLog::new();
        player.rewind(Some(0), &mut log);
        let first: Vec<_> = log.writes().take(3).collect();
        assert_eq!(first, vec![(0x01, 0x20), (0x08, 0x00), (0xBD, 0x00)]);
        assert_eq!(player.current_subsong(), 0);
        assert!(player.driver().channels()[1].is_active());
    }

    #[test]
    fn test_voice_program_is_softened_and_restored() {
        let mut player = AdlPlayer::from_bytes(&test_file()).unwrap();
        let mut log = RegisterLog::new();
        player.rewind(Some(0), &mut log);

        let driver = player.driver();
        assert_eq!(driver.read_program_byte(0, 1).unwrap(), 0x3F);
        // 63 - ((63 - 16) * 255 >> 8)
        assert_eq!(driver.read_program_byte(0, 3).unwrap(), 0x11);
        assert_eq!(driver.channels()[1].priority(), 0x3F);

        player.rewind(Some(1), &mut log);
        let driver = player.driver();
        assert_eq!(driver.read_program_byte(0, 1).unwrap(), 0x40);
        assert_eq!(driver.read_program_byte(0, 3).unwrap(), 0x10);
    }

    #[test]
    fn test_rewind_stops_previous_track() {
        let mut player = AdlPlayer::from_bytes(&test_file()).unwrap();
        let mut log = RegisterLog::new();
        player.rewind(Some(0), &mut log);
        assert!(player.driver().channels()[1].is_active());

        player.rewind(Some(1), &mut log);
        let channel = &player.driver().channels()[1];
        assert!(!channel.is_active());
        assert_eq!(channel.priority(), 0);
        assert_eq!(player.current_subsong(), 1);
    }

    #[test]
    fn test_first_tick_rewinds_to_default() {
        let mut player = AdlPlayer::from_bytes(&test_file()).unwrap();
        let mut log = RegisterLog::new();
        // Track 2 is unused, so nothing plays and the song ends at once
        assert!(!player.tick(&mut log).unwrap());
        assert_eq!(player.current_subsong(), DEFAULT_SUBSONG);
        assert_eq!(log.last_value(0x01), Some(0x20));
    }

    #[test]
    fn test_song_ends_when_all_channels_idle() {
        let mut player = AdlPlayer::from_bytes(&test_file()).unwrap();
        let mut log = RegisterLog::new();
        player.rewind(Some(1), &mut log);
        let mut ticks = 0;
        while player.tick(&mut log).unwrap() {
            ticks += 1;
            assert!(ticks < 100, "control program never ended");
        }
        assert!(player.driver().is_idle());
    }

    #[test]
    fn test_corrupt_program_surfaces_on_tick() {
        let mut data = test_file();
        // Point program 1 past the end of the sound data
        data[502..504].copy_from_slice(&0x7000u16.to_le_bytes());
        let mut player = AdlPlayer::from_bytes(&data).unwrap();
        let mut log = RegisterLog::new();
        player.rewind(Some(1), &mut log);
        assert!(matches!(
            player.tick(&mut log),
            Err(PlaybackError::CorruptProgram(CorruptProgram::OutOfBounds { .. }))
        ));
    }

    #[test]
    fn test_empty_player_is_finished() {
        let mut player = AdlPlayer::new();
        let mut log = RegisterLog::new();
        assert!(!player.tick(&mut log).unwrap());
        assert!(log.is_empty());
        assert_eq!(player.subsong_count(), 0);
    }
}

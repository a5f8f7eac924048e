//! WAV file export

use std::path::Path;

use opl::{OplError, Result};

use crate::player::{OplPlayer, PlaybackState};

/// Frames rendered per chunk while exporting.
const EXPORT_CHUNK_FRAMES: usize = 4096;

/// Render `player` from its current position to a 16-bit WAV file.
///
/// Stops when the song ends or after `max_seconds`, whichever comes first.
/// Returns the number of frames written.
///
/// # Examples
///
/// ```ignore
/// use opl_common::export::export_to_wav;
///
/// let frames = export_to_wav(&mut player, "song.wav", 300.0)?;
/// ```
pub fn export_to_wav<P, W>(player: &mut P, output_path: W, max_seconds: f32) -> Result<usize>
where
    P: OplPlayer + ?Sized,
    W: AsRef<Path>,
{
    if !max_seconds.is_finite() || max_seconds <= 0.0 {
        return Err(OplError::ConfigError(format!(
            "invalid export duration {max_seconds}s"
        )));
    }

    let channels = player.channels();
    let sample_rate = player.sample_rate();
    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(output_path.as_ref(), spec).map_err(wav_error)?;

    let max_frames = (f64::from(max_seconds) * f64::from(sample_rate)) as usize;
    let mut buffer = vec![0i16; EXPORT_CHUNK_FRAMES * channels];
    let mut frames_written = 0;

    player.play();
    while frames_written < max_frames && player.state() == PlaybackState::Playing {
        let frames = EXPORT_CHUNK_FRAMES.min(max_frames - frames_written);
        let chunk = &mut buffer[..frames * channels];
        player.generate_samples_into(chunk);
        for &sample in chunk.iter() {
            writer.write_sample(sample).map_err(wav_error)?;
        }
        frames_written += frames;
    }

    writer.finalize().map_err(wav_error)?;
    log::debug!(
        "exported {frames_written} frames to {}",
        output_path.as_ref().display()
    );
    Ok(frames_written)
}

fn wav_error(err: hound::Error) -> OplError {
    match err {
        hound::Error::IoError(io) => OplError::Io(io),
        other => OplError::Io(std::io::Error::other(other.to_string())),
    }
}

//! Register-stream replayers for OPL2 music.
//!
//! IMF and DRO files are recordings of register writes with delays in
//! between; playing them back means replaying the writes at the recorded
//! pace. [`probe`] picks a decoder for unknown input, trying ADL first, then
//! DRO, then IMF.
//!
//! # Example
//!
//! ```no_run
//! use opl::OplSynth;
//! use opl_common::{OplPlayer, Replayer};
//! use opl_raw_replayer::probe;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = std::fs::read("keen.imf")?;
//! let driver = probe(&data, Some("imf"))?;
//! let mut player = Replayer::new(driver, OplSynth::new(44_100), 44_100);
//! player.play();
//! let samples = player.generate_samples(44_100);
//! # let _ = samples;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod dro;
pub mod imf;
mod reader;

pub use dro::{DroHardware, DroMetadata, DroPlayer, DroSong};
pub use imf::{ImfMetadata, ImfPlayer, ImfRecord, ImfSong};

use opl_adl_replayer::AdlPlayer;
use opl_common::{LoadError, MusicDriver};

/// Pick a decoder for `data` and load it.
///
/// Decoders are tried in the order ADL, DRO, IMF; the first one that loads
/// wins. IMF data has no signature, so it is only tried when
/// `extension_hint` names an IMF extension (`imf`, `wlf`) or the data starts
/// with the `ADLIB` header. The hint also selects the IMF tick rate.
pub fn probe(data: &[u8], extension_hint: Option<&str>) -> Result<Box<dyn MusicDriver>, LoadError> {
    let mut attempts = Vec::new();

    match AdlPlayer::from_bytes(data) {
        Ok(player) => return Ok(Box::new(player)),
        Err(err) => attempts.push(err.to_string()),
    }

    let mut dro = DroPlayer::new();
    match dro.load(data) {
        Ok(()) => return Ok(Box::new(dro)),
        Err(err) => attempts.push(err.to_string()),
    }

    if is_imf_candidate(data, extension_hint) {
        let mut imf = ImfPlayer::for_extension(extension_hint);
        match imf.load(data) {
            Ok(()) => return Ok(Box::new(imf)),
            Err(err) => attempts.push(err.to_string()),
        }
    }

    log::debug!("no decoder accepted the input: {}", attempts.join("; "));
    Err(LoadError::Unsupported(format!(
        "{} byte(s){} not recognised as ADL, DRO or IMF",
        data.len(),
        extension_hint.map(|ext| format!(" with extension {ext:?}")).unwrap_or_default()
    )))
}

fn is_imf_candidate(data: &[u8], extension_hint: Option<&str>) -> bool {
    let named = extension_hint
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .is_some_and(|ext| ext == "imf" || ext == "wlf");
    named || data.starts_with(b"ADLIB\x01")
}

//! File-level pipelines: MIDI to raster PNGs and back.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::Result;
use crate::extractor::{extract_instruments, InstrumentNotes};
use crate::image_io::{read_image, to_luminance, write_image};
use crate::midi_writer::write_notes;
use crate::note_event::NoteEvent;
use crate::raster::{decode, encode_instruments, RasterConfig};
use crate::score::Score;

/// Encodes every instrument of a MIDI file, writing
/// `<stem>_<instrument>_<window>.png` next to it. Returns the written paths.
///
/// Instrument names are reduced to file-name-safe characters and made
/// distinct, so every window lands in its own file beside the input.
pub fn encode_file(midi_path: impl AsRef<Path>, config: &RasterConfig) -> Result<Vec<PathBuf>> {
    let midi_path = midi_path.as_ref();
    let score = Score::load(midi_path)?;
    let data = file_labels(extract_instruments(&score));
    info!(
        "{}: {} instruments with notes",
        midi_path.display(),
        data.len()
    );

    let mut written = Vec::new();
    for window in encode_instruments(&data, config)? {
        let path = sibling(
            midi_path,
            &format!("_{}_{}.png", window.instrument, window.index),
        );
        write_image(&path, &window.matrix)?;
        info!("wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

/// Decodes a raster image into note events.
pub fn decode_image(image_path: impl AsRef<Path>, config: &RasterConfig) -> Result<Vec<NoteEvent>> {
    let luminance = to_luminance(read_image(image_path)?)?;
    decode(luminance.view(), config)
}

/// Decodes a raster image and writes `<stem>.mid` next to it.
pub fn decode_file(image_path: impl AsRef<Path>, config: &RasterConfig) -> Result<PathBuf> {
    let image_path = image_path.as_ref();
    let notes = decode_image(image_path, config)?;
    let path = sibling(image_path, ".mid");
    write_notes(&path, &notes)?;
    info!("wrote {} notes to {}", notes.len(), path.display());
    Ok(path)
}

/// Keeps alphanumerics, spaces, `-` and `_`; anything else becomes `_`.
/// Repeated labels get a `_<n>` suffix.
fn file_labels(data: Vec<InstrumentNotes>) -> Vec<InstrumentNotes> {
    let mut used = HashSet::new();
    data.into_iter()
        .map(|(label, notes)| {
            let base: String = label
                .chars()
                .map(|c| {
                    if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();

            let mut name = base.clone();
            let mut n = 1;
            while !used.insert(name.clone()) {
                name = format!("{base}_{n}");
                n += 1;
            }
            if name != label {
                debug!("instrument '{label}' written as '{name}'");
            }
            (name, notes)
        })
        .collect()
}

/// `dir/stem.ext` -> `dir/stem<suffix>`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}"))
}

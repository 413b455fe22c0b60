use log::debug;

use super::{RasterConfig, RasterMatrix, ON};
use crate::error::Result;
use crate::extractor::InstrumentNotes;
use crate::note_event::NoteEvent;

/// One encoded window of one instrument.
#[derive(Debug, Clone)]
pub struct Window {
    pub instrument: String,
    pub index: usize,
    pub matrix: RasterMatrix,
}

/// Lazy sequence of non-empty windows for one instrument. Ends at the
/// repetition cap or at the first window without any sounding cell.
pub struct RasterWindows<'a> {
    notes: &'a [NoteEvent],
    config: &'a RasterConfig,
    index: usize,
    done: bool,
}

impl<'a> RasterWindows<'a> {
    fn new(notes: &'a [NoteEvent], config: &'a RasterConfig) -> Self {
        Self {
            notes,
            config,
            index: 0,
            done: false,
        }
    }
}

pub fn windows<'a>(notes: &'a [NoteEvent], config: &'a RasterConfig) -> Result<RasterWindows<'a>> {
    config.validate()?;
    Ok(RasterWindows::new(notes, config))
}

impl Iterator for RasterWindows<'_> {
    type Item = RasterMatrix;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.config.max_repetitions.is_some_and(|max| self.index >= max) {
            self.done = true;
            return None;
        }

        let matrix = render_window(self.notes, self.config, self.index);
        if matrix.iter().all(|&cell| cell == 0) {
            debug!("window {} is empty, stopping", self.index);
            self.done = true;
            return None;
        }

        self.index += 1;
        Some(matrix)
    }
}

/// Windows of every instrument, labelled, instrument by instrument.
pub fn encode_instruments<'a>(
    data: &'a [InstrumentNotes],
    config: &'a RasterConfig,
) -> Result<impl Iterator<Item = Window> + 'a> {
    config.validate()?;
    Ok(data.iter().flat_map(move |(instrument, notes)| {
        RasterWindows::new(notes, config)
            .enumerate()
            .map(move |(index, matrix)| Window {
                instrument: instrument.clone(),
                index,
                matrix,
            })
    }))
}

fn render_window(notes: &[NoteEvent], config: &RasterConfig, index: usize) -> RasterMatrix {
    let mut matrix = RasterMatrix::zeros(config.shape());
    let rows = config.rows() as i64;
    let length = config.max_song_length as i64;
    let window = index as i64;
    let window_start = window * length;

    for note in notes {
        let start = config.quantize(note.start);
        let end = start.saturating_add(config.quantize(note.duration));

        // Loose neighbourhood test; notes admitted here may still land
        // outside the window and are clipped below.
        if !(start <= window * (length + 1) || end >= window_start) {
            continue;
        }

        let row = (note.pitch - config.lower_bound_note) as i64;
        if !(0..rows).contains(&row) {
            debug!("pitch {} outside the encodable range, clipped", note.pitch);
            continue;
        }

        let from = start.max(window_start);
        let to = end.min(window_start + length);
        for column in from..to {
            matrix[[row as usize, (column - window_start) as usize]] = ON;
        }
    }

    matrix
}

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use ndarray::{ArrayView1, ArrayView2};

use super::{NegativeStartPolicy, RasterConfig, RasterMatrix, THRESHOLD};
use crate::error::{Error, Result};
use crate::note_event::NoteEvent;

/// Pitches sounding in one time column.
pub fn column_notes(column: ArrayView1<f32>, lower_bound_note: i32) -> BTreeSet<i32> {
    column
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > THRESHOLD)
        .map(|(row, _)| row as i32 + lower_bound_note)
        .collect()
}

/// Run-length decodes a luminance raster (rows are pitches, columns are
/// time steps) into note events.
///
/// A note ends on the first column where its row turns off; notes still
/// sounding after the last column are flushed with the matrix end as
/// their end time.
pub fn decode(image: ArrayView2<f32>, config: &RasterConfig) -> Result<Vec<NoteEvent>> {
    config.validate()?;

    let columns = image.ncols();
    let mut notes = Vec::new();
    if columns == 0 {
        return Ok(notes);
    }

    // pitch -> number of consecutive "on" columns so far
    let mut active: BTreeMap<i32, usize> = column_notes(image.column(0), config.lower_bound_note)
        .into_iter()
        .map(|pitch| (pitch, 1))
        .collect();

    for column in 1..columns {
        let on = column_notes(image.column(column), config.lower_bound_note);

        for (&pitch, &run) in active.iter().filter(|(pitch, _)| !on.contains(*pitch)) {
            finish_note(pitch, run, column, config, &mut notes)?;
        }

        active = on
            .into_iter()
            .map(|pitch| (pitch, active.get(&pitch).map_or(1, |run| run + 1)))
            .collect();
    }

    for (pitch, run) in active {
        let duration = run as f64 * config.resolution;
        notes.push(NoteEvent::new(
            pitch,
            (columns - run) as f64 * config.resolution,
            duration,
        ));
    }

    debug!("decoded {} notes from {} columns", notes.len(), columns);
    Ok(notes)
}

/// Decodes a matrix as produced by the encoder.
pub fn decode_raster(matrix: &RasterMatrix, config: &RasterConfig) -> Result<Vec<NoteEvent>> {
    decode(matrix.mapv(f32::from).view(), config)
}

/// Emits a note that stopped sounding at `column`.
fn finish_note(
    pitch: i32,
    run: usize,
    column: usize,
    config: &RasterConfig,
    notes: &mut Vec<NoteEvent>,
) -> Result<()> {
    let duration = run as f64 * config.resolution;
    let start_column = column as i64 - run as i64;
    if start_column >= 0 {
        notes.push(NoteEvent::new(
            pitch,
            start_column as f64 * config.resolution,
            duration,
        ));
        return Ok(());
    }

    let start = start_column as f64 * config.resolution;
    match config.negative_start {
        NegativeStartPolicy::Drop => {
            info!("dropping note {pitch}: start {start}, duration {duration}");
        }
        NegativeStartPolicy::ClampToZero => notes.push(NoteEvent::new(pitch, 0.0, duration)),
        NegativeStartPolicy::Raise => return Err(Error::NegativeStart { pitch, start }),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{windows, ON};
    use approx::assert_relative_eq;

    fn sorted(mut notes: Vec<NoteEvent>) -> Vec<NoteEvent> {
        notes.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));
        notes
    }

    #[test]
    fn test_run_in_middle_of_row() {
        let config = RasterConfig::default();
        let mut matrix = RasterMatrix::zeros((106, 10));
        for c in 2..5 {
            matrix[[7, c]] = ON;
        }

        let notes = decode_raster(&matrix, &config).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 28);
        assert_relative_eq!(notes[0].start, 0.5);
        assert_relative_eq!(notes[0].duration, 0.75);
    }

    #[test]
    fn test_note_at_last_columns_is_flushed() {
        let config = RasterConfig::default();
        let mut matrix = RasterMatrix::zeros((106, 10));
        matrix[[0, 8]] = ON;
        matrix[[0, 9]] = ON;

        let notes = decode_raster(&matrix, &config).unwrap();
        assert_eq!(notes, vec![NoteEvent::new(21, 2.0, 0.5)]);
    }

    #[test]
    fn test_single_column_note_at_time_zero() {
        let config = RasterConfig::default();
        let mut matrix = RasterMatrix::zeros((106, 4));
        matrix[[10, 0]] = ON;

        let notes = decode_raster(&matrix, &config).unwrap();
        assert_eq!(notes, vec![NoteEvent::new(31, 0.0, 0.25)]);
    }

    #[test]
    fn test_repeated_notes_on_one_row() {
        let config = RasterConfig::default();
        let mut matrix = RasterMatrix::zeros((106, 8));
        for c in [0, 1, 4, 5, 6] {
            matrix[[39, c]] = ON;
        }

        let notes = sorted(decode_raster(&matrix, &config).unwrap());
        assert_eq!(
            notes,
            vec![NoteEvent::new(60, 0.0, 0.5), NoteEvent::new(60, 1.0, 0.75)]
        );
    }

    #[test]
    fn test_threshold_is_strictly_above_half() {
        let config = RasterConfig::default();
        let mut image = ndarray::Array2::<f32>::zeros((2, 3));
        image[[0, 1]] = 127.5;
        image[[1, 1]] = 128.0;

        let notes = decode(image.view(), &config).unwrap();
        assert_eq!(notes, vec![NoteEvent::new(22, 0.25, 0.25)]);
    }

    #[test]
    fn test_empty_matrix_decodes_to_nothing() {
        let config = RasterConfig::default();
        assert!(decode_raster(&RasterMatrix::zeros((106, 0)), &config)
            .unwrap()
            .is_empty());
        assert!(decode_raster(&RasterMatrix::zeros((106, 5)), &config)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_round_trip_two_note_chord() {
        let config = RasterConfig::default();
        let input = [NoteEvent::new(60, 0.0, 1.0), NoteEvent::new(64, 0.0, 1.0)];
        let matrices: Vec<_> = windows(&input, &config).unwrap().collect();
        assert_eq!(matrices.len(), 1);

        let notes = sorted(decode_raster(&matrices[0], &config).unwrap());
        assert_eq!(notes, input.to_vec());
    }

    #[test]
    fn test_round_trip_separated_notes() {
        let config = RasterConfig::default();
        let input = vec![
            NoteEvent::new(48, 0.5, 1.5),
            NoteEvent::new(72, 1.0, 0.25),
            NoteEvent::new(55, 3.0, 2.0),
            NoteEvent::new(48, 6.0, 1.0),
        ];
        let matrices: Vec<_> = windows(&input, &config).unwrap().collect();
        let notes = sorted(decode_raster(&matrices[0], &config).unwrap());

        assert_eq!(notes, sorted(input));
    }

    #[test]
    fn test_runs_never_start_before_zero() {
        let config = RasterConfig {
            negative_start: NegativeStartPolicy::Raise,
            ..Default::default()
        };
        let mut matrix = RasterMatrix::zeros((106, 6));
        for c in 0..6 {
            matrix[[0, c]] = ON;
        }
        for c in 0..3 {
            matrix[[1, c]] = ON;
        }
        matrix[[2, 0]] = ON;

        let notes = sorted(decode_raster(&matrix, &config).unwrap());
        assert_eq!(
            notes,
            vec![
                NoteEvent::new(21, 0.0, 1.5),
                NoteEvent::new(22, 0.0, 0.75),
                NoteEvent::new(23, 0.0, 0.25),
            ]
        );
    }

    #[test]
    fn test_negative_start_policies() {
        let config = |negative_start| RasterConfig {
            negative_start,
            ..Default::default()
        };
        let mut notes = Vec::new();

        finish_note(60, 3, 1, &config(NegativeStartPolicy::Drop), &mut notes).unwrap();
        assert!(notes.is_empty());

        finish_note(60, 3, 1, &config(NegativeStartPolicy::ClampToZero), &mut notes).unwrap();
        assert_eq!(notes, vec![NoteEvent::new(60, 0.0, 0.75)]);

        let err = finish_note(60, 3, 1, &config(NegativeStartPolicy::Raise), &mut notes);
        assert!(matches!(err, Err(Error::NegativeStart { pitch: 60, .. })));
    }
}

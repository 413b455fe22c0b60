use log::debug;

use crate::note_event::NoteEvent;
use crate::score::{Partition, Score, ScoreElement};

/// Note events of one instrument, labelled.
pub type InstrumentNotes = (String, Vec<NoteEvent>);

/// Flattens score elements into note events. Rests are skipped and every
/// chord tone takes the chord's own offset and duration.
pub fn get_notes<'a>(elements: impl IntoIterator<Item = &'a ScoreElement>) -> Vec<NoteEvent> {
    let mut notes = Vec::new();
    for element in elements {
        match element {
            ScoreElement::Note {
                pitch,
                offset,
                duration,
            } => notes.push(NoteEvent::new(*pitch, *offset, *duration)),
            ScoreElement::Chord {
                pitches,
                offset,
                duration,
            } => notes.extend(
                pitches
                    .iter()
                    .map(|pitch| NoteEvent::new(*pitch, *offset, *duration)),
            ),
            ScoreElement::Rest { .. } => {}
        }
    }
    notes
}

/// Note events per instrument, in part order. Instruments without any
/// notes are left out.
pub fn extract_instruments(score: &Score) -> Vec<InstrumentNotes> {
    label_partition(score.partition())
}

pub fn label_partition(partition: Partition) -> Vec<InstrumentNotes> {
    match partition {
        Partition::Partitioned(parts) => {
            let mut unnamed = 0;
            let mut data = Vec::new();
            for part in parts {
                let notes = get_notes(&part.elements);
                if notes.is_empty() {
                    continue;
                }

                let label = match part.name {
                    Some(name) => name,
                    None => {
                        let label = format!("instrument_{unnamed}");
                        unnamed += 1;
                        label
                    }
                };
                debug!("{label}: {} note events", notes.len());
                data.push((label, notes));
            }
            data
        }
        Partition::Unpartitioned(elements) => {
            let notes = get_notes(&elements);
            if notes.is_empty() {
                Vec::new()
            } else {
                vec![("instrument_0".to_string(), notes)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::Part;

    fn part(name: Option<&str>, elements: Vec<ScoreElement>) -> Part {
        Part {
            name: name.map(str::to_string),
            programs: vec![],
            elements,
        }
    }

    #[test]
    fn test_chord_expansion_shares_chord_timing() {
        let chord = ScoreElement::Chord {
            pitches: vec![60, 64, 67],
            offset: 4.0,
            duration: 1.0,
        };
        let notes = get_notes([&chord]);

        assert_eq!(
            notes,
            vec![
                NoteEvent::new(60, 4.0, 1.0),
                NoteEvent::new(64, 4.0, 1.0),
                NoteEvent::new(67, 4.0, 1.0),
            ]
        );
    }

    #[test]
    fn test_rests_are_skipped() {
        let elements = vec![
            ScoreElement::Rest {
                offset: 0.0,
                duration: 2.0,
            },
            ScoreElement::Note {
                pitch: 62,
                offset: 2.0,
                duration: 0.5,
            },
        ];
        assert_eq!(get_notes(&elements), vec![NoteEvent::new(62, 2.0, 0.5)]);
    }

    #[test]
    fn test_labels_for_named_and_unnamed_parts() {
        let note = |pitch| ScoreElement::Note {
            pitch,
            offset: 0.0,
            duration: 1.0,
        };
        let rest = ScoreElement::Rest {
            offset: 0.0,
            duration: 1.0,
        };
        let partition = Partition::Partitioned(vec![
            part(None, vec![note(60)]),
            part(Some("Violin"), vec![note(76)]),
            part(None, vec![rest]),
            part(None, vec![note(40)]),
        ]);

        let labels: Vec<String> = label_partition(partition)
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert_eq!(labels, vec!["instrument_0", "Violin", "instrument_1"]);
    }

    #[test]
    fn test_unpartitioned_stream_is_one_instrument() {
        let partition = Partition::Unpartitioned(vec![ScoreElement::Note {
            pitch: 50,
            offset: 1.0,
            duration: 1.0,
        }]);
        let data = label_partition(partition);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].0, "instrument_0");

        assert!(label_partition(Partition::Unpartitioned(vec![])).is_empty());
    }
}

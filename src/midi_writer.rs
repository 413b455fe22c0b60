//! Writes decoded note events back out as a Standard MIDI File.

use std::path::Path;

use log::{debug, warn};
use midly::num::{u15, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};

use crate::error::Result;
use crate::note_event::NoteEvent;

pub const TICKS_PER_QUARTER: u16 = 480;

const PIANO_PROGRAM: u8 = 0;
const VELOCITY: u8 = 64;

/// Builds a single-track piano file from note events.
pub fn notes_to_smf(notes: &[NoteEvent]) -> Smf<'static> {
    let channel = u4::new(0);
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // (tick, is_on, key); offs sort before ons at the same tick
    let mut points: Vec<(u32, bool, u8)> = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        let Ok(key) = u8::try_from(note.pitch) else {
            warn!("pitch {} cannot be written as a MIDI key, skipped", note.pitch);
            continue;
        };
        if key > 127 {
            warn!("pitch {key} cannot be written as a MIDI key, skipped");
            continue;
        }
        let start = to_ticks(note.start);
        let end = to_ticks(note.end());
        if end <= start {
            continue;
        }
        points.push((start, true, key));
        points.push((end, false, key));
    }
    points.sort();

    let mut track: Track<'static> = vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(b"Piano")),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(PIANO_PROGRAM),
                },
            },
        },
    ];

    let mut last_tick = 0;
    for (tick, on, key) in points {
        let message = if on {
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(VELOCITY),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            }
        };
        track.push(TrackEvent {
            delta: u28::new(tick - last_tick),
            kind: TrackEventKind::Midi { channel, message },
        });
        last_tick = tick;
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);

    debug!("built MIDI track with {} events", smf.tracks[0].len());
    smf
}

pub fn write_notes(path: impl AsRef<Path>, notes: &[NoteEvent]) -> Result<()> {
    notes_to_smf(notes).save(path.as_ref())?;
    Ok(())
}

fn to_ticks(quarters: f64) -> u32 {
    (quarters.max(0.0) * TICKS_PER_QUARTER as f64).round() as u32
}

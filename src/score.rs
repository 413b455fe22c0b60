//! Score model read from a Standard MIDI File.
//!
//! Tracks become parts, note-on/note-off pairs become notes, notes that share
//! both start and duration inside a track become chords, and silent gaps
//! become rests. All times are in quarter notes.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEventKind};
use thiserror::Error;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreElement {
    Note {
        pitch: i32,
        offset: f64,
        duration: f64,
    },
    Chord {
        pitches: Vec<i32>,
        offset: f64,
        duration: f64,
    },
    Rest {
        offset: f64,
        duration: f64,
    },
}

impl ScoreElement {
    pub fn offset(&self) -> f64 {
        match self {
            ScoreElement::Note { offset, .. }
            | ScoreElement::Chord { offset, .. }
            | ScoreElement::Rest { offset, .. } => *offset,
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self, ScoreElement::Rest { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Part {
    pub name: Option<String>,
    /// Distinct program numbers seen in the track, in order of appearance.
    pub programs: Vec<u8>,
    pub elements: Vec<ScoreElement>,
}

impl Part {
    pub fn has_notes(&self) -> bool {
        self.elements.iter().any(|e| !e.is_rest())
    }
}

#[derive(Debug, Clone)]
pub struct Score {
    pub sequential: bool,
    pub parts: Vec<Part>,
}

#[derive(Error, Debug, PartialEq)]
pub enum PartitionError {
    #[error("track {track} switches between programs {programs:?}")]
    ProgramSwitch { track: usize, programs: Vec<u8> },

    #[error("sequential MIDI files have no shared timeline")]
    Sequential,
}

/// Outcome of splitting a score by instrument.
#[derive(Debug, Clone)]
pub enum Partition {
    Partitioned(Vec<Part>),
    Unpartitioned(Vec<ScoreElement>),
}

impl Score {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let smf = Smf::parse(data)?;

        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(tpq) => tpq.as_int(),
            Timing::Timecode(_, _) => return Err(Error::UnsupportedTiming),
        };

        debug!(
            "parsing score: {} tracks, {} ticks per quarter",
            smf.tracks.len(),
            ticks_per_quarter
        );

        let parts = smf
            .tracks
            .iter()
            .map(|track| parse_track(track, ticks_per_quarter))
            .collect();

        Ok(Self {
            sequential: smf.header.format == Format::Sequential,
            parts,
        })
    }

    /// Groups parts that play the same program into one part.
    pub fn partition_by_instrument(&self) -> std::result::Result<Vec<Part>, PartitionError> {
        if self.sequential {
            return Err(PartitionError::Sequential);
        }

        let mut groups: Vec<(Option<u8>, Part)> = Vec::new();
        for (track, part) in self.parts.iter().enumerate() {
            if !part.has_notes() {
                continue;
            }
            if part.programs.len() > 1 {
                return Err(PartitionError::ProgramSwitch {
                    track,
                    programs: part.programs.clone(),
                });
            }

            let program = part.programs.first().copied();
            match groups.iter_mut().find(|(p, _)| *p == program) {
                Some((_, group)) => {
                    if group.name.is_none() {
                        group.name = part.name.clone();
                    }
                    group.elements.extend(part.elements.iter().cloned());
                }
                None => groups.push((program, part.clone())),
            }
        }

        Ok(groups
            .into_iter()
            .map(|(_, mut part)| {
                sort_by_offset(&mut part.elements);
                part
            })
            .collect())
    }

    /// Every note and chord of every track on one timeline, rests dropped.
    pub fn flatten(&self) -> Vec<ScoreElement> {
        let mut elements: Vec<ScoreElement> = self
            .parts
            .iter()
            .flat_map(|p| p.elements.iter().filter(|e| !e.is_rest()).cloned())
            .collect();
        sort_by_offset(&mut elements);
        elements
    }

    /// Partition by instrument, falling back to one flattened stream.
    pub fn partition(&self) -> Partition {
        match self.partition_by_instrument() {
            Ok(parts) => Partition::Partitioned(parts),
            Err(e) => {
                log::warn!("instrument partitioning failed ({e}), using a single flattened part");
                Partition::Unpartitioned(self.flatten())
            }
        }
    }
}

fn sort_by_offset(elements: &mut [ScoreElement]) {
    elements.sort_by(|a, b| a.offset().total_cmp(&b.offset()));
}

fn parse_track(track: &Track, ticks_per_quarter: u16) -> Part {
    let mut tick: u64 = 0;
    let mut name = None;
    let mut programs = Vec::new();
    // (channel, key) -> start ticks of sounding notes, oldest first
    let mut sounding: HashMap<(u8, u8), Vec<u64>> = HashMap::new();
    let mut notes: Vec<(u8, u64, u64)> = Vec::new();

    for event in track.iter() {
        tick += event.delta.as_int() as u64;

        match event.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(bytes)) if name.is_none() => {
                let text = String::from_utf8_lossy(bytes).trim().to_string();
                if !text.is_empty() {
                    name = Some(text);
                }
            }
            TrackEventKind::Midi { channel, message } => {
                let ch = channel.as_int();
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        sounding.entry((ch, key.as_int())).or_default().push(tick);
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        let key = key.as_int();
                        match sounding.get_mut(&(ch, key)) {
                            Some(starts) if !starts.is_empty() => {
                                let start = starts.remove(0);
                                notes.push((key, start, tick));
                            }
                            _ => debug!("note off without note on: key {key} at tick {tick}"),
                        }
                    }
                    MidiMessage::ProgramChange { program } => {
                        let program = program.as_int();
                        if !programs.contains(&program) {
                            programs.push(program);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    // notes left hanging end with the track
    for ((_, key), starts) in sounding {
        notes.extend(starts.into_iter().map(|start| (key, start, tick)));
    }

    Part {
        name,
        programs,
        elements: group_elements(notes, ticks_per_quarter),
    }
}

/// Turns (key, start tick, end tick) triples into notes, chords and rests.
fn group_elements(mut notes: Vec<(u8, u64, u64)>, ticks_per_quarter: u16) -> Vec<ScoreElement> {
    let tpq = ticks_per_quarter as f64;
    notes.retain(|&(_, start, end)| end > start);
    notes.sort_by_key(|&(key, start, end)| (start, end, key));

    let mut elements = Vec::new();
    let mut cursor: u64 = 0;
    let mut i = 0;
    while i < notes.len() {
        let (_, start, end) = notes[i];
        let mut j = i;
        while j < notes.len() && notes[j].1 == start && notes[j].2 == end {
            j += 1;
        }

        if start > cursor {
            elements.push(ScoreElement::Rest {
                offset: cursor as f64 / tpq,
                duration: (start - cursor) as f64 / tpq,
            });
        }

        let offset = start as f64 / tpq;
        let duration = (end - start) as f64 / tpq;
        let pitches: Vec<i32> = notes[i..j].iter().map(|&(key, _, _)| key as i32).collect();
        elements.push(if pitches.len() == 1 {
            ScoreElement::Note {
                pitch: pitches[0],
                offset,
                duration,
            }
        } else {
            ScoreElement::Chord {
                pitches,
                offset,
                duration,
            }
        });

        cursor = cursor.max(end);
        i = j;
    }

    elements
}

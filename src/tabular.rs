//! Flat CSV form of a MIDI file: one row per track event.
//!
//! `tick` is the cumulative tick of the event within its track and `time`
//! its delta. Rows of all tracks are merged in tick order. Text payloads of
//! meta events (track names, lyrics, ...) are not carried.
//!
//! A file written by [`midi_to_csv`] opens with a `header` row holding the
//! file's timing (`ticks_per_quarter`, or `frame_rate` and
//! `ticks_per_frame`). Tables without one are rebuilt at
//! [`TICKS_PER_QUARTER`].

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use log::{debug, info};
use midly::num::{u14, u15, u24, u28, u4, u7};
use midly::{
    Format, Fps, Header, MetaMessage, MidiMessage, PitchBend, Smf, SmpteTime, Timing, Track,
    TrackEvent, TrackEventKind,
};

use crate::error::{Error, Result};

/// Ticks per quarter of files rebuilt from a table without a header row.
pub const TICKS_PER_QUARTER: u16 = 480;

/// Row type carrying the file's timing.
const HEADER: &str = "header";

/// Every column a row may fill, in output order.
const COLUMNS: [&str; 30] = [
    "tick",
    "track",
    "meta",
    "type",
    "time",
    "channel",
    "note",
    "velocity",
    "control",
    "value",
    "program",
    "pitch",
    "number",
    "tempo",
    "numerator",
    "denominator",
    "clocks_per_click",
    "notated_32nd_notes_per_beat",
    "key",
    "port",
    "frame_rate",
    "hours",
    "minutes",
    "seconds",
    "frames",
    "sub_frames",
    "type_byte",
    "ticks_per_quarter",
    "ticks_per_frame",
    "data",
];

/// Columns present on every row.
const FIXED: usize = 5;

const MAJOR_KEYS: [&str; 15] = [
    "Cb", "Gb", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#",
];
const MINOR_KEYS: [&str; 15] = [
    "Abm", "Ebm", "Bbm", "Fm", "Cm", "Gm", "Dm", "Am", "Em", "Bm", "F#m", "C#m", "G#m", "D#m",
    "A#m",
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub tick: u64,
    pub track: usize,
    pub meta: bool,
    pub kind: String,
    pub time: u32,
    /// Message-specific columns; absent means null.
    pub fields: BTreeMap<String, String>,
    /// Source line, for error reporting on rows read from CSV.
    pub line: usize,
}

impl Row {
    fn new(tick: u64, track: usize, time: u32, meta: bool, kind: &str) -> Self {
        Self {
            tick,
            track,
            meta,
            kind: kind.to_string(),
            time,
            ..Default::default()
        }
    }

    fn with(mut self, column: &str, value: impl ToString) -> Self {
        self.fields.insert(column.to_string(), value.to_string());
        self
    }

    fn with_data(self, data: &[u8]) -> Self {
        let text = data
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.with("data", text)
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidRow {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn raw(&self, column: &str) -> Result<&str> {
        self.fields
            .get(column)
            .map(String::as_str)
            .ok_or_else(|| self.invalid(format!("{} is missing '{column}'", self.kind)))
    }

    fn int(&self, column: &str, min: i64, max: i64) -> Result<i64> {
        let raw = self.raw(column)?;
        let value =
            parse_int(raw).ok_or_else(|| self.invalid(format!("'{column}' is not an integer: {raw}")))?;
        if !(min..=max).contains(&value) {
            return Err(self.invalid(format!("'{column}' = {value} outside {min}..={max}")));
        }
        Ok(value)
    }

    fn u7(&self, column: &str) -> Result<u7> {
        Ok(u7::new(self.int(column, 0, 127)? as u8))
    }

    fn u8(&self, column: &str) -> Result<u8> {
        Ok(self.int(column, 0, 255)? as u8)
    }

    fn channel(&self) -> Result<u4> {
        Ok(u4::new(self.int("channel", 0, 15)? as u8))
    }

    fn bytes(&self) -> Result<Vec<u8>> {
        let Some(raw) = self.fields.get("data") else {
            return Ok(Vec::new());
        };
        raw.split_whitespace()
            .map(|b| {
                b.parse::<u8>()
                    .map_err(|_| self.invalid(format!("bad data byte '{b}'")))
            })
            .collect()
    }
}

/// Accepts `64` as well as float renderings such as `64.0`.
fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

fn key_name(sharps: i8, minor: bool) -> Option<&'static str> {
    let index = usize::try_from(sharps as i16 + 7).ok()?;
    if minor {
        MINOR_KEYS.get(index).copied()
    } else {
        MAJOR_KEYS.get(index).copied()
    }
}

fn parse_key(name: &str) -> Option<(i8, bool)> {
    let find = |table: &[&str]| table.iter().position(|k| *k == name).map(|i| i as i8 - 7);
    find(&MAJOR_KEYS)
        .map(|sharps| (sharps, false))
        .or_else(|| find(&MINOR_KEYS).map(|sharps| (sharps, true)))
}

fn fps_rate(fps: Fps) -> &'static str {
    match fps {
        Fps::Fps24 => "24",
        Fps::Fps25 => "25",
        Fps::Fps29 => "29.97",
        Fps::Fps30 => "30",
    }
}

fn parse_fps(raw: &str) -> Option<Fps> {
    match raw.trim() {
        "24" | "24.0" => Some(Fps::Fps24),
        "25" | "25.0" => Some(Fps::Fps25),
        "29" | "29.97" => Some(Fps::Fps29),
        "30" | "30.0" => Some(Fps::Fps30),
        _ => None,
    }
}

/// One row per event of every track, stably ordered by tick.
pub fn smf_to_rows(smf: &Smf) -> Vec<Row> {
    let mut rows = Vec::new();

    for (track, events) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        for event in events {
            let time = event.delta.as_int();
            tick += time as u64;
            rows.push(event_row(tick, track, time, event.kind));
        }
    }

    rows.sort_by_key(|row| row.tick);
    rows
}

/// The row recording a file's timing.
pub fn header_row(timing: Timing) -> Row {
    let row = Row::new(0, 0, 0, true, HEADER);
    match timing {
        Timing::Metrical(ticks) => row.with("ticks_per_quarter", ticks.as_int()),
        Timing::Timecode(fps, ticks) => row
            .with("frame_rate", fps_rate(fps))
            .with("ticks_per_frame", ticks),
    }
}

fn row_timing(row: &Row) -> Result<Timing> {
    if row.fields.contains_key("ticks_per_quarter") {
        let ticks = row.int("ticks_per_quarter", 1, 0x7FFF)? as u16;
        return Ok(Timing::Metrical(u15::new(ticks)));
    }
    let fps = parse_fps(row.raw("frame_rate")?)
        .ok_or_else(|| row.invalid("unsupported frame_rate"))?;
    Ok(Timing::Timecode(fps, row.u8("ticks_per_frame")?))
}

fn event_row(tick: u64, track: usize, time: u32, kind: TrackEventKind) -> Row {
    let channel_row = |kind: &str, channel: u4| {
        Row::new(tick, track, time, false, kind).with("channel", channel.as_int())
    };
    let meta_row = |kind: &str| Row::new(tick, track, time, true, kind);

    match kind {
        TrackEventKind::Midi { channel, message } => match message {
            MidiMessage::NoteOff { key, vel } => channel_row("note_off", channel)
                .with("note", key.as_int())
                .with("velocity", vel.as_int()),
            MidiMessage::NoteOn { key, vel } => channel_row("note_on", channel)
                .with("note", key.as_int())
                .with("velocity", vel.as_int()),
            MidiMessage::Aftertouch { key, vel } => channel_row("polytouch", channel)
                .with("note", key.as_int())
                .with("value", vel.as_int()),
            MidiMessage::Controller { controller, value } => channel_row("control_change", channel)
                .with("control", controller.as_int())
                .with("value", value.as_int()),
            MidiMessage::ProgramChange { program } => {
                channel_row("program_change", channel).with("program", program.as_int())
            }
            MidiMessage::ChannelAftertouch { vel } => {
                channel_row("aftertouch", channel).with("value", vel.as_int())
            }
            MidiMessage::PitchBend { bend } => {
                channel_row("pitchwheel", channel).with("pitch", bend.as_int())
            }
        },
        TrackEventKind::SysEx(data) => {
            let data = data.strip_suffix(&[0xF7]).unwrap_or(data);
            Row::new(tick, track, time, false, "sysex").with_data(data)
        }
        TrackEventKind::Escape(data) => Row::new(tick, track, time, false, "escape").with_data(data),
        TrackEventKind::Meta(message) => match message {
            MetaMessage::TrackNumber(number) => {
                let row = meta_row("sequence_number");
                match number {
                    Some(n) => row.with("number", n),
                    None => row,
                }
            }
            MetaMessage::Text(_) => meta_row("text"),
            MetaMessage::Copyright(_) => meta_row("copyright"),
            MetaMessage::TrackName(_) => meta_row("track_name"),
            MetaMessage::InstrumentName(_) => meta_row("instrument_name"),
            MetaMessage::Lyric(_) => meta_row("lyrics"),
            MetaMessage::Marker(_) => meta_row("marker"),
            MetaMessage::CuePoint(_) => meta_row("cue_marker"),
            MetaMessage::ProgramName(_) => meta_row("program_name"),
            MetaMessage::DeviceName(_) => meta_row("device_name"),
            MetaMessage::MidiChannel(channel) => {
                meta_row("channel_prefix").with("channel", channel.as_int())
            }
            MetaMessage::MidiPort(port) => meta_row("midi_port").with("port", port.as_int()),
            MetaMessage::EndOfTrack => meta_row("end_of_track"),
            MetaMessage::Tempo(tempo) => meta_row("set_tempo").with("tempo", tempo.as_int()),
            MetaMessage::SmpteOffset(smpte) => meta_row("smpte_offset")
                .with("frame_rate", fps_rate(smpte.fps()))
                .with("hours", smpte.hour())
                .with("minutes", smpte.minute())
                .with("seconds", smpte.second())
                .with("frames", smpte.frame())
                .with("sub_frames", smpte.subframe()),
            MetaMessage::TimeSignature(numerator, denominator_pow, clocks, notated) => {
                meta_row("time_signature")
                    .with("numerator", numerator)
                    .with("denominator", 1u32 << denominator_pow.min(31))
                    .with("clocks_per_click", clocks)
                    .with("notated_32nd_notes_per_beat", notated)
            }
            MetaMessage::KeySignature(sharps, minor) => {
                let row = meta_row("key_signature");
                match key_name(sharps, minor) {
                    Some(name) => row.with("key", name),
                    None => row,
                }
            }
            MetaMessage::SequencerSpecific(data) => meta_row("sequencer_specific").with_data(data),
            MetaMessage::Unknown(type_byte, data) => meta_row("unknown_meta")
                .with("type_byte", type_byte)
                .with_data(data),
        },
    }
}

/// Writes rows as CSV; optional columns appear only when some row uses them.
pub fn write_rows<W: io::Write>(writer: W, rows: &[Row]) -> Result<()> {
    let columns: Vec<&str> = COLUMNS
        .iter()
        .enumerate()
        .filter(|(i, column)| *i < FIXED || rows.iter().any(|r| r.fields.contains_key(**column)))
        .map(|(_, column)| *column)
        .collect();

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&columns)?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|&column| match column {
                "tick" => row.tick.to_string(),
                "track" => row.track.to_string(),
                "meta" => u8::from(row.meta).to_string(),
                "type" => row.kind.clone(),
                "time" => row.time.to_string(),
                other => row.fields.get(other).cloned().unwrap_or_default(),
            })
            .collect();
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Reads rows back from CSV. Empty cells are treated as null.
pub fn read_rows<R: io::Read>(reader: R) -> Result<Vec<Row>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let mut rows = Vec::new();

    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let mut row = Row {
            line: i + 2,
            ..Default::default()
        };
        for (column, value) in headers.iter().zip(record.iter()) {
            if !value.trim().is_empty() {
                row.fields.insert(column.to_string(), value.trim().to_string());
            }
        }

        row.track = row.int("track", 0, u16::MAX as i64)? as usize;
        row.meta = row.int("meta", 0, 1)? == 1;
        row.kind = row.raw("type")?.to_string();
        row.time = match row.fields.get("time") {
            Some(_) => row.int("time", 0, 0x0FFF_FFFF)? as u32,
            None => 0,
        };
        row.tick = match row.fields.get("tick") {
            Some(_) => row.int("tick", 0, i64::MAX)? as u64,
            None => 0,
        };
        for fixed in &COLUMNS[..FIXED] {
            row.fields.remove(*fixed);
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Rebuilds a track event from a row; `payload` holds the row's data bytes.
fn row_event<'a>(row: &Row, payload: &'a [u8]) -> Result<TrackEventKind<'a>> {
    if !row.meta {
        let midi = |message: MidiMessage| -> Result<TrackEventKind<'a>> {
            Ok(TrackEventKind::Midi {
                channel: row.channel()?,
                message,
            })
        };
        return match row.kind.as_str() {
            "note_off" => midi(MidiMessage::NoteOff {
                key: row.u7("note")?,
                vel: row.u7("velocity")?,
            }),
            "note_on" => midi(MidiMessage::NoteOn {
                key: row.u7("note")?,
                vel: row.u7("velocity")?,
            }),
            "polytouch" => midi(MidiMessage::Aftertouch {
                key: row.u7("note")?,
                vel: row.u7("value")?,
            }),
            "control_change" => midi(MidiMessage::Controller {
                controller: row.u7("control")?,
                value: row.u7("value")?,
            }),
            "program_change" => midi(MidiMessage::ProgramChange {
                program: row.u7("program")?,
            }),
            "aftertouch" => midi(MidiMessage::ChannelAftertouch {
                vel: row.u7("value")?,
            }),
            "pitchwheel" => {
                let pitch = row.int("pitch", -8192, 8191)?;
                midi(MidiMessage::PitchBend {
                    bend: PitchBend(u14::new((pitch + 8192) as u16)),
                })
            }
            "sysex" => Ok(TrackEventKind::SysEx(payload)),
            "escape" => Ok(TrackEventKind::Escape(payload)),
            other => Err(row.invalid(format!("unknown message type '{other}'"))),
        };
    }

    let meta = match row.kind.as_str() {
        "sequence_number" => MetaMessage::TrackNumber(match row.fields.get("number") {
            Some(_) => Some(row.int("number", 0, u16::MAX as i64)? as u16),
            None => None,
        }),
        "text" => MetaMessage::Text(&[]),
        "copyright" => MetaMessage::Copyright(&[]),
        "track_name" => MetaMessage::TrackName(&[]),
        "instrument_name" => MetaMessage::InstrumentName(&[]),
        "lyrics" => MetaMessage::Lyric(&[]),
        "marker" => MetaMessage::Marker(&[]),
        "cue_marker" => MetaMessage::CuePoint(&[]),
        "program_name" => MetaMessage::ProgramName(&[]),
        "device_name" => MetaMessage::DeviceName(&[]),
        "channel_prefix" => MetaMessage::MidiChannel(row.channel()?),
        "midi_port" => MetaMessage::MidiPort(row.u7("port")?),
        "end_of_track" => MetaMessage::EndOfTrack,
        "set_tempo" => MetaMessage::Tempo(u24::new(
            row.int("tempo", 0, 0xFF_FFFF)? as u32,
        )),
        "smpte_offset" => {
            let fps = parse_fps(row.raw("frame_rate")?)
                .ok_or_else(|| row.invalid("unsupported frame_rate"))?;
            let smpte = SmpteTime::new(
                row.u8("hours")?,
                row.u8("minutes")?,
                row.u8("seconds")?,
                row.u8("frames")?,
                row.u8("sub_frames")?,
                fps,
            )
            .ok_or_else(|| row.invalid("SMPTE offset out of range"))?;
            MetaMessage::SmpteOffset(smpte)
        }
        "time_signature" => {
            let denominator = row.int("denominator", 1, 1 << 30)? as u32;
            if !denominator.is_power_of_two() {
                return Err(row.invalid(format!("denominator {denominator} is not a power of two")));
            }
            MetaMessage::TimeSignature(
                row.u8("numerator")?,
                denominator.trailing_zeros() as u8,
                row.u8("clocks_per_click")?,
                row.u8("notated_32nd_notes_per_beat")?,
            )
        }
        "key_signature" => {
            let name = row.raw("key")?;
            let (sharps, minor) =
                parse_key(name).ok_or_else(|| row.invalid(format!("unknown key '{name}'")))?;
            MetaMessage::KeySignature(sharps, minor)
        }
        "sequencer_specific" => MetaMessage::SequencerSpecific(payload),
        "unknown_meta" => MetaMessage::Unknown(row.u8("type_byte")?, payload),
        other => return Err(row.invalid(format!("unknown meta message type '{other}'"))),
    };
    Ok(TrackEventKind::Meta(meta))
}

/// Data bytes of every row, as stored in the file. System exclusive
/// payloads get their terminating 0xF7 back.
pub fn row_payloads(rows: &[Row]) -> Result<Vec<Vec<u8>>> {
    rows.iter()
        .map(|row| {
            let mut data = row.bytes()?;
            if row.kind == "sysex" && !row.meta {
                data.push(0xF7);
            }
            Ok(data)
        })
        .collect()
}

/// Groups rows by track into a multi-track file. Tracks without rows are
/// left out. The timing comes from the header row, if there is one.
pub fn rows_to_smf<'a>(rows: &[Row], payloads: &'a [Vec<u8>]) -> Result<Smf<'a>> {
    let track_count = rows.iter().map(|r| r.track + 1).max().unwrap_or(0);
    let mut tracks: Vec<Track<'a>> = vec![Vec::new(); track_count];
    let mut timing = Timing::Metrical(u15::new(TICKS_PER_QUARTER));

    for (row, payload) in rows.iter().zip(payloads) {
        if row.kind == HEADER {
            timing = row_timing(row)?;
            continue;
        }
        tracks[row.track].push(TrackEvent {
            delta: u28::new(row.time),
            kind: row_event(row, payload)?,
        });
    }

    let mut smf = Smf::new(Header::new(Format::Parallel, timing));
    smf.tracks = tracks.into_iter().filter(|t| !t.is_empty()).collect();
    Ok(smf)
}

/// Converts a MIDI file to its CSV table.
pub fn midi_to_csv(path_in: impl AsRef<Path>, path_out: impl AsRef<Path>) -> Result<()> {
    let data = std::fs::read(path_in.as_ref())?;
    let smf = Smf::parse(&data)?;
    let mut rows = vec![header_row(smf.header.timing)];
    rows.extend(smf_to_rows(&smf));
    debug!("{} tracks, {} rows", smf.tracks.len(), rows.len());

    let file = std::fs::File::create(path_out.as_ref())?;
    write_rows(io::BufWriter::new(file), &rows)?;
    info!(
        "wrote {} rows to {}",
        rows.len(),
        path_out.as_ref().display()
    );
    Ok(())
}

/// Rebuilds a MIDI file from a CSV table written by [`midi_to_csv`].
pub fn csv_to_midi(path_in: impl AsRef<Path>, path_out: impl AsRef<Path>) -> Result<()> {
    let file = std::fs::File::open(path_in.as_ref())?;
    let rows = read_rows(io::BufReader::new(file))?;
    let payloads = row_payloads(&rows)?;
    let smf = rows_to_smf(&rows, &payloads)?;
    smf.save(path_out.as_ref())?;
    info!(
        "wrote {} tracks to {}",
        smf.tracks.len(),
        path_out.as_ref().display()
    );
    Ok(())
}

//! Piano-roll raster codec for MIDI.
//!
//! MIDI files are split into instruments, each instrument's notes are drawn
//! into fixed-width binary pitch/time windows and written as grayscale PNGs.
//! Decoding reads such an image back into notes. A flat CSV form of MIDI
//! files is provided alongside.

pub mod convert;
pub mod error;
pub mod extractor;
pub mod image_io;
pub mod midi_writer;
pub mod note_event;
pub mod raster;
pub mod score;
pub mod tabular;

pub use convert::{decode_file, decode_image, encode_file};
pub use error::{Error, Result};
pub use note_event::NoteEvent;
pub use raster::{NegativeStartPolicy, RasterConfig, RasterMatrix};
pub use tabular::{csv_to_midi, midi_to_csv};

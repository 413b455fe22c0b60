//! Error types for the raster codec and its file collaborators.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI parse error: {0}")]
    Midi(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unsupported image shape {shape:?}, expected (rows, cols) or (rows, cols, 3)")]
    Shape { shape: Vec<usize> },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unsupported MIDI timing format (only metrical timing is supported)")]
    UnsupportedTiming,

    #[error("note {pitch} would start at negative time {start}")]
    NegativeStart { pitch: i32, start: f64 },

    #[error("invalid row {line}: {reason}")]
    InvalidRow { line: usize, reason: String },
}

impl From<midly::Error> for Error {
    fn from(e: midly::Error) -> Self {
        Error::Midi(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Piano-roll raster codec.
//!
//! A raster is a binary pitch-by-time matrix: row `pitch - lower_bound_note`,
//! one column per `resolution` quarter notes, `255` where a note sounds.

mod decoder;
mod encoder;

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;

use crate::error::{Error, Result};

pub use decoder::{decode, decode_raster, column_notes};
pub use encoder::{encode_instruments, windows, RasterWindows, Window};

/// Value written for a sounding cell.
pub const ON: u8 = 255;

/// Cells strictly above this value count as sounding when decoding.
pub const THRESHOLD: f32 = 255.0 / 2.0;

pub type RasterMatrix = Array2<u8>;

/// What to do with a finished note whose start would fall before time zero.
///
/// [`decode`] measures a run from the column it ends on, so a run never
/// reaches back past column 0 and the policy does not fire on any matrix.
/// It is library-only and has no command line flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegativeStartPolicy {
    /// Leave the note out and log it.
    #[default]
    Drop,
    /// Keep the note, starting at zero.
    ClampToZero,
    /// Fail the decode with [`Error::NegativeStart`].
    Raise,
}

impl FromStr for NegativeStartPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "drop" => Ok(Self::Drop),
            "clamp" | "clamp-to-zero" => Ok(Self::ClampToZero),
            "raise" => Ok(Self::Raise),
            other => Err(Error::InvalidConfig(format!(
                "unknown negative start policy '{other}' (expected drop, clamp or raise)"
            ))),
        }
    }
}

impl fmt::Display for NegativeStartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Drop => "drop",
            Self::ClampToZero => "clamp",
            Self::Raise => "raise",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterConfig {
    /// Quarter notes per column.
    pub resolution: f64,
    /// Lowest encodable pitch (inclusive).
    pub lower_bound_note: i32,
    /// Highest encodable pitch (exclusive).
    pub upper_bound_note: i32,
    /// Columns per window.
    pub max_song_length: usize,
    /// Cap on windows per instrument; `None` means unbounded.
    pub max_repetitions: Option<usize>,
    pub negative_start: NegativeStartPolicy,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            resolution: 0.25,
            lower_bound_note: 21,
            upper_bound_note: 127,
            max_song_length: 100,
            max_repetitions: None,
            negative_start: NegativeStartPolicy::Drop,
        }
    }
}

impl RasterConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "resolution must be positive, got {}",
                self.resolution
            )));
        }
        if self.upper_bound_note <= self.lower_bound_note {
            return Err(Error::InvalidConfig(format!(
                "upper bound note {} must be above lower bound note {}",
                self.upper_bound_note, self.lower_bound_note
            )));
        }
        if self.max_song_length == 0 {
            return Err(Error::InvalidConfig(
                "max song length must be at least one column".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of pitch rows in a raster.
    pub fn rows(&self) -> usize {
        (self.upper_bound_note - self.lower_bound_note) as usize
    }

    /// Matrix shape `(rows, columns)` of one window.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.max_song_length)
    }

    /// Time in quarter notes to a column index, truncating toward zero.
    pub fn quantize(&self, time: f64) -> i64 {
        (time / self.resolution) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RasterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.shape(), (106, 100));
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let config = RasterConfig {
            lower_bound_note: 60,
            upper_bound_note: 60,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = RasterConfig {
            resolution: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quantize_truncates() {
        let config = RasterConfig::default();
        assert_eq!(config.quantize(1.0), 4);
        assert_eq!(config.quantize(0.3), 1);
        assert_eq!(config.quantize(0.24), 0);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "clamp".parse::<NegativeStartPolicy>().unwrap(),
            NegativeStartPolicy::ClampToZero
        );
        assert_eq!(NegativeStartPolicy::Raise.to_string(), "raise");
        assert!("ignore".parse::<NegativeStartPolicy>().is_err());
    }
}

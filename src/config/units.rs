//! Quantity Parsing
//!
//! Memory sizes (`8 GB`, `512MB`, `1.5 gb`) and durations (`90s`, `2h`)
//! as they appear in configuration values and task definitions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// Recognized memory suffixes, longest first so `GB` wins over `B`.
const MEMORY_UNITS: &[(&str, u64)] = &[("TB", TB), ("GB", GB), ("MB", MB), ("KB", KB), ("B", 1)];

/// A memory quantity in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemorySize(u64);

impl MemorySize {
    pub const ZERO: MemorySize = MemorySize(0);

    pub fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Parses a quantity with a unit suffix.
    ///
    /// The suffix is mandatory; `"8"` alone is rejected because it is
    /// ambiguous between bytes and gigabytes.
    ///
    /// ```
    /// use nexrunner::config::MemorySize;
    ///
    /// let size = MemorySize::parse("8 GB").unwrap();
    /// assert_eq!(size.bytes(), 8 * 1024 * 1024 * 1024);
    /// ```
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidUnit(text.to_string());

        let trimmed = text.trim();
        let upper = trimmed.to_ascii_uppercase();

        let (number, multiplier) = MEMORY_UNITS
            .iter()
            .find_map(|(suffix, multiplier)| {
                upper
                    .strip_suffix(suffix)
                    .map(|number| (number.trim(), *multiplier))
            })
            .ok_or_else(invalid)?;

        if number.is_empty() {
            return Err(invalid());
        }

        if let Ok(whole) = number.parse::<u64>() {
            return whole.checked_mul(multiplier).map(Self).ok_or_else(invalid);
        }

        let value: f64 = number.parse().map_err(|_| invalid())?;
        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }
        Ok(Self((value * multiplier as f64).round() as u64))
    }
}

impl fmt::Display for MemorySize {
    /// Formats with the largest unit that divides the value exactly.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0 B");
        }
        for (suffix, multiplier) in MEMORY_UNITS {
            if self.0 % multiplier == 0 {
                return write!(f, "{} {}", self.0 / multiplier, suffix);
            }
        }
        write!(f, "{} B", self.0)
    }
}

/// Parses a duration such as `500ms`, `30s`, `10m`, `2h` or `1d`.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "duration".to_string(),
        message: format!("'{}' is not a duration (expected e.g. 30s, 10m, 2h)", text),
    };

    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (number, unit) = trimmed.split_at(split);
    let value: u64 = number.parse().map_err(|_| invalid())?;

    let seconds_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" | "sec" => 1,
        "m" | "min" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        _ => return Err(invalid()),
    };
    let seconds = value
        .checked_mul(seconds_per_unit)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "duration".to_string(),
            message: format!("'{}' is too large", text),
        })?;
    Ok(Duration::from_secs(seconds))
}

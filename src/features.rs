//! Time-of-day and spatial-grid features derived from a single ping.
//!
//! Everything here is a pure function of the ping's own fields.

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ingest::Ping;

/// Decimal places kept when binning coordinates (~100 m at Bangkok's latitude).
pub const GRID_PRECISION: u32 = 3;
const GRID_SCALE: f64 = 1000.0;

/// Time-of-day bucket.
///
/// | Period | Hours               |
/// |--------|---------------------|
/// | DAY    | [10:00, 16:00)      |
/// | NIGHT  | [20:00, 02:00)      |
/// | OTHER  | everything else     |
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimePeriod {
    Day,
    Night,
    Other,
}

impl TimePeriod {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            10..=15 => TimePeriod::Day,
            h if h >= 20 || h < 2 => TimePeriod::Night,
            _ => TimePeriod::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimePeriod::Day => "DAY",
            TimePeriod::Night => "NIGHT",
            TimePeriod::Other => "OTHER",
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAY" => Ok(TimePeriod::Day),
            "NIGHT" => Ok(TimePeriod::Night),
            "OTHER" => Ok(TimePeriod::Other),
            other => Err(format!("unknown time period `{other}`")),
        }
    }
}

/// Late-night window used by the desert detector: [22:00, 04:00).
pub fn is_late_night(hour: u32) -> bool {
    hour >= 22 || hour < 4
}

/// Rounds a coordinate to [`GRID_PRECISION`] decimal places, half away from zero.
pub fn bin_coordinate(value: f64) -> f64 {
    (value * GRID_SCALE).round() / GRID_SCALE
}

/// A grid cell keyed by its scaled integer coordinates, so it can be hashed
/// and ordered without comparing floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCell {
    lat_key: i64,
    lon_key: i64,
}

impl GridCell {
    pub fn from_coordinates(lat: f64, lon: f64) -> Self {
        Self {
            lat_key: (lat * GRID_SCALE).round() as i64,
            lon_key: (lon * GRID_SCALE).round() as i64,
        }
    }

    pub fn lat_bin(&self) -> f64 {
        self.lat_key as f64 / GRID_SCALE
    }

    pub fn lon_bin(&self) -> f64 {
        self.lon_key as f64 / GRID_SCALE
    }
}

/// A ping augmented with its hour, period and grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturedPing {
    pub ping: Ping,
    pub hour: u32,
    pub time_period: TimePeriod,
    pub cell: GridCell,
}

impl FeaturedPing {
    pub fn lat_bin(&self) -> f64 {
        self.cell.lat_bin()
    }

    pub fn lon_bin(&self) -> f64 {
        self.cell.lon_bin()
    }
}

pub fn featurize(ping: Ping) -> FeaturedPing {
    let hour = ping.timestamp.hour();
    FeaturedPing {
        hour,
        time_period: TimePeriod::from_hour(hour),
        cell: GridCell::from_coordinates(ping.lat, ping.lon),
        ping,
    }
}

pub fn featurize_all(pings: Vec<Ping>) -> Vec<FeaturedPing> {
    pings.into_iter().map(featurize).collect()
}

use serde::Serialize;

pub const DEFAULT_MAX_CAPACITY: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccupancyBand {
    Empty,
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Occupancy {
    pub percent: f64,
    pub band: OccupancyBand,
}

impl Occupancy {
    /// Occupancy of a stop holding `capacity` people out of `max_capacity`.
    /// Percent is clamped to `0..=100`.
    pub fn from_capacity(capacity: f64, max_capacity: f64) -> Self {
        let percent = if max_capacity > 0.0 {
            (capacity / max_capacity * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            percent,
            band: band_for(percent),
        }
    }
}

fn band_for(percent: f64) -> OccupancyBand {
    if percent < 25.0 {
        OccupancyBand::Empty
    } else if percent < 50.0 {
        OccupancyBand::Low
    } else if percent < 75.0 {
        OccupancyBand::Moderate
    } else {
        OccupancyBand::High
    }
}

//! Fixed set of query windows.

use crate::core::buckets::Granularity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    LastHour,
    #[serde(rename = "12h")]
    Last12Hours,
    #[serde(rename = "24h")]
    Last24Hours,
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "all")]
    AllTime,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::LastHour,
        Timeframe::Last12Hours,
        Timeframe::Last24Hours,
        Timeframe::Last7Days,
        Timeframe::Last30Days,
        Timeframe::AllTime,
    ];

    /// Length of the window, `None` for all time.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Timeframe::LastHour => Some(Duration::hours(1)),
            Timeframe::Last12Hours => Some(Duration::hours(12)),
            Timeframe::Last24Hours => Some(Duration::hours(24)),
            Timeframe::Last7Days => Some(Duration::days(7)),
            Timeframe::Last30Days => Some(Duration::days(30)),
            Timeframe::AllTime => None,
        }
    }

    /// Inclusive lower bound of the window ending at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration().map(|d| now - d)
    }

    pub fn is_bounded(&self) -> bool {
        self.duration().is_some()
    }

    /// Granularity of the keystroke and word trend series.
    pub fn trend_granularity(&self) -> Granularity {
        match self {
            Timeframe::LastHour => Granularity::FiveMinutes,
            Timeframe::Last12Hours | Timeframe::Last24Hours | Timeframe::Last7Days => {
                Granularity::Hourly
            }
            Timeframe::Last30Days | Timeframe::AllTime => Granularity::Daily,
        }
    }

    /// Granularity of the typing-speed series. Typing statistics are not
    /// persisted below hourly resolution.
    pub fn speed_granularity(&self) -> Granularity {
        self.trend_granularity().max(Granularity::Hourly)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::LastHour => "1h",
            Timeframe::Last12Hours => "12h",
            Timeframe::Last24Hours => "24h",
            Timeframe::Last7Days => "7d",
            Timeframe::Last30Days => "30d",
            Timeframe::AllTime => "all",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.label() == wanted)
            .ok_or_else(|| format!("unknown timeframe '{s}' (expected 1h, 12h, 24h, 7d, 30d or all)"))
    }
}

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UNKNOWN_CATEGORY: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub category: String,
    pub max_mode: String,
    pub input_with_cache_write: u64,
    pub input_without_cache_write: u64,
    pub cache_read: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

impl UsageRecord {
    /// Category label used for aggregation; blank labels fold into "Unknown".
    pub fn category_label(&self) -> &str {
        if self.category.trim().is_empty() {
            UNKNOWN_CATEGORY
        } else {
            &self.category
        }
    }
}

/// Time-zone reference shared by window resolution and bucket keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    #[default]
    Local,
    Utc,
}

impl Zone {
    pub fn wall_clock(self, ts: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Local => ts.with_timezone(&Local).naive_local(),
            Zone::Utc => ts.naive_utc(),
        }
    }

    /// Returns `None` for local times skipped by a DST transition.
    pub fn from_wall_clock(self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Zone::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|d| d.with_timezone(&Utc)),
            Zone::Utc => Some(Utc.from_utc_datetime(&naive)),
        }
    }

    pub fn now(self) -> NaiveDateTime {
        self.wall_clock(Utc::now())
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Zone::Local => "local",
            Zone::Utc => "utc",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeRange {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl TimeRange {
    pub fn as_label(self) -> &'static str {
        match self {
            TimeRange::OneDay => "1d",
            TimeRange::SevenDays => "7d",
            TimeRange::ThirtyDays => "30d",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            TimeRange::OneDay => "Last 24 Hours",
            TimeRange::SevenDays => "Last 7 Days",
            TimeRange::ThirtyDays => "Last 30 Days",
        }
    }

    pub fn granularity(self) -> Granularity {
        match self {
            TimeRange::OneDay => Granularity::Hour,
            TimeRange::SevenDays | TimeRange::ThirtyDays => Granularity::Day,
        }
    }

    /// Days before today's midnight where a daily window starts; `None` for
    /// the hourly range.
    pub fn days_back(self) -> Option<i64> {
        match self {
            TimeRange::OneDay => None,
            TimeRange::SevenDays => Some(6),
            TimeRange::ThirtyDays => Some(29),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn key_format(self) -> &'static str {
        match self {
            Granularity::Hour => "%Y-%m-%dT%H",
            Granularity::Day => "%Y-%m-%d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub granularity: Granularity,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketSummary {
    pub bucket: String,
    pub total_cost: f64,
    pub cost_by_category: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryDetail {
    pub category: String,
    pub count: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketDetail {
    pub bucket: String,
    pub total_requests: u64,
    pub total_cost: f64,
    pub average_cost: f64,
    pub categories: Vec<CategoryDetail>,
}

use crate::error::AppError;
use crate::models::{UsageRecord, Zone};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[async_trait]
pub trait RecordSource: Send + Sync {
    fn describe(&self) -> String;

    async fn load(&self) -> Result<Vec<UsageRecord>, AppError>;
}

/// Usage export on disk, one event per row.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
    zone: Zone,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>, zone: Zone) -> Self {
        Self {
            path: path.into(),
            zone,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for CsvFileSource {
    fn describe(&self) -> String {
        self.path().display().to_string()
    }

    async fn load(&self) -> Result<Vec<UsageRecord>, AppError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            AppError::Input(format!("cannot read '{}': {e}", self.path.display()))
        })?;
        let parsed = parse_records(bytes.as_slice(), self.zone)?;
        if parsed.skipped > 0 {
            warn!(
                file = %self.path.display(),
                skipped = parsed.skipped,
                "dropped rows with a missing date, bad timestamp or invalid cost"
            );
        }
        info!(
            file = %self.path.display(),
            records = parsed.records.len(),
            "loaded usage export"
        );
        Ok(parsed.records)
    }
}

#[derive(Debug, Default)]
pub struct ParsedCsv {
    pub records: Vec<UsageRecord>,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "Date", default)]
    date: Option<String>,
    #[serde(rename = "Kind", default)]
    kind: Option<String>,
    #[serde(rename = "Model", default)]
    model: Option<String>,
    #[serde(rename = "Max Mode", default)]
    max_mode: Option<String>,
    #[serde(rename = "Input (w/ Cache Write)", default)]
    input_with_cache_write: Option<String>,
    #[serde(rename = "Input (w/o Cache Write)", default)]
    input_without_cache_write: Option<String>,
    #[serde(rename = "Cache Read", default)]
    cache_read: Option<String>,
    #[serde(rename = "Output Tokens", default)]
    output_tokens: Option<String>,
    #[serde(rename = "Total Tokens", default)]
    total_tokens: Option<String>,
    #[serde(rename = "Cost", default)]
    cost: Option<String>,
}

pub fn parse_records<R: Read>(reader: R, zone: Zone) -> Result<ParsedCsv, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut parsed = ParsedCsv::default();
    for row in rdr.deserialize::<RawRow>() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                warn!(error = %err, "skipping unreadable row");
                parsed.skipped += 1;
                continue;
            }
        };
        match into_record(row, zone) {
            Some(record) => parsed.records.push(record),
            None => parsed.skipped += 1,
        }
    }
    Ok(parsed)
}

fn into_record(row: RawRow, zone: Zone) -> Option<UsageRecord> {
    let date = row.date.as_deref().filter(|d| !d.is_empty())?;
    let timestamp = parse_timestamp(date, zone)?;
    let cost = parse_cost(row.cost.as_deref())?;

    Some(UsageRecord {
        timestamp,
        kind: row.kind.unwrap_or_default(),
        category: row.model.unwrap_or_default(),
        max_mode: row.max_mode.unwrap_or_default(),
        input_with_cache_write: parse_count(row.input_with_cache_write.as_deref()),
        input_without_cache_write: parse_count(row.input_without_cache_write.as_deref()),
        cache_read: parse_count(row.cache_read.as_deref()),
        output_tokens: parse_count(row.output_tokens.as_deref()),
        total_tokens: parse_count(row.total_tokens.as_deref()),
        cost,
    })
}

/// RFC 3339 stamps carry their own offset; naive stamps are read in `zone`.
pub fn parse_timestamp(raw: &str, zone: Zone) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })?;
    zone.from_wall_clock(naive)
}

fn parse_cost(raw: Option<&str>) -> Option<f64> {
    match raw.map(str::trim) {
        None | Some("") => Some(0.0),
        Some(value) => value.parse::<f64>().ok().filter(|c| c.is_finite()),
    }
}

fn parse_count(raw: Option<&str>) -> u64 {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return 0;
    };
    value
        .parse::<u64>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v.trunc() as u64)
        })
        .unwrap_or(0)
}

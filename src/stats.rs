//! Time-bucketing and aggregation of usage records.
//!
//! All interval math runs on wall-clock `NaiveDateTime` values produced by a
//! single [`Zone`], so the window floors and the bucket keys always agree on
//! where an hour or a day begins.

use crate::error::AppError;
use crate::models::{
    BucketDetail, BucketSummary, CategoryDetail, Granularity, TimeRange, TimeWindow, UsageRecord,
    Zone,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Records of one aggregation call grouped by bucket key, plus every category
/// seen across the whole filtered set.
#[derive(Debug, Default)]
pub struct Grouping<'a> {
    pub buckets: HashMap<String, Vec<&'a UsageRecord>>,
    pub categories: BTreeSet<String>,
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn hour_floor(at: NaiveDateTime) -> NaiveDateTime {
    day_floor(at) + Duration::hours(i64::from(at.hour()))
}

pub fn day_floor(at: NaiveDateTime) -> NaiveDateTime {
    at.date().and_time(NaiveTime::MIN)
}

fn step(granularity: Granularity) -> Duration {
    match granularity {
        Granularity::Hour => Duration::hours(1),
        Granularity::Day => Duration::days(1),
    }
}

pub fn resolve_window(range: TimeRange, now: NaiveDateTime) -> TimeWindow {
    match range.days_back() {
        None => TimeWindow {
            granularity: Granularity::Hour,
            start: hour_floor(now - Duration::hours(24)),
            end: now,
        },
        Some(days) => {
            let today = day_floor(now);
            TimeWindow {
                granularity: Granularity::Day,
                start: today - Duration::days(days),
                end: today,
            }
        }
    }
}

/// Keeps records at or after `window.start`. Daily windows additionally drop
/// anything later than `now`; hourly windows have no upper bound.
pub fn filter_in_window<'a>(
    records: &'a [UsageRecord],
    window: &TimeWindow,
    now: NaiveDateTime,
    zone: Zone,
) -> Vec<&'a UsageRecord> {
    records
        .iter()
        .filter(|r| {
            let at = zone.wall_clock(r.timestamp);
            at >= window.start
                && match window.granularity {
                    Granularity::Hour => true,
                    Granularity::Day => at <= now,
                }
        })
        .collect()
}

pub fn bucket_key_at(at: NaiveDateTime, granularity: Granularity) -> String {
    let floored = match granularity {
        Granularity::Hour => hour_floor(at),
        Granularity::Day => day_floor(at),
    };
    floored.format(granularity.key_format()).to_string()
}

pub fn bucket_key_of(record: &UsageRecord, granularity: Granularity, zone: Zone) -> String {
    bucket_key_at(zone.wall_clock(record.timestamp), granularity)
}

pub fn group<'a>(
    filtered: &[&'a UsageRecord],
    granularity: Granularity,
    zone: Zone,
) -> Grouping<'a> {
    let mut grouping = Grouping::default();
    for record in filtered {
        grouping
            .buckets
            .entry(bucket_key_of(record, granularity, zone))
            .or_default()
            .push(*record);
        grouping
            .categories
            .insert(record.category_label().to_string());
    }
    grouping
}

/// Every bucket key from `window.start` through `window.end` inclusive.
pub fn enumerate_periods(window: &TimeWindow) -> Vec<String> {
    let step = step(window.granularity);
    let mut cursor = match window.granularity {
        Granularity::Hour => hour_floor(window.start),
        Granularity::Day => day_floor(window.start),
    };
    let mut periods = Vec::new();
    while cursor <= window.end {
        periods.push(bucket_key_at(cursor, window.granularity));
        cursor += step;
    }
    periods
}

pub fn build_summaries(periods: &[String], grouping: &Grouping<'_>) -> Vec<BucketSummary> {
    let mut summaries: Vec<BucketSummary> = periods
        .iter()
        .map(|period| {
            let mut totals: BTreeMap<String, f64> = grouping
                .categories
                .iter()
                .map(|c| (c.clone(), 0.0))
                .collect();

            if let Some(items) = grouping.buckets.get(period) {
                for record in items {
                    *totals
                        .entry(record.category_label().to_string())
                        .or_insert(0.0) += record.cost;
                }
            }

            // Total is summed before the per-category values are rounded.
            let total: f64 = totals.values().sum();
            BucketSummary {
                bucket: period.clone(),
                total_cost: round4(total),
                cost_by_category: totals
                    .into_iter()
                    .map(|(category, cost)| (category, round4(cost)))
                    .collect(),
            }
        })
        .collect();

    summaries.sort_by(|a, b| a.bucket.cmp(&b.bucket));
    summaries
}

pub fn process_stats(
    records: &[UsageRecord],
    range: TimeRange,
    now: NaiveDateTime,
    zone: Zone,
) -> Vec<BucketSummary> {
    let window = resolve_window(range, now);
    let filtered = filter_in_window(records, &window, now, zone);
    let grouping = group(&filtered, window.granularity, zone);
    let periods = enumerate_periods(&window);
    debug!(
        range = range.as_label(),
        records = records.len(),
        in_window = filtered.len(),
        buckets = periods.len(),
        categories = grouping.categories.len(),
        "aggregated usage records"
    );
    build_summaries(&periods, &grouping)
}

/// Category names in order of first appearance across the summaries.
pub fn unique_categories(summaries: &[BucketSummary]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut categories = Vec::new();
    for summary in summaries {
        for category in summary.cost_by_category.keys() {
            if seen.insert(category.as_str()) {
                categories.push(category.clone());
            }
        }
    }
    categories
}

pub fn window_total(summaries: &[BucketSummary]) -> f64 {
    round4(summaries.iter().map(|s| s.total_cost).sum())
}

/// Parses a bucket key back into its half-open `[start, end)` span.
pub fn bucket_span(
    bucket: &str,
    granularity: Granularity,
) -> Result<(NaiveDateTime, NaiveDateTime), AppError> {
    let start = match granularity {
        Granularity::Hour => {
            NaiveDateTime::parse_from_str(&format!("{bucket}:00"), "%Y-%m-%dT%H:%M").ok()
        }
        Granularity::Day => NaiveDate::parse_from_str(bucket, "%Y-%m-%d")
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN)),
    };
    let start = start.ok_or_else(|| {
        AppError::Input(format!(
            "Invalid bucket '{bucket}'. Expected {}.",
            match granularity {
                Granularity::Hour => "YYYY-MM-DDTHH",
                Granularity::Day => "YYYY-MM-DD",
            }
        ))
    })?;
    Ok((start, start + step(granularity)))
}

pub fn bucket_detail(
    records: &[UsageRecord],
    bucket: &str,
    granularity: Granularity,
    now: NaiveDateTime,
    zone: Zone,
) -> Result<BucketDetail, AppError> {
    let (start, end) = bucket_span(bucket, granularity)?;

    let mut by_category: BTreeMap<&str, (u64, f64)> = BTreeMap::new();
    let mut total_requests = 0u64;
    let mut total_cost = 0.0;

    for record in records {
        let at = zone.wall_clock(record.timestamp);
        if at < start || at >= end {
            continue;
        }
        if granularity == Granularity::Day && at > now {
            continue;
        }
        let entry = by_category.entry(record.category_label()).or_default();
        entry.0 += 1;
        entry.1 += record.cost;
        total_requests += 1;
        total_cost += record.cost;
    }

    let mut categories: Vec<CategoryDetail> = by_category
        .into_iter()
        .map(|(category, (count, cost))| CategoryDetail {
            category: category.to_string(),
            count,
            cost: round4(cost),
        })
        .collect();
    categories.sort_by(|a, b| {
        b.cost
            .total_cmp(&a.cost)
            .then_with(|| a.category.cmp(&b.category))
    });

    let average_cost = if total_requests == 0 {
        0.0
    } else {
        round4(total_cost / total_requests as f64)
    };

    Ok(BucketDetail {
        bucket: bucket.to_string(),
        total_requests,
        total_cost: round4(total_cost),
        average_cost,
        categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M").expect("valid test timestamp")
    }

    fn record(ts: &str, category: &str, cost: f64) -> UsageRecord {
        UsageRecord {
            timestamp: at(ts).and_utc(),
            kind: "Included".into(),
            category: category.into(),
            max_mode: "No".into(),
            input_with_cache_write: 0,
            input_without_cache_write: 0,
            cache_read: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost,
        }
    }

    fn scenario() -> Vec<UsageRecord> {
        vec![
            record("2025-01-01T10:00", "gpt", 1.5),
            record("2025-01-01T10:30", "claude", 2.0),
            record("2025-01-01T11:15", "gpt", 0.5),
        ]
    }

    fn find<'a>(summaries: &'a [BucketSummary], bucket: &str) -> &'a BucketSummary {
        summaries
            .iter()
            .find(|s| s.bucket == bucket)
            .expect("bucket present")
    }

    #[test]
    fn one_day_window_has_25_hourly_buckets_on_the_hour() {
        let window = resolve_window(TimeRange::OneDay, at("2025-01-01T12:00"));
        assert_eq!(window.granularity, Granularity::Hour);
        assert_eq!(window.start, at("2024-12-31T12:00"));
        let periods = enumerate_periods(&window);
        assert_eq!(periods.len(), 25);
        assert_eq!(periods.first().map(String::as_str), Some("2024-12-31T12"));
        assert_eq!(periods.last().map(String::as_str), Some("2025-01-01T12"));
    }

    #[test]
    fn one_day_window_has_25_hourly_buckets_off_the_hour() {
        let window = resolve_window(TimeRange::OneDay, at("2025-01-01T12:37"));
        assert_eq!(window.start, at("2024-12-31T12:00"));
        assert_eq!(window.end, at("2025-01-01T12:37"));
        assert_eq!(enumerate_periods(&window).len(), 25);
    }

    #[test]
    fn seven_day_window_starts_six_days_before_midnight() {
        let window = resolve_window(TimeRange::SevenDays, at("2025-03-10T15:45"));
        assert_eq!(window.granularity, Granularity::Day);
        assert_eq!(window.start, at("2025-03-04T00:00"));
        assert_eq!(window.end, at("2025-03-10T00:00"));
        let periods = enumerate_periods(&window);
        assert_eq!(
            periods,
            vec![
                "2025-03-04",
                "2025-03-05",
                "2025-03-06",
                "2025-03-07",
                "2025-03-08",
                "2025-03-09",
                "2025-03-10"
            ]
        );
    }

    #[test]
    fn thirty_day_window_spans_month_boundary() {
        let window = resolve_window(TimeRange::ThirtyDays, at("2025-03-10T00:00"));
        assert_eq!(window.start, at("2025-02-09T00:00"));
        let periods = enumerate_periods(&window);
        assert_eq!(periods.len(), 30);
        assert_eq!(periods[0], "2025-02-09");
        assert_eq!(periods[29], "2025-03-10");
    }

    #[test]
    fn degenerate_window_still_yields_one_bucket() {
        let window = TimeWindow {
            granularity: Granularity::Hour,
            start: at("2025-01-01T10:00"),
            end: at("2025-01-01T10:00"),
        };
        assert_eq!(enumerate_periods(&window), vec!["2025-01-01T10"]);
    }

    #[test]
    fn scenario_buckets_match_expected_totals() {
        let summaries = process_stats(
            &scenario(),
            TimeRange::OneDay,
            at("2025-01-01T12:00"),
            Zone::Utc,
        );

        assert_eq!(summaries.len(), 25);
        let ten = find(&summaries, "2025-01-01T10");
        assert_eq!(ten.total_cost, 3.5);
        assert_eq!(ten.cost_by_category["gpt"], 1.5);
        assert_eq!(ten.cost_by_category["claude"], 2.0);

        let eleven = find(&summaries, "2025-01-01T11");
        assert_eq!(eleven.total_cost, 0.5);
        assert_eq!(eleven.cost_by_category["gpt"], 0.5);
        assert_eq!(eleven.cost_by_category["claude"], 0.0);

        let twelve = find(&summaries, "2025-01-01T12");
        assert_eq!(twelve.total_cost, 0.0);
    }

    #[test]
    fn every_bucket_carries_the_same_categories() {
        let summaries = process_stats(
            &scenario(),
            TimeRange::OneDay,
            at("2025-01-01T12:00"),
            Zone::Utc,
        );
        let expected: Vec<&String> = summaries[0].cost_by_category.keys().collect();
        assert_eq!(expected, vec!["claude", "gpt"]);
        for summary in &summaries {
            let keys: Vec<&String> = summary.cost_by_category.keys().collect();
            assert_eq!(keys, expected, "bucket {}", summary.bucket);
        }
    }

    #[test]
    fn totals_match_category_sums() {
        let records = vec![
            record("2025-03-08T01:00", "a", 0.123_44),
            record("2025-03-08T02:00", "b", 0.000_06),
            record("2025-03-09T05:00", "a", 1.0 / 3.0),
            record("2025-03-09T06:00", "c", 2.0 / 3.0),
        ];
        let summaries = process_stats(
            &records,
            TimeRange::SevenDays,
            at("2025-03-10T09:00"),
            Zone::Utc,
        );
        for summary in &summaries {
            let sum: f64 = summary.cost_by_category.values().sum();
            assert!(
                (summary.total_cost - sum).abs() <= 0.0002,
                "bucket {} total {} sum {}",
                summary.bucket,
                summary.total_cost,
                sum
            );
        }
        assert_eq!(find(&summaries, "2025-03-09").total_cost, 1.0);
    }

    #[test]
    fn empty_buckets_are_zero_filled() {
        let summaries = process_stats(
            &scenario(),
            TimeRange::OneDay,
            at("2025-01-01T12:00"),
            Zone::Utc,
        );
        let quiet = find(&summaries, "2025-01-01T03");
        assert_eq!(quiet.total_cost, 0.0);
        assert!(quiet.cost_by_category.values().all(|c| *c == 0.0));
        assert_eq!(quiet.cost_by_category.len(), 2);
    }

    #[test]
    fn empty_input_still_produces_full_sequence() {
        let summaries = process_stats(&[], TimeRange::ThirtyDays, at("2025-03-10T09:00"), Zone::Utc);
        assert_eq!(summaries.len(), 30);
        assert!(summaries
            .iter()
            .all(|s| s.total_cost == 0.0 && s.cost_by_category.is_empty()));
        assert!(unique_categories(&summaries).is_empty());
    }

    #[test]
    fn blank_category_is_aggregated_as_unknown() {
        let records = vec![
            record("2025-01-01T10:00", "", 0.25),
            record("2025-01-01T10:10", "   ", 0.25),
            record("2025-01-01T11:00", "gpt", 1.0),
        ];
        let summaries =
            process_stats(&records, TimeRange::OneDay, at("2025-01-01T12:00"), Zone::Utc);
        let ten = find(&summaries, "2025-01-01T10");
        assert_eq!(ten.cost_by_category["Unknown"], 0.5);
        let eleven = find(&summaries, "2025-01-01T11");
        assert_eq!(eleven.cost_by_category["Unknown"], 0.0);
        assert_eq!(unique_categories(&summaries), vec!["Unknown", "gpt"]);
    }

    #[test]
    fn output_is_strictly_ascending() {
        let records = vec![
            record("2025-03-09T23:59", "a", 1.0),
            record("2025-03-04T00:00", "b", 1.0),
            record("2025-03-06T12:00", "a", 1.0),
        ];
        let summaries = process_stats(
            &records,
            TimeRange::SevenDays,
            at("2025-03-10T08:00"),
            Zone::Utc,
        );
        assert!(summaries.windows(2).all(|w| w[0].bucket < w[1].bucket));
    }

    #[test]
    fn build_summaries_sorts_unordered_periods() {
        let grouping = Grouping::default();
        let periods = vec!["2025-01-02".to_string(), "2025-01-01".to_string()];
        let summaries = build_summaries(&periods, &grouping);
        assert_eq!(summaries[0].bucket, "2025-01-01");
        assert_eq!(summaries[1].bucket, "2025-01-02");
    }

    #[test]
    fn daily_filter_is_inclusive_at_start_and_bounded_by_now() {
        let now = at("2025-03-10T08:00");
        let window = resolve_window(TimeRange::SevenDays, now);
        let records = vec![
            record("2025-03-03T23:59", "old", 1.0),
            record("2025-03-04T00:00", "edge", 1.0),
            record("2025-03-10T08:00", "now", 1.0),
            record("2025-03-10T08:01", "future", 1.0),
        ];
        let kept: Vec<&str> = filter_in_window(&records, &window, now, Zone::Utc)
            .iter()
            .map(|r| r.category.as_str())
            .collect();
        assert_eq!(kept, vec!["edge", "now"]);
    }

    #[test]
    fn hourly_filter_has_no_upper_bound() {
        let now = at("2025-01-01T12:00");
        let window = resolve_window(TimeRange::OneDay, now);
        let records = vec![
            record("2024-12-31T11:59", "old", 1.0),
            record("2024-12-31T12:00", "edge", 1.0),
            record("2025-01-01T14:00", "future", 1.0),
        ];
        let kept: Vec<&str> = filter_in_window(&records, &window, now, Zone::Utc)
            .iter()
            .map(|r| r.category.as_str())
            .collect();
        assert_eq!(kept, vec!["edge", "future"]);

        // A future record contributes a column but no bucket of its own.
        let summaries = process_stats(&records, TimeRange::OneDay, now, Zone::Utc);
        assert_eq!(summaries.len(), 25);
        assert!(summaries.iter().all(|s| s.cost_by_category.contains_key("future")));
        assert!(summaries.iter().all(|s| s.cost_by_category["future"] == 0.0));
    }

    #[test]
    fn bucket_keys_follow_granularity() {
        let r = record("2025-01-01T09:59", "gpt", 1.0);
        assert_eq!(bucket_key_of(&r, Granularity::Hour, Zone::Utc), "2025-01-01T09");
        assert_eq!(bucket_key_of(&r, Granularity::Day, Zone::Utc), "2025-01-01");
    }

    #[test]
    fn grouping_collects_categories_globally() {
        let records = scenario();
        let refs: Vec<&UsageRecord> = records.iter().collect();
        let grouping = group(&refs, Granularity::Hour, Zone::Utc);
        assert_eq!(grouping.buckets.len(), 2);
        assert_eq!(grouping.buckets["2025-01-01T10"].len(), 2);
        assert_eq!(
            grouping.categories.iter().collect::<Vec<_>>(),
            vec!["claude", "gpt"]
        );
    }

    #[test]
    fn values_are_rounded_to_four_decimals() {
        assert_eq!(round4(0.123_46), 0.1235);
        assert_eq!(round4(1.000_04), 1.0);
        let records = vec![
            record("2025-01-01T10:00", "gpt", 0.000_04),
            record("2025-01-01T10:05", "gpt", 0.000_04),
        ];
        let summaries =
            process_stats(&records, TimeRange::OneDay, at("2025-01-01T12:00"), Zone::Utc);
        assert_eq!(find(&summaries, "2025-01-01T10").total_cost, 0.0001);
    }

    #[test]
    fn bucket_total_is_rounded_after_summing_raw_category_costs() {
        let records = vec![
            record("2025-01-01T10:00", "gpt", 0.000_04),
            record("2025-01-01T10:05", "claude", 0.000_04),
        ];
        let summaries =
            process_stats(&records, TimeRange::OneDay, at("2025-01-01T12:00"), Zone::Utc);
        let bucket = find(&summaries, "2025-01-01T10");
        assert_eq!(bucket.cost_by_category["gpt"], 0.0);
        assert_eq!(bucket.cost_by_category["claude"], 0.0);
        assert_eq!(bucket.total_cost, 0.0001);
    }

    #[test]
    fn padded_labels_stay_distinct_and_blank_ones_are_unknown() {
        let records = vec![
            record("2025-01-01T10:00", "gpt", 1.0),
            record("2025-01-01T10:05", "gpt ", 2.0),
            record("2025-01-01T10:10", "   ", 0.5),
        ];
        let summaries =
            process_stats(&records, TimeRange::OneDay, at("2025-01-01T12:00"), Zone::Utc);
        let bucket = find(&summaries, "2025-01-01T10");
        assert_eq!(bucket.cost_by_category["gpt"], 1.0);
        assert_eq!(bucket.cost_by_category["gpt "], 2.0);
        assert_eq!(bucket.cost_by_category["Unknown"], 0.5);
    }

    #[test]
    fn hourly_range_has_no_daily_offset() {
        assert_eq!(TimeRange::OneDay.days_back(), None);
        assert_eq!(TimeRange::SevenDays.days_back(), Some(6));
        assert_eq!(TimeRange::ThirtyDays.days_back(), Some(29));
    }

    #[test]
    fn window_total_sums_bucket_totals() {
        let summaries = process_stats(
            &scenario(),
            TimeRange::OneDay,
            at("2025-01-01T12:00"),
            Zone::Utc,
        );
        assert_eq!(window_total(&summaries), 4.0);
    }

    #[test]
    fn bucket_detail_counts_requests_per_category() {
        let detail = bucket_detail(
            &scenario(),
            "2025-01-01T10",
            Granularity::Hour,
            at("2025-01-01T12:00"),
            Zone::Utc,
        )
        .expect("detail");
        assert_eq!(detail.total_requests, 2);
        assert_eq!(detail.total_cost, 3.5);
        assert_eq!(detail.average_cost, 1.75);
        assert_eq!(detail.categories.len(), 2);
        assert_eq!(detail.categories[0].category, "claude");
        assert_eq!(detail.categories[0].count, 1);
        assert_eq!(detail.categories[1].category, "gpt");
        assert_eq!(detail.categories[1].cost, 1.5);
    }

    #[test]
    fn bucket_detail_for_empty_bucket_has_zero_average() {
        let detail = bucket_detail(
            &scenario(),
            "2025-01-01",
            Granularity::Day,
            at("2025-01-01T10:15"),
            Zone::Utc,
        )
        .expect("detail");
        // Only the 10:00 record is at or before `now`.
        assert_eq!(detail.total_requests, 1);

        let empty = bucket_detail(
            &scenario(),
            "2024-12-30",
            Granularity::Day,
            at("2025-01-01T12:00"),
            Zone::Utc,
        )
        .expect("detail");
        assert_eq!(empty.total_requests, 0);
        assert_eq!(empty.average_cost, 0.0);
        assert!(empty.categories.is_empty());
    }

    #[test]
    fn bucket_detail_rejects_mismatched_keys() {
        let err = bucket_detail(
            &scenario(),
            "2025-01-01",
            Granularity::Hour,
            at("2025-01-01T12:00"),
            Zone::Utc,
        )
        .expect_err("day key is not an hour key");
        assert!(err.to_string().contains("Invalid bucket '2025-01-01'"));

        assert!(bucket_span("2025-01-01T10", Granularity::Day).is_err());
        assert!(bucket_span("yesterday", Granularity::Day).is_err());
    }
}

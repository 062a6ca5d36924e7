//! Small helpers for putting upstream series onto a common daily axis and
//! deriving the headline numbers shown next to charts.

use std::collections::BTreeMap;

use crate::{
    data::{
        bucket::bucket,
        domain::{Granularity, NamedSeries, TimePoint, Timestamp},
    },
    error::ChartweaveResult,
};

/// Raw timestamps above this are taken to be milliseconds.
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Converts a millisecond timestamp to seconds; seconds pass through.
pub fn normalize_timestamp(raw: i64) -> Timestamp {
    if raw > MILLIS_THRESHOLD {
        Timestamp(raw / 1000)
    } else {
        Timestamp(raw)
    }
}

/// How [`collapse_daily`] reduces several observations on one UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DailyCollapse {
    /// Keep the latest observation of the day. Right for stock metrics like TVL.
    #[default]
    Last,
    /// Sum every observation of the day. Right for flow metrics like volume.
    Sum,
}

/// One point per UTC day, stamped at the day's midnight.
pub fn collapse_daily(points: &[TimePoint], mode: DailyCollapse) -> ChartweaveResult<Vec<TimePoint>> {
    match mode {
        DailyCollapse::Sum => bucket(points, Granularity::Daily),
        DailyCollapse::Last => {
            let mut days: BTreeMap<Timestamp, &TimePoint> = BTreeMap::new();
            for p in points {
                let day = p.timestamp.day_start();
                if days.get(&day).is_none_or(|seen| seen.timestamp <= p.timestamp) {
                    days.insert(day, p);
                }
            }
            Ok(days
                .into_iter()
                .map(|(day, p)| TimePoint {
                    timestamp: day,
                    values: p.values.clone(),
                })
                .collect())
        }
    }
}

/// Drops every point on or after the start of `now`'s UTC day.
pub fn filter_out_today(points: &[TimePoint], now: Timestamp) -> Vec<TimePoint> {
    let today = now.day_start();
    points
        .iter()
        .filter(|p| p.timestamp < today)
        .cloned()
        .collect()
}

/// Pointwise sum of the first field across `series`, ascending by timestamp.
pub fn sum_by_timestamp(series: &[NamedSeries]) -> Vec<TimePoint> {
    let mut acc: BTreeMap<Timestamp, f64> = BTreeMap::new();
    for p in series.iter().flat_map(|s| &s.points) {
        *acc.entry(p.timestamp).or_insert(0.0) += p.value().unwrap_or(0.0);
    }
    into_points(acc)
}

/// Pointwise `a - b` on the first field. A side missing a timestamp counts as zero.
pub fn subtract(a: &[TimePoint], b: &[TimePoint]) -> Vec<TimePoint> {
    let mut acc: BTreeMap<Timestamp, f64> = a
        .iter()
        .map(|p| (p.timestamp, p.value().unwrap_or(0.0)))
        .collect();
    for p in b {
        *acc.entry(p.timestamp).or_insert(0.0) -= p.value().unwrap_or(0.0);
    }
    into_points(acc)
}

/// Percentage change from `prev` to `now`; `None` when undefined.
pub fn percent_change(now: Option<f64>, prev: Option<f64>) -> Option<f64> {
    let (now, prev) = (now?, prev?);
    let change = (now - prev) / prev * 100.0;
    change.is_finite().then_some(change)
}

/// First field of the point `days` positions before the last one.
pub fn value_days_before(points: &[TimePoint], days: usize) -> Option<f64> {
    let index = points.len().checked_sub(days.checked_add(1)?)?;
    points[index].value()
}

/// Share of `total` held by `value`, in percent with two decimals.
pub fn dominance_percent(value: f64, total: f64) -> f64 {
    if value == 0.0 || !value.is_finite() || total.is_nan() || total <= 0.0 {
        return 0.0;
    }
    (value / total * 10_000.0).round() / 100.0
}

fn into_points(acc: BTreeMap<Timestamp, f64>) -> Vec<TimePoint> {
    acc.into_iter()
        .map(|(ts, v)| TimePoint::scalar(ts.0, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(pairs: &[(i64, f64)]) -> Vec<TimePoint> {
        pairs.iter().map(|&(t, v)| TimePoint::scalar(t, v)).collect()
    }

    #[test]
    fn millisecond_timestamps_are_scaled_down() {
        assert_eq!(normalize_timestamp(1_700_000_000_000), Timestamp(1_700_000_000));
        assert_eq!(normalize_timestamp(1_700_000_000), Timestamp(1_700_000_000));
    }

    #[test]
    fn collapse_daily_last_keeps_the_latest_observation() {
        let input = pts(&[(100, 1.0), (50_000, 2.0), (90_000, 7.0)]);
        let out = collapse_daily(&input, DailyCollapse::Last).unwrap();
        assert_eq!(out, pts(&[(0, 2.0), (86_400, 7.0)]));
    }

    #[test]
    fn collapse_daily_sum_adds_observations() {
        let input = pts(&[(100, 1.0), (50_000, 2.0), (90_000, 7.0)]);
        let out = collapse_daily(&input, DailyCollapse::Sum).unwrap();
        assert_eq!(out, pts(&[(0, 3.0), (86_400, 7.0)]));
    }

    #[test]
    fn today_is_filtered_out() {
        let input = pts(&[(0, 1.0), (86_400, 2.0), (172_800, 3.0)]);
        let now = Timestamp(172_800 + 3_600);
        assert_eq!(filter_out_today(&input, now), pts(&[(0, 1.0), (86_400, 2.0)]));
    }

    #[test]
    fn sum_and_subtract_treat_missing_as_zero() {
        let a = NamedSeries::from_pairs("a", [(1, 10.0), (2, 20.0)]);
        let b = NamedSeries::from_pairs("b", [(2, 5.0), (3, 1.0)]);

        let total = sum_by_timestamp(&[a.clone(), b.clone()]);
        assert_eq!(total, pts(&[(1, 10.0), (2, 25.0), (3, 1.0)]));

        let diff = subtract(&a.points, &b.points);
        assert_eq!(diff, pts(&[(1, 10.0), (2, 15.0), (3, -1.0)]));
    }

    #[test]
    fn percent_change_is_none_for_zero_or_missing_base() {
        assert!((percent_change(Some(110.0), Some(100.0)).unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(percent_change(Some(1.0), Some(0.0)), None);
        assert_eq!(percent_change(None, Some(1.0)), None);
        assert_eq!(percent_change(Some(1.0), None), None);
    }

    #[test]
    fn value_days_before_counts_back_from_the_last_point() {
        let input = pts(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        assert_eq!(value_days_before(&input, 0), Some(3.0));
        assert_eq!(value_days_before(&input, 2), Some(1.0));
        assert_eq!(value_days_before(&input, 3), None);
        assert_eq!(value_days_before(&input, usize::MAX), None);
    }

    #[test]
    fn dominance_is_rounded_to_two_decimals() {
        assert_eq!(dominance_percent(1.0, 3.0), 33.33);
        assert_eq!(dominance_percent(5.0, 0.0), 0.0);
        assert_eq!(dominance_percent(0.0, 10.0), 0.0);
    }
}

// ================================================================================================
// Domain Strong Types (NewTypes)
// ================================================================================================

use std::fmt;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, SeqAccess, Visitor},
    ser::SerializeSeq,
};
use smallvec::SmallVec;
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::{
    error::{ChartweaveResult, DataError},
    impl_from_primitive, impl_string_newtype,
};

const SECONDS_PER_DAY: i64 = 86_400;

/// UTC timestamp in **seconds** since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);
impl_from_primitive!(Timestamp, i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn to_datetime(self) -> ChartweaveResult<DateTime<Utc>> {
        DateTime::from_timestamp(self.0, 0)
            .ok_or_else(|| DataError::TimestampOutOfRange(self.0).into())
    }

    /// Start of the UTC day containing this timestamp.
    pub fn day_start(self) -> Self {
        Self(self.0 - self.0.rem_euclid(SECONDS_PER_DAY))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of one column in a joined chart (a chain, a protocol, "Deposits", ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Label(pub String);
impl_string_newtype!(Label);

/// Label of the synthetic series that collects every category outside the top K.
pub const OTHERS_LABEL: &str = "Others";

// ================================================================================================
// Time Points & Series
// ================================================================================================

/// Field values of a single [`TimePoint`]. Most series carry one or two fields.
pub type Fields = SmallVec<[f64; 4]>;

/// One observation: a timestamp and an ordered sequence of numeric fields.
///
/// Serialized as the chart tuple `[timestamp, v0, v1, ...]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimePoint {
    pub timestamp: Timestamp,
    pub values: Fields,
}

impl TimePoint {
    pub fn new(timestamp: i64, values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            timestamp: Timestamp(timestamp),
            values: values.into_iter().collect(),
        }
    }

    /// Single-field point, the common `[timestamp, value]` shape.
    pub fn scalar(timestamp: i64, value: f64) -> Self {
        Self::new(timestamp, [value])
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    /// The first field, which is what joins and rankings operate on.
    pub fn value(&self) -> Option<f64> {
        self.values.first().copied()
    }

    pub fn field(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }
}

impl Serialize for TimePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1 + self.values.len()))?;
        seq.serialize_element(&self.timestamp)?;
        for v in &self.values {
            seq.serialize_element(v)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TimePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TupleVisitor;

        impl<'de> Visitor<'de> for TupleVisitor {
            type Value = TimePoint;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [timestamp, value, ...] tuple")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TimePoint, A::Error> {
                let timestamp: Timestamp = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let mut values = Fields::new();
                while let Some(v) = seq.next_element::<f64>()? {
                    values.push(v);
                }
                Ok(TimePoint { timestamp, values })
            }
        }

        deserializer.deserialize_seq(TupleVisitor)
    }
}

/// A labeled, ascending sequence of [`TimePoint`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NamedSeries {
    pub label: Label,
    pub points: Vec<TimePoint>,
}

impl NamedSeries {
    pub fn new(label: impl Into<Label>, points: Vec<TimePoint>) -> Self {
        Self {
            label: label.into(),
            points,
        }
    }

    /// Builds a single-field series from `(timestamp, value)` pairs.
    pub fn from_pairs(label: impl Into<Label>, pairs: impl IntoIterator<Item = (i64, f64)>) -> Self {
        Self::new(
            label,
            pairs
                .into_iter()
                .map(|(ts, v)| TimePoint::scalar(ts, v))
                .collect(),
        )
    }

    /// Sum of the first field over all points.
    pub fn total(&self) -> f64 {
        self.points.iter().filter_map(TimePoint::value).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.points.last().and_then(TimePoint::value)
    }
}

// ================================================================================================
// Granularity
// ================================================================================================

/// Width of a time bucket. All bucket boundaries are computed in UTC.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
    EnumIter,
    EnumCount,
    Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Granularity {
    /// Midnight UTC.
    #[default]
    Daily,
    /// Monday 00:00 UTC (ISO week).
    Weekly,
    /// First calendar day of the month.
    Monthly,
    /// First day of January, April, July or October.
    Quarterly,
}

impl Granularity {
    /// Start of the bucket containing `ts`.
    pub fn bucket_start(self, ts: Timestamp) -> ChartweaveResult<Timestamp> {
        let day = ts.to_datetime()?.date_naive();
        let start = match self {
            Self::Daily => day,
            Self::Weekly => {
                day - chrono::Duration::days(i64::from(day.weekday().num_days_from_monday()))
            }
            Self::Monthly => first_of_month(day.year(), day.month(), ts)?,
            Self::Quarterly => first_of_month(day.year(), ((day.month() - 1) / 3) * 3 + 1, ts)?,
        };
        Ok(midnight(start))
    }

    /// Start of the bucket following the one that starts at `start`.
    pub fn next_bucket(self, start: Timestamp) -> ChartweaveResult<Timestamp> {
        let day = start.to_datetime()?.date_naive();
        let next = match self {
            Self::Daily => day.checked_add_days(chrono::Days::new(1)),
            Self::Weekly => day.checked_add_days(chrono::Days::new(7)),
            Self::Monthly => day.checked_add_months(Months::new(1)),
            Self::Quarterly => day.checked_add_months(Months::new(3)),
        };
        next.map(midnight)
            .ok_or_else(|| DataError::TimestampOutOfRange(start.0).into())
    }
}

fn first_of_month(year: i32, month: u32, ts: Timestamp) -> ChartweaveResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| DataError::TimestampOutOfRange(ts.0).into())
}

fn midnight(day: NaiveDate) -> Timestamp {
    Timestamp(day.and_time(chrono::NaiveTime::MIN).and_utc().timestamp())
}

// ================================================================================================
// Entities
// ================================================================================================

/// Kind of dashboard page an entity belongs to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    Chain,
    Protocol,
    Bridge,
    Stablecoin,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// URL-safe identifier: lowercase, spaces become dashes, apostrophes are dropped.
pub fn slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .replace('\'', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-17 is a Wednesday.
    const WED_2024_01_17_1530: i64 = 1_705_505_400;

    #[test]
    fn daily_bucket_is_utc_midnight() {
        let start = Granularity::Daily
            .bucket_start(Timestamp(WED_2024_01_17_1530))
            .unwrap();
        assert_eq!(start, Timestamp(1_705_449_600)); // 2024-01-17 00:00
    }

    #[test]
    fn weekly_bucket_starts_on_monday() {
        let start = Granularity::Weekly
            .bucket_start(Timestamp(WED_2024_01_17_1530))
            .unwrap();
        assert_eq!(start, Timestamp(1_705_276_800)); // 2024-01-15 00:00 (Mon)

        // A Monday maps onto itself.
        assert_eq!(Granularity::Weekly.bucket_start(start).unwrap(), start);
    }

    #[test]
    fn weekly_bucket_of_a_sunday_is_the_previous_monday() {
        // 2024-01-21 12:00 (Sun)
        let start = Granularity::Weekly.bucket_start(Timestamp(1_705_838_400)).unwrap();
        assert_eq!(start, Timestamp(1_705_276_800));
    }

    #[test]
    fn monthly_and_quarterly_buckets() {
        let ts = Timestamp(WED_2024_01_17_1530);
        assert_eq!(
            Granularity::Monthly.bucket_start(ts).unwrap(),
            Timestamp(1_704_067_200) // 2024-01-01
        );

        // 2024-05-20 -> Q2 starts 2024-04-01
        let may = Timestamp(1_716_163_200);
        assert_eq!(
            Granularity::Quarterly.bucket_start(may).unwrap(),
            Timestamp(1_711_929_600)
        );
    }

    #[test]
    fn next_bucket_handles_month_lengths() {
        // 2024-01-01 -> 2024-02-01 -> 2024-03-01 (leap year)
        let jan = Timestamp(1_704_067_200);
        let feb = Granularity::Monthly.next_bucket(jan).unwrap();
        assert_eq!(feb, Timestamp(1_706_745_600));
        let mar = Granularity::Monthly.next_bucket(feb).unwrap();
        assert_eq!(mar, Timestamp(1_709_251_200));
    }

    #[test]
    fn negative_timestamps_bucket_backwards() {
        assert_eq!(
            Granularity::Daily.bucket_start(Timestamp(-1)).unwrap(),
            Timestamp(-86_400)
        );
    }

    #[test]
    fn out_of_range_timestamp_is_rejected() {
        let err = Granularity::Daily.bucket_start(Timestamp(i64::MAX)).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ChartweaveError::Data(DataError::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn time_point_serializes_as_tuple() {
        let p = TimePoint::new(86_400, [1.5, 2.0]);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "[86400,1.5,2.0]");

        let back: TimePoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn granularity_parses_from_lowercase() {
        assert_eq!("weekly".parse::<Granularity>().unwrap(), Granularity::Weekly);
        assert_eq!(Granularity::Quarterly.to_string(), "quarterly");
    }

    #[test]
    fn slug_normalizes_names() {
        assert_eq!(slug("BNB Chain"), "bnb-chain");
        assert_eq!(slug(" Ethereum "), "ethereum");
        assert_eq!(slug("Hyperliquid L1"), "hyperliquid-l1");
        assert_eq!(slug("Lido's Staking"), "lidos-staking");
    }
}

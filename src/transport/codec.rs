use serde_json::{Map, Value};

use crate::{
    data::{
        domain::{Fields, NamedSeries, TimePoint, Timestamp},
        normalize::normalize_timestamp,
    },
    error::DataError,
};

/// Keys tried, in order, for the timestamp of an object record.
const TIMESTAMP_KEYS: [&str; 3] = ["date", "timestamp", "ts"];

/// A JSON payload that carries one or more time series.
///
/// Accepted shapes:
/// * `[[ts, v0, v1, ...], ...]`, numbers or numeric strings
/// * `{ "ts": v, ... }` and `{ "ts": [v0, v1], ... }`
/// * `[{ "date": ts, "<key>": v }, ...]` via [`SeriesPayload::records`]
/// * `{ "<label>": <series>, ... }` via [`SeriesPayload::labeled`]
///
/// Millisecond timestamps become seconds, points with a `null` value are
/// skipped, and the result is sorted ascending by timestamp.
pub trait SeriesPayload {
    fn points(&self) -> Result<Vec<TimePoint>, DataError>;

    fn records(&self, value_keys: &[&str]) -> Result<Vec<TimePoint>, DataError>;

    fn labeled(&self) -> Result<Vec<NamedSeries>, DataError>;

    fn scalar(&self) -> Option<f64>;
}

impl SeriesPayload for Value {
    fn points(&self) -> Result<Vec<TimePoint>, DataError> {
        let mut out = match self {
            Value::Null => Vec::new(),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let tuple = item.as_array().ok_or_else(|| {
                        DataError::MalformedSeries(format!("point {index} is not a tuple"))
                    })?;
                    if let Some(p) = tuple_point(index, tuple)? {
                        out.push(p);
                    }
                }
                out
            }
            Value::Object(map) => keyed_points(map)?,
            other => {
                return Err(DataError::MalformedSeries(format!(
                    "expected an array or object, found {}",
                    kind_of(other)
                )));
            }
        };
        out.sort_by_key(|p| p.timestamp);
        Ok(out)
    }

    fn records(&self, value_keys: &[&str]) -> Result<Vec<TimePoint>, DataError> {
        let items = match self {
            Value::Null => return Ok(Vec::new()),
            Value::Array(items) => items,
            other => {
                return Err(DataError::MalformedSeries(format!(
                    "expected an array of records, found {}",
                    kind_of(other)
                )));
            }
        };

        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let record = item.as_object().ok_or_else(|| {
                DataError::MalformedSeries(format!("record {index} is not an object"))
            })?;
            let raw_ts = TIMESTAMP_KEYS
                .iter()
                .find_map(|k| record.get(*k))
                .ok_or_else(|| DataError::MalformedSeries(format!("record {index} has no date")))?;
            let timestamp = timestamp(index, raw_ts)?;

            let values: Option<Fields> = value_keys
                .iter()
                .map(|k| record.get(*k).and_then(number))
                .collect();
            if let Some(values) = values {
                out.push(TimePoint { timestamp, values });
            }
        }
        out.sort_by_key(|p| p.timestamp);
        Ok(out)
    }

    fn labeled(&self) -> Result<Vec<NamedSeries>, DataError> {
        match self {
            Value::Null => Ok(Vec::new()),
            Value::Object(map) => map
                .iter()
                .map(|(label, series)| Ok(NamedSeries::new(label.as_str(), series.points()?)))
                .collect(),
            other => Err(DataError::MalformedSeries(format!(
                "expected an object of labeled series, found {}",
                kind_of(other)
            ))),
        }
    }

    fn scalar(&self) -> Option<f64> {
        number(self)
    }
}

fn tuple_point(index: usize, tuple: &[Value]) -> Result<Option<TimePoint>, DataError> {
    let Some((raw_ts, raw_values)) = tuple.split_first() else {
        return Err(DataError::MalformedSeries(format!("point {index} is empty")));
    };
    let timestamp = timestamp(index, raw_ts)?;
    Ok(values(index, raw_values)?.map(|values| TimePoint { timestamp, values }))
}

fn keyed_points(map: &Map<String, Value>) -> Result<Vec<TimePoint>, DataError> {
    let mut out = Vec::with_capacity(map.len());
    for (index, (raw_ts, raw)) in map.iter().enumerate() {
        let timestamp = raw_ts
            .trim()
            .parse::<f64>()
            .map_err(|_| DataError::MalformedSeries(format!("key '{raw_ts}' is not a timestamp")))
            .and_then(|ts| float_timestamp(index, ts))?;

        let fields = match raw {
            Value::Array(items) => values(index, items)?,
            single => values(index, std::slice::from_ref(single))?,
        };
        if let Some(values) = fields {
            out.push(TimePoint { timestamp, values });
        }
    }
    Ok(out)
}

/// `Ok(None)` when any field is null.
fn values(index: usize, raw: &[Value]) -> Result<Option<Fields>, DataError> {
    let mut fields = Fields::with_capacity(raw.len());
    for v in raw {
        if v.is_null() {
            return Ok(None);
        }
        let n = number(v).ok_or_else(|| {
            DataError::MalformedSeries(format!("point {index} has a non-numeric value"))
        })?;
        fields.push(n);
    }
    Ok(Some(fields))
}

fn timestamp(index: usize, raw: &Value) -> Result<Timestamp, DataError> {
    let ts = number(raw).ok_or_else(|| {
        DataError::MalformedSeries(format!("point {index} has a non-numeric timestamp"))
    })?;
    float_timestamp(index, ts)
}

fn float_timestamp(index: usize, ts: f64) -> Result<Timestamp, DataError> {
    if !ts.is_finite() || ts.abs() >= i64::MAX as f64 {
        return Err(DataError::MalformedSeries(format!(
            "point {index} has an out-of-range timestamp"
        )));
    }
    Ok(normalize_timestamp(ts.trunc() as i64))
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

use std::collections::BTreeMap;

use crate::{
    data::domain::{Fields, Granularity, TimePoint, Timestamp},
    error::{ChartweaveResult, DataError},
};

/// Groups `points` into `granularity` buckets, summing every field.
///
/// The accumulator width is fixed by the first point; any later point with a
/// different field count is rejected with [`DataError::ShapeMismatch`].
/// Buckets are emitted in ascending order of their start timestamp. Buckets
/// with no points are not emitted (see [`bucket_dense`]).
pub fn bucket(points: &[TimePoint], granularity: Granularity) -> ChartweaveResult<Vec<TimePoint>> {
    Ok(accumulate(points, granularity)?
        .into_iter()
        .map(|(timestamp, values)| TimePoint { timestamp, values })
        .collect())
}

/// Like [`bucket`], but every bucket between the first and the last one is
/// present, with zeroed fields where no point fell.
pub fn bucket_dense(
    points: &[TimePoint],
    granularity: Granularity,
) -> ChartweaveResult<Vec<TimePoint>> {
    let sums = accumulate(points, granularity)?;
    let (Some((&first, _)), Some((&last, _))) = (sums.first_key_value(), sums.last_key_value())
    else {
        return Ok(Vec::new());
    };
    let width = points.first().map_or(0, TimePoint::arity);

    let mut out = Vec::with_capacity(sums.len());
    let mut cursor = first;
    while cursor <= last {
        let values = sums
            .get(&cursor)
            .cloned()
            .unwrap_or_else(|| zeros(width));
        out.push(TimePoint {
            timestamp: cursor,
            values,
        });
        cursor = granularity.next_bucket(cursor)?;
    }
    Ok(out)
}

/// Running total per field. One output point per input point.
pub fn cumulative(points: &[TimePoint]) -> ChartweaveResult<Vec<TimePoint>> {
    let Some(first) = points.first() else {
        return Ok(Vec::new());
    };
    let width = first.arity();
    let mut running = zeros(width);

    points
        .iter()
        .enumerate()
        .map(|(index, p)| {
            check_arity(index, width, p)?;
            running
                .iter_mut()
                .zip(&p.values)
                .for_each(|(acc, v)| *acc += v);
            Ok(TimePoint {
                timestamp: p.timestamp,
                values: running.clone(),
            })
        })
        .collect()
}

/// Elementwise sum of two bucketed series on shared bucket starts; the union
/// of both otherwise.
pub fn merge_buckets(a: &[TimePoint], b: &[TimePoint]) -> ChartweaveResult<Vec<TimePoint>> {
    let width = a.first().or(b.first()).map_or(0, TimePoint::arity);
    let mut sums: BTreeMap<Timestamp, Fields> = BTreeMap::new();

    for (index, p) in a.iter().chain(b).enumerate() {
        check_arity(index, width, p)?;
        add_into(sums.entry(p.timestamp).or_insert_with(|| zeros(width)), p);
    }

    Ok(sums
        .into_iter()
        .map(|(timestamp, values)| TimePoint { timestamp, values })
        .collect())
}

fn accumulate(
    points: &[TimePoint],
    granularity: Granularity,
) -> ChartweaveResult<BTreeMap<Timestamp, Fields>> {
    let mut sums: BTreeMap<Timestamp, Fields> = BTreeMap::new();
    let Some(first) = points.first() else {
        return Ok(sums);
    };
    let width = first.arity();

    for (index, p) in points.iter().enumerate() {
        check_arity(index, width, p)?;
        let start = granularity.bucket_start(p.timestamp)?;
        add_into(sums.entry(start).or_insert_with(|| zeros(width)), p);
    }
    Ok(sums)
}

fn check_arity(index: usize, expected: usize, p: &TimePoint) -> ChartweaveResult<()> {
    if p.arity() == expected {
        Ok(())
    } else {
        Err(DataError::ShapeMismatch {
            index,
            expected,
            found: p.arity(),
        }
        .into())
    }
}

fn add_into(acc: &mut Fields, p: &TimePoint) {
    acc.iter_mut().zip(&p.values).for_each(|(a, v)| *a += v);
}

fn zeros(width: usize) -> Fields {
    std::iter::repeat_n(0.0, width).collect()
}

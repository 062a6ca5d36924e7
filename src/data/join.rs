use std::{collections::HashMap, fmt};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, SeqAccess, Visitor},
    ser::SerializeSeq,
};

use crate::data::domain::{Label, NamedSeries, Timestamp};

/// One row of a [`JoinedTable`]: a timestamp and one cell per label.
///
/// Serialized as `[timestamp, v0 | null, v1 | null, ...]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinedRow {
    pub timestamp: Timestamp,
    pub values: Vec<Option<f64>>,
}

impl JoinedRow {
    /// Sum of the non-null cells.
    pub fn total(&self) -> f64 {
        self.values.iter().flatten().sum()
    }
}

impl Serialize for JoinedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1 + self.values.len()))?;
        seq.serialize_element(&self.timestamp)?;
        for v in &self.values {
            seq.serialize_element(v)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for JoinedRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = JoinedRow;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [timestamp, value | null, ...] row")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<JoinedRow, A::Error> {
                let timestamp: Timestamp = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let mut values = Vec::new();
                while let Some(v) = seq.next_element::<Option<f64>>()? {
                    values.push(v);
                }
                Ok(JoinedRow { timestamp, values })
            }
        }

        deserializer.deserialize_seq(RowVisitor)
    }
}

/// A wide table keyed by timestamp, one column per label.
///
/// Rows are sorted ascending and every row holds exactly `labels.len()` cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JoinedTable {
    pub labels: Vec<Label>,
    pub rows: Vec<JoinedRow>,
}

impl JoinedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l.as_str() == label)
    }

    /// `None` if the row or the label does not exist, `Some(None)` for a null cell.
    pub fn get(&self, timestamp: Timestamp, label: &str) -> Option<Option<f64>> {
        let col = self.column_index(label)?;
        let row = self
            .rows
            .binary_search_by_key(&timestamp, |r| r.timestamp)
            .ok()?;
        self.rows[row].values.get(col).copied()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.rows.iter().map(|r| r.timestamp)
    }

    /// Non-null cells of one column.
    pub fn column(&self, label: &str) -> Vec<(Timestamp, f64)> {
        let Some(col) = self.column_index(label) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|r| r.values.get(col).copied().flatten().map(|v| (r.timestamp, v)))
            .collect()
    }
}

/// Joins series on their first field. See [`join_field`].
pub fn join(series: &[NamedSeries]) -> JoinedTable {
    join_field(series, 0)
}

/// Outer-joins `series` by exact timestamp on field `field`.
///
/// The row axis is the ascending union of every input timestamp. A label
/// without a value at a row's timestamp gets `None`; there is no interpolation
/// and no forward fill.
///
/// Labels are expected to be unique. When one repeats, the later series
/// replaces the earlier one's data (last write wins) and the label keeps the
/// column position where it was first seen.
pub fn join_field(series: &[NamedSeries], field: usize) -> JoinedTable {
    let mut labels: Vec<Label> = Vec::new();
    let mut positions: HashMap<&Label, usize> = HashMap::new();
    let mut cells: Vec<HashMap<Timestamp, f64>> = Vec::new();
    let mut axis: Vec<Timestamp> = Vec::with_capacity(series.iter().map(NamedSeries::len).sum());

    for s in series {
        let col = *positions.entry(&s.label).or_insert_with(|| {
            labels.push(s.label.clone());
            cells.push(HashMap::new());
            labels.len() - 1
        });

        let mut lookup = HashMap::with_capacity(s.points.len());
        for p in &s.points {
            axis.push(p.timestamp);
            if let Some(v) = p.field(field) {
                lookup.insert(p.timestamp, v);
            }
        }
        cells[col] = lookup;
    }

    axis.sort_unstable();
    axis.dedup();

    let rows = axis
        .into_iter()
        .map(|timestamp| JoinedRow {
            timestamp,
            values: cells.iter().map(|c| c.get(&timestamp).copied()).collect(),
        })
        .collect();

    JoinedTable { labels, rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_chains() -> Vec<NamedSeries> {
        vec![
            NamedSeries::from_pairs("A", [(1, 10.0)]),
            NamedSeries::from_pairs("B", [(1, 5.0), (2, 7.0)]),
            NamedSeries::from_pairs("C", [(2, 3.0)]),
        ]
    }

    #[test]
    fn three_chain_join_fills_gaps_with_null() {
        let table = join(&three_chains());

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].timestamp, Timestamp(1));
        assert_eq!(table.rows[0].values, vec![Some(10.0), Some(5.0), None]);
        assert_eq!(table.rows[1].timestamp, Timestamp(2));
        assert_eq!(table.rows[1].values, vec![None, Some(7.0), Some(3.0)]);
    }

    #[test]
    fn rows_serialize_nulls_not_zeros() {
        let json = serde_json::to_value(join(&three_chains())).unwrap();
        assert_eq!(json["labels"], serde_json::json!(["A", "B", "C"]));
        assert_eq!(
            json["rows"],
            serde_json::json!([[1, 10.0, 5.0, null], [2, null, 7.0, 3.0]])
        );
    }

    #[test]
    fn get_distinguishes_null_from_missing() {
        let table = join(&three_chains());
        assert_eq!(table.get(Timestamp(1), "C"), Some(None));
        assert_eq!(table.get(Timestamp(2), "C"), Some(Some(3.0)));
        assert_eq!(table.get(Timestamp(3), "C"), None);
        assert_eq!(table.get(Timestamp(1), "Z"), None);
    }

    #[test]
    fn duplicate_label_last_write_wins_and_keeps_position() {
        let table = join(&[
            NamedSeries::from_pairs("A", [(1, 1.0)]),
            NamedSeries::from_pairs("B", [(1, 2.0)]),
            NamedSeries::from_pairs("A", [(1, 9.0)]),
        ]);
        assert_eq!(table.labels, vec![Label::from("A"), Label::from("B")]);
        assert_eq!(table.rows[0].values, vec![Some(9.0), Some(2.0)]);
    }

    #[test]
    fn join_field_reads_the_requested_field() {
        use crate::data::domain::TimePoint;

        let flows = NamedSeries::new(
            "bridge",
            vec![TimePoint::new(1, [10.0, 4.0]), TimePoint::new(2, [3.0])],
        );
        let table = join_field(&[flows], 1);
        assert_eq!(table.rows[0].values, vec![Some(4.0)]);
        assert_eq!(table.rows[1].values, vec![None]);
    }

    #[test]
    fn join_is_independent_of_input_order() {
        let mut reversed = three_chains();
        reversed.reverse();
        let a = join(&three_chains());
        let b = join(&reversed);
        for label in ["A", "B", "C"] {
            assert_eq!(a.column(label), b.column(label));
        }
        assert_eq!(a.timestamps().collect::<Vec<_>>(), b.timestamps().collect::<Vec<_>>());
    }
}

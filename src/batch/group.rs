//! Grouping and key joins.

use super::{Column, RecordBatch, Value};
use crate::error::{EvalError, Result};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Composite key of one group, ordered with [`Value::total_cmp`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupKey(pub Vec<Value>);

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// Rows sharing one key, in their original order.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    pub rows: Vec<usize>,
}

impl RecordBatch {
    fn key_at(&self, columns: &[&Column], row: usize) -> GroupKey {
        GroupKey(columns.iter().map(|c| c.values()[row].clone()).collect())
    }

    fn key_columns<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<&Column>> {
        if keys.is_empty() {
            return Err(EvalError::Config(
                "At least one key column is required".to_string(),
            ));
        }
        let columns = keys
            .iter()
            .map(|k| self.column(k.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        for (name, column) in keys.iter().zip(&columns) {
            if column.iter().any(|v| matches!(v, Value::Vector(_))) {
                return Err(EvalError::data(
                    name.as_ref(),
                    "vector values cannot be used as keys",
                ));
            }
        }
        Ok(columns)
    }

    /// Partition rows by the values of the key columns.
    ///
    /// Groups are returned in key order, so the result does not depend on
    /// the order of rows in the batch.
    pub fn group_by<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<Group>> {
        let columns = self.key_columns(keys)?;

        let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
        for row in 0..self.num_rows {
            groups
                .entry(self.key_at(&columns, row))
                .or_default()
                .push(row);
        }

        Ok(groups
            .into_iter()
            .map(|(key, rows)| Group { key, rows })
            .collect())
    }

    /// Left join `right` onto this batch by equal key columns.
    ///
    /// Every left row is kept in place; right rows must have unique keys.
    /// Right non-key columns are appended, null where no key matches.
    pub fn left_join<S: AsRef<str>>(&self, right: &RecordBatch, on: &[S]) -> Result<RecordBatch> {
        let left_keys = self.key_columns(on)?;
        let right_keys = right.key_columns(on)?;

        let mut index: BTreeMap<GroupKey, usize> = BTreeMap::new();
        for row in 0..right.num_rows {
            let key = right.key_at(&right_keys, row);
            if index.insert(key, row).is_some() {
                return Err(EvalError::data(
                    on.iter().map(|k| k.as_ref()).collect::<Vec<_>>().join(","),
                    format!("duplicate join key at right row {}", row),
                ));
            }
        }

        let matches: Vec<Option<usize>> = (0..self.num_rows)
            .map(|row| index.get(&self.key_at(&left_keys, row)).copied())
            .collect();

        let mut joined = self.clone();
        let appended: IndexMap<&str, &Column> = right
            .columns
            .iter()
            .filter(|(name, _)| !on.iter().any(|k| k.as_ref() == name.as_str()))
            .map(|(name, column)| (name.as_str(), column))
            .collect();

        for (name, column) in appended {
            let values = matches
                .iter()
                .map(|m| match m {
                    Some(r) => column.values()[*r].clone(),
                    None => Value::Null,
                })
                .collect();
            joined = joined.with_column(name, values)?;
        }

        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn grouped() -> RecordBatch {
        RecordBatch::from_columns(vec![
            (
                "question_idx",
                vec![Value::Int(2), Value::Int(1), Value::Int(2), Value::Int(1)],
            ),
            (
                "text",
                vec![
                    Value::from("a"),
                    Value::from("b"),
                    Value::from("c"),
                    Value::from("d"),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_group_by_orders_by_key() {
        let groups = grouped().group_by(&["question_idx"]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, GroupKey(vec![Value::Int(1)]));
        assert_eq!(groups[0].rows, vec![1, 3]);
        assert_eq!(groups[1].rows, vec![0, 2]);
    }

    #[test]
    fn test_group_by_rejects_vectors_and_missing() {
        let batch = RecordBatch::from_columns(vec![("emb", vec![Value::Vector(vec![1.0])])])
            .unwrap();
        assert!(batch.group_by(&["emb"]).is_err());
        assert!(batch.group_by(&["nope"]).is_err());
        assert!(batch.group_by::<&str>(&[]).is_err());
    }

    #[test]
    fn test_left_join_broadcasts_right_columns() {
        let right = RecordBatch::from_columns(vec![
            ("question_idx", vec![Value::Int(1)]),
            ("mean", vec![Value::Float(0.5)]),
        ])
        .unwrap();

        let joined = grouped().left_join(&right, &["question_idx"]).unwrap();
        assert_eq!(joined.column_names(), vec!["question_idx", "text", "mean"]);
        assert_eq!(
            joined.column("mean").unwrap().values(),
            &[Value::Null, Value::Float(0.5), Value::Null, Value::Float(0.5)]
        );
    }

    #[test]
    fn test_left_join_rejects_duplicate_right_keys() {
        let right = RecordBatch::from_columns(vec![
            ("question_idx", vec![Value::Int(1), Value::Int(1)]),
            ("mean", vec![Value::Float(0.5), Value::Float(0.1)]),
        ])
        .unwrap();
        assert!(grouped().left_join(&right, &["question_idx"]).is_err());
    }
}

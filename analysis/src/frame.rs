use crate::error::AnalysisError;
use itertools::Itertools;
use parser::{Table, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Hashable stand-in for a cell, so rows can key hash maps: floats are keyed
/// by bit pattern with NaN and negative zero normalized first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyCell {
    Null,
    Int(i64),
    Float(u64),
    Text(String),
}

fn key_cell(value: &Value) -> KeyCell {
    match value {
        Value::Null => KeyCell::Null,
        Value::Int(v) => KeyCell::Int(*v),
        Value::Float(v) => {
            let v = if v.is_nan() {
                f64::NAN
            } else if *v == 0.0 {
                0.0
            } else {
                *v
            };
            KeyCell::Float(v.to_bits())
        }
        Value::Text(v) => KeyCell::Text(v.clone()),
    }
}

/// Total order over cells for deterministic group output: nulls first, then
/// numerics (NaN last among them), then text.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Text(_), _) => Ordering::Greater,
        (_, Value::Text(_)) => Ordering::Less,
        _ => {
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or_else(|| match (x.is_nan(), y.is_nan()) {
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => Ordering::Equal,
            })
        }
    }
}

pub(crate) fn col_index(table: &Table, name: &str) -> Result<usize, AnalysisError> {
    table
        .column_index(name)
        .ok_or_else(|| AnalysisError::UnknownColumn(name.to_string()))
}

fn col_indices(table: &Table, names: &[String]) -> Result<Vec<usize>, AnalysisError> {
    names.iter().map(|name| col_index(table, name)).collect()
}

/// Rows whose cells match every (column, value) predicate, in input order.
pub fn filter_eq(table: &Table, predicates: &[(&str, Value)]) -> Result<Table, AnalysisError> {
    let indices: Vec<usize> = predicates
        .iter()
        .map(|(column, _)| col_index(table, column))
        .collect::<Result<_, _>>()?;

    let mut out = Table::new(table.columns().to_vec());
    for row in table.rows() {
        if indices.iter().zip(predicates).all(|(&i, (_, value))| &row[i] == value) {
            out.push_row(row.clone());
        }
    }
    Ok(out)
}

/// Unique values of one column, first-appearance order.
pub fn distinct(table: &Table, column: &str) -> Result<Vec<Value>, AnalysisError> {
    let idx = col_index(table, column)?;
    Ok(table
        .rows()
        .iter()
        .map(|row| row[idx].clone())
        .unique_by(key_cell)
        .collect())
}

/// Unique combinations of several columns, first-appearance order.
pub fn distinct_rows(table: &Table, columns: &[String]) -> Result<Vec<Vec<Value>>, AnalysisError> {
    let indices = col_indices(table, columns)?;
    Ok(table
        .rows()
        .iter()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect::<Vec<_>>())
        .unique_by(|cells| cells.iter().map(key_cell).collect::<Vec<_>>())
        .collect())
}

/// Group row indices by key cells; groups come back sorted by key so time
/// axes end up in ascending order.
fn group_rows(table: &Table, keys: &[String]) -> Result<Vec<(Vec<Value>, Vec<usize>)>, AnalysisError> {
    let indices = col_indices(table, keys)?;

    let mut groups: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
    let mut lookup: HashMap<Vec<KeyCell>, usize> = HashMap::new();
    for (row_idx, row) in table.rows().iter().enumerate() {
        let cells: Vec<Value> = indices.iter().map(|&i| row[i].clone()).collect();
        let key: Vec<KeyCell> = cells.iter().map(key_cell).collect();
        match lookup.get(&key) {
            Some(&group) => groups[group].1.push(row_idx),
            None => {
                lookup.insert(key, groups.len());
                groups.push((cells, vec![row_idx]));
            }
        }
    }

    groups.sort_by(|a, b| cmp_rows(&a.0, &b.0));
    Ok(groups)
}

fn cmp_rows(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| cmp_values(x, y))
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Group by `keys` and fold `column` into `<column>_mean` / `<column>_std`
/// (sample standard deviation, null when a group has fewer than two numeric
/// values). Null and NaN cells stay out of the aggregate.
pub fn group_mean_std(table: &Table, keys: &[String], column: &str) -> Result<Table, AnalysisError> {
    let value_idx = col_index(table, column)?;

    let mut columns = keys.to_vec();
    columns.push(format!("{column}_mean"));
    columns.push(format!("{column}_std"));

    let mut out = Table::new(columns);
    for (cells, rows) in group_rows(table, keys)? {
        let values = numeric_values(table, &rows, value_idx);
        let mut row = cells;
        row.push(mean_of(&values).map_or(Value::Null, Value::Float));
        row.push(std_of(&values).map_or(Value::Null, Value::Float));
        out.push_row(row);
    }
    Ok(out)
}

/// Group by `keys` and sum `column` into `out_column`.
pub fn group_sum(
    table: &Table,
    keys: &[String],
    column: &str,
    out_column: &str,
) -> Result<Table, AnalysisError> {
    let value_idx = col_index(table, column)?;

    let mut columns = keys.to_vec();
    columns.push(out_column.to_string());

    let mut out = Table::new(columns);
    for (cells, rows) in group_rows(table, keys)? {
        let sum: f64 = numeric_values(table, &rows, value_idx).iter().sum();
        let mut row = cells;
        row.push(Value::Float(sum));
        out.push_row(row);
    }
    Ok(out)
}

/// Equi-join on a shared key-column list; output columns are the left
/// table's followed by the right table's non-key columns.
pub fn inner_join(left: &Table, right: &Table, keys: &[String]) -> Result<Table, AnalysisError> {
    let left_idx = col_indices(left, keys)?;
    let right_idx = col_indices(right, keys)?;
    let right_extra: Vec<usize> = (0..right.columns().len())
        .filter(|i| !right_idx.contains(i))
        .collect();

    let mut columns = left.columns().to_vec();
    columns.extend(right_extra.iter().map(|&i| right.columns()[i].clone()));

    let mut lookup: HashMap<Vec<KeyCell>, Vec<usize>> = HashMap::new();
    for (row_idx, row) in right.rows().iter().enumerate() {
        let key: Vec<KeyCell> = right_idx.iter().map(|&i| key_cell(&row[i])).collect();
        lookup.entry(key).or_default().push(row_idx);
    }

    let mut out = Table::new(columns);
    for row in left.rows() {
        let key: Vec<KeyCell> = left_idx.iter().map(|&i| key_cell(&row[i])).collect();
        if let Some(matches) = lookup.get(&key) {
            for &r in matches {
                let mut cells = row.clone();
                cells.extend(right_extra.iter().map(|&i| right.rows()[r][i].clone()));
                out.push_row(cells);
            }
        }
    }
    Ok(out)
}

fn numeric_values(table: &Table, rows: &[usize], column: usize) -> Vec<f64> {
    rows.iter()
        .filter_map(|&r| table.rows()[r][column].as_f64())
        .filter(|v| !v.is_nan())
        .collect()
}

fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn std_of(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn sample() -> Table {
        let mut table = Table::new(keys(&["seed", "time", "mean"]));
        table.push_row(vec![Value::Float(1.0), Value::Int(60_000), Value::Float(4.0)]);
        table.push_row(vec![Value::Float(2.0), Value::Int(0), Value::Float(1.0)]);
        table.push_row(vec![Value::Float(1.0), Value::Int(0), Value::Float(3.0)]);
        table.push_row(vec![Value::Float(2.0), Value::Int(60_000), Value::Float(8.0)]);
        table
    }

    #[test]
    fn filter_eq_keeps_matching_rows_in_order() {
        let table = sample();
        let filtered = filter_eq(&table, &[("seed", Value::Float(1.0))]).unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.cell(0, "time"), Some(&Value::Int(60_000)));
        assert_eq!(filtered.cell(1, "time"), Some(&Value::Int(0)));
    }

    #[test]
    fn distinct_preserves_first_appearance_order() {
        let table = sample();
        let seeds = distinct(&table, "seed").unwrap();
        assert_eq!(seeds, vec![Value::Float(1.0), Value::Float(2.0)]);
    }

    #[test]
    fn distinct_rows_deduplicates_combinations() {
        let table = sample();
        let combos = distinct_rows(&table, &keys(&["time"])).unwrap();
        assert_eq!(combos, vec![vec![Value::Int(60_000)], vec![Value::Int(0)]]);
    }

    #[test]
    fn group_mean_std_aggregates_sorted_by_key() {
        let table = sample();
        let grouped = group_mean_std(&table, &keys(&["time"]), "mean").unwrap();

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped.cell(0, "time"), Some(&Value::Int(0)));
        assert_eq!(grouped.cell(0, "mean_mean"), Some(&Value::Float(2.0)));
        assert_eq!(grouped.cell(1, "time"), Some(&Value::Int(60_000)));
        assert_eq!(grouped.cell(1, "mean_mean"), Some(&Value::Float(6.0)));

        // Sample std of {4.0, 8.0} is sqrt(8).
        let std = grouped.cell(1, "mean_std").unwrap().as_f64().unwrap();
        assert!((std - 8.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn group_mean_std_skips_null_and_nan() {
        let mut table = Table::new(keys(&["time", "mean"]));
        table.push_row(vec![Value::Int(0), Value::Float(2.0)]);
        table.push_row(vec![Value::Int(0), Value::Null]);
        table.push_row(vec![Value::Int(0), Value::Float(f64::NAN)]);

        let grouped = group_mean_std(&table, &keys(&["time"]), "mean").unwrap();
        assert_eq!(grouped.cell(0, "mean_mean"), Some(&Value::Float(2.0)));
        assert_eq!(grouped.cell(0, "mean_std"), Some(&Value::Null));
    }

    #[test]
    fn group_sum_totals_each_group() {
        let table = sample();
        let summed = group_sum(&table, &keys(&["seed"]), "mean", "total").unwrap();
        assert_eq!(summed.cell(0, "total"), Some(&Value::Float(7.0)));
        assert_eq!(summed.cell(1, "total"), Some(&Value::Float(9.0)));
    }

    #[test]
    fn inner_join_matches_on_keys() {
        let mut left = Table::new(keys(&["time", "blocks"]));
        left.push_row(vec![Value::Int(0), Value::Float(10.0)]);
        left.push_row(vec![Value::Int(60_000), Value::Float(20.0)]);

        let mut right = Table::new(keys(&["time", "forks"]));
        right.push_row(vec![Value::Int(60_000), Value::Float(2.0)]);

        let joined = inner_join(&left, &right, &keys(&["time"])).unwrap();
        assert_eq!(joined.columns(), &["time", "blocks", "forks"]);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.cell(0, "blocks"), Some(&Value::Float(20.0)));
        assert_eq!(joined.cell(0, "forks"), Some(&Value::Float(2.0)));
    }
}

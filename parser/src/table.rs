use crate::types::{FreqRecord, ParameterMap, ParseError, StatsRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fixed columns of the statistics table, in declared order. Parameter
/// columns always precede them.
pub const STATS_COLUMNS: &[&str] = &[
    "protocol",
    "metric",
    "time",
    "min",
    "max",
    "n",
    "mean",
    "variance",
    "count_min",
    "count_max",
];

/// Fixed columns of the frequency table, in declared order.
pub const FREQ_COLUMNS: &[&str] = &["protocol", "metric", "time", "value", "frequency"];

/// One table cell. A parameter a row never defined stays `Null`, never zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
}

// NaN cells must compare equal, so two parses of the same file produce equal
// tables.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    /// Null renders empty; floats use debug formatting so `100.0` keeps its
    /// decimal point and NaN/infinities stay parseable.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}

/// Ordered columns plus rows in insertion order; every row covers every
/// column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; it must have one cell per column.
    pub fn push_row(&mut self, row: Vec<Value>) {
        assert_eq!(row.len(), self.columns.len(), "row width must match the column set");
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell lookup by row index and column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }
}

/// A record kind that can be laid out as table rows: a parameter map plus a
/// fixed, statically declared set of typed columns.
pub trait TabularRecord {
    fn fixed_columns() -> &'static [&'static str];
    fn parameters(&self) -> &ParameterMap;
    fn fixed_values(&self) -> Vec<Value>;
}

impl TabularRecord for StatsRecord {
    fn fixed_columns() -> &'static [&'static str] {
        STATS_COLUMNS
    }

    fn parameters(&self) -> &ParameterMap {
        &self.header.parameters
    }

    fn fixed_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.header.protocol.clone()),
            Value::Text(self.header.metric.clone()),
            Value::Int(self.header.time as i64),
            Value::Float(self.min),
            Value::Float(self.max),
            Value::Int(self.n),
            Value::Float(self.mean),
            Value::Float(self.variance),
            Value::Int(self.count_min),
            Value::Int(self.count_max),
        ]
    }
}

impl TabularRecord for FreqRecord {
    fn fixed_columns() -> &'static [&'static str] {
        FREQ_COLUMNS
    }

    fn parameters(&self) -> &ParameterMap {
        &self.header.parameters
    }

    fn fixed_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.header.protocol.clone()),
            Value::Text(self.header.metric.clone()),
            Value::Int(self.header.time as i64),
            Value::Int(self.value),
            Value::Int(self.frequency),
        ]
    }
}

/// Expand a homogeneous record sequence into a table: parameter columns
/// (union of all names seen, sorted) first, then the kind's fixed columns.
/// Row order follows record order. Also returns the parameter-column names
/// on their own, which downstream grouping keys on.
pub fn assemble<R: TabularRecord>(records: &[R]) -> (Table, Vec<String>) {
    // First pass: the parameter-column set is the union across all records.
    let names: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.parameters().keys().map(String::as_str))
        .collect();
    let parameter_columns: Vec<String> = names.into_iter().map(str::to_string).collect();

    let mut columns = parameter_columns.clone();
    columns.extend(R::fixed_columns().iter().map(|c| c.to_string()));

    // Second pass: materialize one cell per column for every record, with an
    // explicit null where a record lacks a parameter.
    let mut table = Table::new(columns);
    for record in records {
        let mut row: Vec<Value> = Vec::with_capacity(table.columns().len());
        for name in &parameter_columns {
            row.push(match record.parameters().get(name) {
                Some(v) => Value::Float(*v),
                None => Value::Null,
            });
        }
        row.extend(record.fixed_values());
        table.push_row(row);
    }
    (table, parameter_columns)
}

/// Both tables must expose the same parameter columns, in the same order;
/// downstream code groups and joins on exactly that key set.
pub fn check_parameter_schema(stats: &[String], freq: &[String]) -> Result<(), ParseError> {
    if stats != freq {
        return Err(ParseError::ParameterSchemaMismatch {
            stats: stats.to_vec(),
            freq: freq.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Header;

    fn stats_record(parameters: &[(&str, f64)], time: u64, mean: f64) -> StatsRecord {
        StatsRecord {
            header: Header {
                protocol: "topology".to_string(),
                metric: "messages-ping".to_string(),
                parameters: parameters.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                time,
            },
            min: 0.0,
            max: 1.0,
            n: 10,
            mean,
            variance: 0.5,
            count_min: 1,
            count_max: 2,
        }
    }

    #[test]
    fn assemble_orders_parameter_columns_before_fixed() {
        let records = vec![stats_record(&[("seed", 1.0), ("network_size", 100.0)], 0, 1.0)];
        let (table, parameters) = assemble(&records);

        assert_eq!(parameters, vec!["network_size", "seed"]);
        let expected: Vec<&str> = ["network_size", "seed"]
            .into_iter()
            .chain(STATS_COLUMNS.iter().copied())
            .collect();
        assert_eq!(table.columns(), expected.as_slice());
    }

    #[test]
    fn assemble_fills_missing_parameters_with_null() {
        let records = vec![
            stats_record(&[("network_size", 100.0), ("seed", 1.0)], 0, 1.0),
            stats_record(&[("network_size", 100.0)], 60_000, 2.0),
        ];
        let (table, _) = assemble(&records);

        assert_eq!(table.cell(0, "seed"), Some(&Value::Float(1.0)));
        assert_eq!(table.cell(1, "seed"), Some(&Value::Null));
    }

    #[test]
    fn assemble_preserves_row_order() {
        let records = vec![
            stats_record(&[("seed", 1.0)], 120_000, 3.0),
            stats_record(&[("seed", 1.0)], 0, 1.0),
            stats_record(&[("seed", 1.0)], 60_000, 2.0),
        ];
        let (table, _) = assemble(&records);

        let times: Vec<&Value> = (0..3).map(|r| table.cell(r, "time").unwrap()).collect();
        assert_eq!(times, vec![&Value::Int(120_000), &Value::Int(0), &Value::Int(60_000)]);
    }

    #[test]
    fn schema_check_accepts_equal_lists() {
        let columns = vec!["network_size".to_string(), "seed".to_string()];
        assert!(check_parameter_schema(&columns, &columns).is_ok());
    }

    #[test]
    fn schema_check_rejects_mismatch() {
        let stats = vec!["network_size".to_string()];
        let freq = vec!["delay".to_string()];
        let err = check_parameter_schema(&stats, &freq).unwrap_err();
        assert!(matches!(err, ParseError::ParameterSchemaMismatch { .. }));
    }

    #[test]
    fn nan_cells_compare_equal() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(f64::NAN), Value::Float(0.0));
        assert_ne!(Value::Null, Value::Float(0.0));
    }
}

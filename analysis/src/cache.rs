use crate::error::AnalysisError;
use parser::{parse, ErrorPolicy, ParsedLog, Table, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const LOG_FILE: &str = "stdout.txt";
const CACHE_DIR: &str = "cache";
const STATS_FILE: &str = "stats.csv";
const FREQ_FILE: &str = "freq.csv";
const PARAMS_FILE: &str = "params.csv";

/// On-disk cache of one simulation's parsed tables, rooted at
/// `<run_dir>/cache/`. The cache counts only when all three files are
/// present.
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(run_dir: &Path) -> Self {
        Self {
            dir: run_dir.join(CACHE_DIR),
        }
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    pub fn freq_path(&self) -> PathBuf {
        self.dir.join(FREQ_FILE)
    }

    pub fn params_path(&self) -> PathBuf {
        self.dir.join(PARAMS_FILE)
    }

    pub fn is_complete(&self) -> bool {
        self.stats_path().is_file() && self.freq_path().is_file() && self.params_path().is_file()
    }

    pub fn load(&self) -> Result<ParsedLog, AnalysisError> {
        Ok(ParsedLog {
            stats: read_table(&self.stats_path())?,
            freq: read_table(&self.freq_path())?,
            parameters: read_parameters(&self.params_path())?,
        })
    }

    pub fn store(&self, log: &ParsedLog) -> Result<(), AnalysisError> {
        fs::create_dir_all(&self.dir)?;
        write_table(&self.stats_path(), &log.stats)?;
        write_table(&self.freq_path(), &log.freq)?;
        write_parameters(&self.params_path(), &log.parameters)?;
        Ok(())
    }
}

/// Load the parsed tables from the cache if present, otherwise parse
/// `<run_dir>/stdout.txt` and fill the cache.
pub fn load_or_parse(run_dir: &Path, policy: ErrorPolicy) -> Result<ParsedLog, AnalysisError> {
    let cache = Cache::new(run_dir);
    if cache.is_complete() {
        info!("Cache found for simulation at {}", run_dir.display());
        return cache.load();
    }

    info!("Cache NOT found for simulation at {}, parsing the log", run_dir.display());
    let log = parse(run_dir.join(LOG_FILE), policy)?;
    cache.store(&log)?;
    Ok(log)
}

fn write_table(path: &Path, table: &Table) -> Result<(), AnalysisError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|cell| cell.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn read_table(path: &Path) -> Result<Table, AnalysisError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record?;
        table.push_row(record.iter().map(decode_cell).collect());
    }
    Ok(table)
}

/// Inverse of `Value`'s display form: empty is null, then the narrowest
/// numeric kind that parses, then text.
fn decode_cell(field: &str) -> Value {
    if field.is_empty() {
        Value::Null
    } else if let Ok(int) = field.parse::<i64>() {
        Value::Int(int)
    } else if let Ok(float) = field.parse::<f64>() {
        Value::Float(float)
    } else {
        Value::Text(field.to_string())
    }
}

fn write_parameters(path: &Path, parameters: &[String]) -> Result<(), AnalysisError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["parameters"])?;
    for name in parameters {
        writer.write_record([name.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

fn read_parameters(path: &Path) -> Result<Vec<String>, AnalysisError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut parameters = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(name) = record.get(0) {
            parameters.push(name.to_string());
        }
    }
    Ok(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LOG: &str = "\
control.core-transactions: NETWORK_SIZE 10 SEED 1 [0] Infinity -Infinity 0 NaN 0.0 0 0
control.topology-messages-addr: NETWORK_SIZE 100 SEED 1 [1080000] 3.0 17.0 100 8.49 11.2 4 3
control.core-blockchain: NETWORK_SIZE 100 SEED 1 [720000] (0,108) (1,100)
";

    fn sample_table() -> Table {
        let mut table = Table::new(vec![
            "delay".to_string(),
            "protocol".to_string(),
            "time".to_string(),
            "mean".to_string(),
        ]);
        table.push_row(vec![
            Value::Float(50.0),
            Value::Text("core".to_string()),
            Value::Int(0),
            Value::Float(f64::NAN),
        ]);
        table.push_row(vec![
            Value::Null,
            Value::Text("topology".to_string()),
            Value::Int(60_000),
            Value::Float(f64::INFINITY),
        ]);
        table.push_row(vec![
            Value::Float(100.0),
            Value::Text("core".to_string()),
            Value::Int(120_000),
            Value::Float(8.49),
        ]);
        table
    }

    #[test]
    fn tables_round_trip_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());

        let log = ParsedLog {
            stats: sample_table(),
            freq: sample_table(),
            parameters: vec!["delay".to_string()],
        };
        cache.store(&log).unwrap();
        assert!(cache.is_complete());

        let loaded = cache.load().unwrap();
        assert_eq!(loaded, log);
    }

    #[test]
    fn load_or_parse_fills_and_then_uses_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOG_FILE), SAMPLE_LOG).unwrap();

        let first = load_or_parse(dir.path(), ErrorPolicy::Lenient).unwrap();
        assert!(Cache::new(dir.path()).is_complete());

        // Remove the log: the second load can only succeed via the cache.
        fs::remove_file(dir.path().join(LOG_FILE)).unwrap();
        let second = load_or_parse(dir.path(), ErrorPolicy::Lenient).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.parameters, vec!["network_size", "seed"]);
        assert_eq!(second.stats.len(), 2);
        assert_eq!(second.freq.len(), 2);
    }
}

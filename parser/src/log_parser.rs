use crate::freq_line::decode_freq;
use crate::header::{classify, parse_line, LineKind};
use crate::stats_line::decode_stats;
use crate::table::{assemble, check_parameter_schema, Table};
use crate::types::{FreqRecord, ParseError, StatsRecord};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// How the parser reacts to lines it cannot make sense of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Any malformed or unknown line aborts the whole parse.
    Strict,
    /// Unknown lines and bad frequency tuples are reported and skipped.
    /// Header-grammar failures still abort: they mean the line's framing is
    /// broken, not just its trailing shape.
    #[default]
    Lenient,
}

/// Receives the lines the lenient policy recovers from. Injectable so the
/// recovered-error reporting can be captured in tests rather than only
/// printed.
pub trait DiagnosticSink {
    fn report(&mut self, raw_line: &str, error: &ParseError);
}

/// Production sink: one warning per recovered line.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&mut self, raw_line: &str, error: &ParseError) {
        warn!("skipping line \"{raw_line}\": {error}");
    }
}

/// Buffers recovered lines and their errors in memory.
#[derive(Debug, Default)]
pub struct CapturingSink {
    pub reports: Vec<(String, String)>,
}

impl DiagnosticSink for CapturingSink {
    fn report(&mut self, raw_line: &str, error: &ParseError) {
        self.reports.push((raw_line.to_string(), error.to_string()));
    }
}

/// Finished output of one parse: both tables plus the shared ordered
/// parameter-column names.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLog {
    pub stats: Table,
    pub freq: Table,
    pub parameters: Vec<String>,
}

/// Single-pass, line-ordered parser over one simulation log.
pub struct LogParser {
    policy: ErrorPolicy,
}

impl LogParser {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }

    /// Parse one simulation log file.
    pub fn parse_file(
        &self,
        path: impl AsRef<Path>,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<ParsedLog, ParseError> {
        let path = path.as_ref();
        info!("Parsing simulation log {}", path.display());
        let file = File::open(path)?;
        self.parse_reader(BufReader::new(file), sink)
    }

    /// Parse from any buffered reader, strictly in line order. Row order in
    /// the output tables equals line order in the input.
    pub fn parse_reader<R: BufRead>(
        &self,
        reader: R,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<ParsedLog, ParseError> {
        let mut stats_records: Vec<StatsRecord> = Vec::new();
        let mut freq_records: Vec<FreqRecord> = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            self.parse_one_line(&line, &mut stats_records, &mut freq_records, sink)?;
        }

        info!(
            "Parsed {} stats records and {} frequency records",
            stats_records.len(),
            freq_records.len()
        );

        let (stats, stats_params) = assemble(&stats_records);
        let (freq, freq_params) = assemble(&freq_records);

        // An empty table constrains nothing; only two populated tables can
        // disagree on their parameter scheme.
        if !stats.is_empty() && !freq.is_empty() {
            check_parameter_schema(&stats_params, &freq_params)?;
        }
        let parameters = if stats.is_empty() { freq_params } else { stats_params };

        Ok(ParsedLog {
            stats,
            freq,
            parameters,
        })
    }

    fn parse_one_line(
        &self,
        line: &str,
        stats_records: &mut Vec<StatsRecord>,
        freq_records: &mut Vec<FreqRecord>,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<(), ParseError> {
        let (header, measurement) = parse_line(line)?;

        // A header with nothing after the timestamp is a snapshot with zero
        // observations; it contributes no rows under either policy.
        if measurement.is_empty() {
            debug!(
                "empty measurement for {}-{} at {}",
                header.protocol, header.metric, header.time
            );
            return Ok(());
        }

        match classify(measurement) {
            LineKind::Stats => {
                stats_records.push(decode_stats(header, measurement)?);
            }
            LineKind::Frequency => match decode_freq(&header, measurement) {
                Ok(records) => freq_records.extend(records),
                Err(error) if self.policy == ErrorPolicy::Lenient => sink.report(line, &error),
                Err(error) => return Err(error),
            },
            LineKind::Unknown => {
                let error = ParseError::UnknownLineShape {
                    line: line.to_string(),
                };
                match self.policy {
                    ErrorPolicy::Lenient => sink.report(line, &error),
                    ErrorPolicy::Strict => return Err(error),
                }
            }
        }
        Ok(())
    }
}

/// Parse a simulation log with the given policy, reporting recovered lines
/// through tracing.
pub fn parse(path: impl AsRef<Path>, policy: ErrorPolicy) -> Result<ParsedLog, ParseError> {
    let mut sink = TracingSink;
    LogParser::new(policy).parse_file(path, &mut sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;
    use std::io::Cursor;

    const SAMPLE_LOG: &str = "\
control.core-transactions: NETWORK_SIZE 10 SEED 1 [0] Infinity -Infinity 0 NaN 0.0 0 0
control.core-blockchain: NETWORK_SIZE 10 SEED 1 [0] (0,10)

control.topology-messages-addr: NETWORK_SIZE 100 SEED 1 [1080000] 3.0 17.0 100 8.49 11.2 4 3
control.core-blockchain: NETWORK_SIZE 100 SEED 1 [720000] (0,108) (1,100)
control.core-blockchain: NETWORK_SIZE 100 SEED 1 [720000]
";

    fn parse_str(input: &str, policy: ErrorPolicy) -> Result<ParsedLog, ParseError> {
        let mut sink = CapturingSink::default();
        LogParser::new(policy).parse_reader(Cursor::new(input), &mut sink)
    }

    fn parse_with_sink(input: &str, policy: ErrorPolicy) -> (Result<ParsedLog, ParseError>, CapturingSink) {
        let mut sink = CapturingSink::default();
        let result = LogParser::new(policy).parse_reader(Cursor::new(input), &mut sink);
        (result, sink)
    }

    #[test]
    fn parses_sample_log() {
        let log = parse_str(SAMPLE_LOG, ErrorPolicy::Strict).unwrap();

        assert_eq!(log.parameters, vec!["network_size", "seed"]);
        assert_eq!(log.stats.len(), 2);
        assert_eq!(log.freq.len(), 3);

        assert_eq!(log.stats.cell(0, "protocol"), Some(&Value::Text("core".to_string())));
        assert_eq!(log.stats.cell(0, "metric"), Some(&Value::Text("transactions".to_string())));
        assert_eq!(log.stats.cell(0, "min"), Some(&Value::Float(f64::INFINITY)));
        assert_eq!(log.stats.cell(0, "max"), Some(&Value::Float(f64::NEG_INFINITY)));
        assert_eq!(log.stats.cell(0, "mean"), Some(&Value::Float(f64::NAN)));
        assert_eq!(log.stats.cell(1, "time"), Some(&Value::Int(1_080_000)));
        assert_eq!(log.stats.cell(1, "network_size"), Some(&Value::Float(100.0)));

        assert_eq!(log.freq.cell(0, "value"), Some(&Value::Int(0)));
        assert_eq!(log.freq.cell(0, "frequency"), Some(&Value::Int(10)));
        assert_eq!(log.freq.cell(2, "value"), Some(&Value::Int(1)));
        assert_eq!(log.freq.cell(2, "frequency"), Some(&Value::Int(100)));
    }

    #[test]
    fn stats_and_freq_share_parameter_columns() {
        let log = parse_str(SAMPLE_LOG, ErrorPolicy::Strict).unwrap();
        let stats_params: Vec<&String> = log.stats.columns().iter().take(2).collect();
        let freq_params: Vec<&String> = log.freq.columns().iter().take(2).collect();
        assert_eq!(stats_params, freq_params);
    }

    #[test]
    fn parsing_is_idempotent() {
        let first = parse_str(SAMPLE_LOG, ErrorPolicy::Lenient).unwrap();
        let second = parse_str(SAMPLE_LOG, ErrorPolicy::Lenient).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_line_is_policy_governed() {
        let input = "control.core-blockchain: SEED 1 [0] what is this\n";

        let (result, sink) = parse_with_sink(input, ErrorPolicy::Lenient);
        let log = result.unwrap();
        assert!(log.stats.is_empty() && log.freq.is_empty());
        assert_eq!(sink.reports.len(), 1);
        assert!(sink.reports[0].1.contains("unknown line shape"));

        let err = parse_str(input, ErrorPolicy::Strict).unwrap_err();
        assert!(matches!(err, ParseError::UnknownLineShape { .. }));
    }

    #[test]
    fn bad_tuple_recovered_under_lenient_fatal_under_strict() {
        let input = "\
control.topology-messages-ping: SEED 1 [0] 48.0 198.0 100 124.5 544.02 2 4
control.core-blockchain: SEED 1 [0] (0,167) (oops,100)
";

        let (result, sink) = parse_with_sink(input, ErrorPolicy::Lenient);
        let log = result.unwrap();
        assert_eq!(log.stats.len(), 1);
        assert!(log.freq.is_empty());
        assert_eq!(sink.reports.len(), 1);
        assert!(sink.reports[0].0.contains("(oops,100)"));

        let err = parse_str(input, ErrorPolicy::Strict).unwrap_err();
        assert!(matches!(err, ParseError::MalformedFrequencyTuple { .. }));
    }

    #[test]
    fn malformed_header_aborts_even_lenient() {
        let err = parse_str("garbage without separator\n", ErrorPolicy::Lenient).unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));
    }

    #[test]
    fn empty_measurement_contributes_no_rows() {
        let input = "control.core-blockchain: SEED 1 [480000]\n";
        for policy in [ErrorPolicy::Lenient, ErrorPolicy::Strict] {
            let (result, sink) = parse_with_sink(input, policy);
            let log = result.unwrap();
            assert!(log.freq.is_empty());
            assert!(sink.reports.is_empty());
        }
    }

    #[test]
    fn schema_mismatch_is_fatal_under_both_policies() {
        let input = "\
topology-messages: NETWORK_SIZE 100 [0] 1.0 2.0 3 4.0 5.0 6 7
core-blockchain: DELAY 50 [0] (0,1)
";
        for policy in [ErrorPolicy::Lenient, ErrorPolicy::Strict] {
            let err = parse_str(input, policy).unwrap_err();
            assert!(matches!(err, ParseError::ParameterSchemaMismatch { .. }));
        }
    }
}

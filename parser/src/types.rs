use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Simulation parameters decoded from one line header, keyed by lowercase
/// parameter name.
pub type ParameterMap = BTreeMap<String, f64>;

/// The part every log line shares: which protocol/metric produced it, the
/// simulation parameters it ran under, and the simulation time of the sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub protocol: String,
    pub metric: String,
    pub parameters: ParameterMap,
    pub time: u64,
}

/// Aggregate summary of one metric at one point in time.
///
/// `min`, `max`, `mean` and `variance` may legitimately hold ±infinity or
/// NaN (an empty observation window prints exactly that) and must survive
/// the pipeline unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsRecord {
    pub header: Header,
    pub min: f64,
    pub max: f64,
    pub n: i64,
    pub mean: f64,
    pub variance: f64,
    pub count_min: i64,
    pub count_max: i64,
}

/// One (value, frequency) pair of a histogram snapshot. A single log line
/// expands into one record per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreqRecord {
    pub header: Header,
    pub value: i64,
    pub frequency: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed header in line \"{line}\": {reason}")]
    MalformedHeader { line: String, reason: String },
    #[error("invalid parameter list \"{text}\": {reason}")]
    InvalidParameterList { text: String, reason: String },
    #[error("invalid timestamp \"{text}\": expected a non-negative integer")]
    InvalidTimestamp { text: String },
    #[error("malformed stats measurement \"{text}\": {reason}")]
    MalformedStatsMeasurement { text: String, reason: String },
    #[error("malformed frequency tuple \"{token}\" in \"{text}\"")]
    MalformedFrequencyTuple { token: String, text: String },
    #[error("unknown line shape: \"{line}\"")]
    UnknownLineShape { line: String },
    #[error("parameter columns differ between tables: stats {stats:?}, frequency {freq:?}")]
    ParameterSchemaMismatch { stats: Vec<String>, freq: Vec<String> },
}

use crate::types::{Header, ParseError, StatsRecord};

/// Decode the measurement text of a line already classified as stats: seven
/// space-separated fields, positionally `min max n mean variance count_min
/// count_max`.
pub fn decode_stats(header: Header, measurement: &str) -> Result<StatsRecord, ParseError> {
    let tokens: Vec<&str> = measurement.split(' ').collect();
    if tokens.len() != 7 {
        return Err(ParseError::MalformedStatsMeasurement {
            text: measurement.to_string(),
            reason: format!("expected 7 fields, found {}", tokens.len()),
        });
    }

    Ok(StatsRecord {
        min: parse_float(tokens[0], measurement)?,
        max: parse_float(tokens[1], measurement)?,
        n: parse_int(tokens[2], measurement)?,
        mean: parse_float(tokens[3], measurement)?,
        variance: parse_float(tokens[4], measurement)?,
        count_min: parse_int(tokens[5], measurement)?,
        count_max: parse_int(tokens[6], measurement)?,
        header,
    })
}

fn parse_float(token: &str, text: &str) -> Result<f64, ParseError> {
    token.parse().map_err(|_| ParseError::MalformedStatsMeasurement {
        text: text.to_string(),
        reason: format!("\"{token}\" is not a number"),
    })
}

fn parse_int(token: &str, text: &str) -> Result<i64, ParseError> {
    token.parse().map_err(|_| ParseError::MalformedStatsMeasurement {
        text: text.to_string(),
        reason: format!("\"{token}\" is not an integer"),
    })
}

use crate::types::{Header, ParameterMap, ParseError};

/// Shape of the measurement text that follows a line's header. The two real
/// shapes share the same header grammar and are told apart only by probing
/// the measurement itself: a leading numeric token means a stats summary, a
/// leading `(` means a value/frequency histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Stats,
    Frequency,
    Unknown,
}

/// Classify measurement text without ever failing: structurally absent data
/// (an empty string, a lone word) is `Unknown` and left to the error policy.
pub fn classify(measurement: &str) -> LineKind {
    if let Some(first) = measurement.split_whitespace().next() {
        // f64 parsing accepts the Infinity/-Infinity/NaN spellings the
        // simulator prints for empty observation windows.
        if first.parse::<f64>().is_ok() {
            return LineKind::Stats;
        }
    }
    if measurement.trim_start().starts_with('(') {
        LineKind::Frequency
    } else {
        LineKind::Unknown
    }
}

/// Split one non-blank log line into its header and measurement text.
///
/// Line grammar:
/// `[control.]<protocol>[-<metric>]: <NAME> <VALUE> ... [<timestamp>] <measurement>`
pub fn parse_line(line: &str) -> Result<(Header, &str), ParseError> {
    let (prefix, rest) = line.split_once(": ").ok_or_else(|| ParseError::MalformedHeader {
        line: line.to_string(),
        reason: "missing \": \" separator".to_string(),
    })?;

    let (protocol_raw, metric) = match prefix.split_once('-') {
        Some((protocol, metric)) => (protocol, metric),
        None => (prefix, ""),
    };
    let protocol = protocol_raw.strip_prefix("control.").unwrap_or(protocol_raw);

    let (params_text, trailer) = rest.split_once(" [").ok_or_else(|| ParseError::MalformedHeader {
        line: line.to_string(),
        reason: "missing \" [\" before the timestamp".to_string(),
    })?;

    // A histogram snapshot with zero pairs ends right at the closing
    // bracket, with nothing after it.
    let (time_text, measurement) = match trailer.split_once("] ") {
        Some(split) => split,
        None => match trailer.strip_suffix(']') {
            Some(time_text) => (time_text, ""),
            None => {
                return Err(ParseError::MalformedHeader {
                    line: line.to_string(),
                    reason: "missing \"]\" after the timestamp".to_string(),
                })
            }
        },
    };

    let parameters = parse_parameters(params_text)?;

    let time: u64 = time_text.parse().map_err(|_| ParseError::InvalidTimestamp {
        text: time_text.to_string(),
    })?;

    Ok((
        Header {
            protocol: protocol.to_string(),
            metric: metric.to_string(),
            parameters,
            time,
        },
        measurement.trim(),
    ))
}

/// Decode an alternating `NAME value NAME value ...` token run into a
/// parameter map. Names are lower-cased, values are floats.
pub fn parse_parameters(text: &str) -> Result<ParameterMap, ParseError> {
    let tokens: Vec<&str> = text.split(' ').collect();
    if tokens.len() % 2 != 0 {
        return Err(ParseError::InvalidParameterList {
            text: text.to_string(),
            reason: format!("odd number of tokens ({})", tokens.len()),
        });
    }

    let mut parameters = ParameterMap::new();
    for pair in tokens.chunks(2) {
        let value: f64 = pair[1].parse().map_err(|_| ParseError::InvalidParameterList {
            text: text.to_string(),
            reason: format!("\"{}\" is not a numeric value", pair[1]),
        })?;
        parameters.insert(pair[0].to_lowercase(), value);
    }
    Ok(parameters)
}

use crate::types::{FreqRecord, Header, ParseError};

/// Decode the measurement text of a line already classified as frequency: a
/// space-separated run of `(value,frequency)` pairs, one record per pair.
/// An empty measurement is a snapshot with zero observations and yields no
/// records.
pub fn decode_freq(header: &Header, measurement: &str) -> Result<Vec<FreqRecord>, ParseError> {
    if measurement.is_empty() {
        return Ok(Vec::new());
    }

    measurement
        .split(' ')
        .map(|token| {
            let (value, frequency) = parse_pair(token, measurement)?;
            Ok(FreqRecord {
                header: header.clone(),
                value,
                frequency,
            })
        })
        .collect()
}

fn parse_pair(token: &str, text: &str) -> Result<(i64, i64), ParseError> {
    let malformed = || ParseError::MalformedFrequencyTuple {
        token: token.to_string(),
        text: text.to_string(),
    };

    let inner = token
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(malformed)?;
    let (value, frequency) = inner.split_once(',').ok_or_else(malformed)?;
    if frequency.contains(',') {
        return Err(malformed());
    }

    let value = value.parse().map_err(|_| malformed())?;
    let frequency = frequency.parse().map_err(|_| malformed())?;
    Ok((value, frequency))
}

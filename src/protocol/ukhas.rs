//! # UKHAS ASCII Sentences
//!
//! Parsing and validation of `$$<fields>*<CRC16>` sentences, and
//! extraction of the position fields relayed to OziMux.

use chrono::NaiveTime;

use super::crc::crc16_ccitt_hex;
use crate::error::{HorusError, Result};

/// Sentence start marker
pub const SENTENCE_PREFIX: &str = "$$";

/// Separator between the sentence body and its checksum
pub const CHECKSUM_SEPARATOR: char = '*';

/// Highest altitude a payload can report (altitude is a u16 on air)
pub const MAX_ALTITUDE: i64 = 65535;

/// A UKHAS sentence whose checksum has been verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UkhasSentence {
    /// Everything between the `$$` prefix and the `*`
    pub body: String,
    /// Checksum suffix as received
    pub checksum: String,
}

impl UkhasSentence {
    /// Comma-separated fields of the body
    pub fn fields(&self) -> Vec<&str> {
        self.body.split(',').collect()
    }
}

/// Position fields taken from a validated sentence
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    /// Time of day, `HH:MM:SS`
    pub time: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in metres
    pub altitude: i64,
}

impl PositionReport {
    /// Format as an OziMux `TELEMETRY` line
    ///
    /// ```
    /// use horus_relay::protocol::ukhas::PositionReport;
    ///
    /// let report = PositionReport {
    ///     time: "12:00:00".to_string(),
    ///     latitude: -34.91,
    ///     longitude: 138.6,
    ///     altitude: 100,
    /// };
    /// assert_eq!(report.to_ozimux_line(), "TELEMETRY,12:00:00,-34.91000,138.60000,100\n");
    /// ```
    pub fn to_ozimux_line(&self) -> String {
        format!(
            "TELEMETRY,{},{:.5},{:.5},{}\n",
            self.time, self.latitude, self.longitude, self.altitude
        )
    }
}

/// Returns true if a line should be handled as an ASCII sentence rather
/// than a hex-encoded binary record
pub fn is_ukhas_line(line: &str) -> bool {
    line.starts_with(SENTENCE_PREFIX)
}

/// Locate the sentence in a raw line and verify its checksum
///
/// Anything before the last `$$` is discarded, so leading noise and runs of
/// any number of `$` are tolerated.
///
/// # Errors
///
/// Returns error if:
/// - There is no sentence body or no `*` separator (`ParseFail`)
/// - The checksum suffix does not match the body (`ChecksumFail`)
pub fn parse_sentence(line: &str) -> Result<UkhasSentence> {
    let trimmed = line.trim();

    let mut sentence = match trimmed.rfind(SENTENCE_PREFIX) {
        Some(start) => &trimmed[start + SENTENCE_PREFIX.len()..],
        None => trimmed,
    };
    // Odd number of leading '$'
    if let Some(rest) = sentence.strip_prefix('$') {
        sentence = rest;
    }

    if sentence.is_empty() {
        return Err(HorusError::ParseFail("empty sentence".to_string()));
    }

    let (body, suffix) = sentence
        .split_once(CHECKSUM_SEPARATOR)
        .ok_or_else(|| HorusError::ParseFail("no checksum separator".to_string()))?;
    // Anything after a second '*' is not part of the checksum
    let checksum = suffix.split(CHECKSUM_SEPARATOR).next().unwrap_or_default();

    // ASCII checksums are compared as hex text
    let calculated = crc16_ccitt_hex(body.as_bytes());
    if !checksum.trim().eq_ignore_ascii_case(&calculated) {
        return Err(HorusError::ChecksumFail {
            received: checksum.to_string(),
            calculated,
        });
    }

    Ok(UkhasSentence {
        body: body.to_string(),
        checksum: checksum.to_string(),
    })
}

/// Extract and sanity-check the position fields of a validated sentence
///
/// Fields used: 2 = time, 3 = latitude, 4 = longitude, 5 = altitude.
///
/// # Errors
///
/// Returns error if:
/// - A field is missing or does not parse (`ParseFail`)
/// - The time is not a valid 24h `HH:MM:SS` (`InvalidTime`)
/// - Latitude or longitude is exactly 0.0 (`ZeroPosition`)
/// - Altitude is outside 0..=65535 (`InvalidAltitude`)
pub fn extract_position(sentence: &UkhasSentence) -> Result<PositionReport> {
    let fields = sentence.fields();
    if fields.len() < 6 {
        return Err(HorusError::ParseFail(format!(
            "expected at least 6 fields, got {}",
            fields.len()
        )));
    }

    let time = fields[2].trim();
    let latitude: f64 = fields[3]
        .trim()
        .parse()
        .map_err(|_| HorusError::ParseFail(format!("latitude '{}'", fields[3])))?;
    let longitude: f64 = fields[4]
        .trim()
        .parse()
        .map_err(|_| HorusError::ParseFail(format!("longitude '{}'", fields[4])))?;
    let altitude: i64 = fields[5]
        .trim()
        .parse()
        .map_err(|_| HorusError::ParseFail(format!("altitude '{}'", fields[5])))?;

    if NaiveTime::parse_from_str(time, "%H:%M:%S").is_err() {
        return Err(HorusError::InvalidTime(time.to_string()));
    }

    if latitude == 0.0 || longitude == 0.0 {
        return Err(HorusError::ZeroPosition);
    }

    if !(0..=MAX_ALTITUDE).contains(&altitude) {
        return Err(HorusError::InvalidAltitude(altitude));
    }

    Ok(PositionReport {
        time: time.to_string(),
        latitude,
        longitude,
        altitude,
    })
}

/// Normalize a sentence for upload
///
/// Strips any leading run of `$`, re-prefixes exactly `$$`, and ends the
/// sentence with exactly one newline.
///
/// ```
/// use horus_relay::protocol::ukhas::normalize_sentence;
///
/// assert_eq!(normalize_sentence("$$$$FOO,1,2,3"), "$$FOO,1,2,3\n");
/// assert_eq!(normalize_sentence("FOO,1,2,3"), "$$FOO,1,2,3\n");
/// ```
pub fn normalize_sentence(sentence: &str) -> String {
    let data = sentence
        .trim_start_matches('$')
        .trim_end_matches(|c| c == '\n' || c == '\r');

    format!("{}{}\n", SENTENCE_PREFIX, data)
}

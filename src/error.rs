//! # Error Types
//!
//! Custom error types for Horus Relay using `thiserror`.
//!
//! Every variant maps to one way a packet can be dropped or a background
//! operation can fail. None of them are fatal to the ingest loop.

use thiserror::Error;

/// Main error type for Horus Relay
#[derive(Debug, Error)]
pub enum HorusError {
    /// Binary record has the wrong size, or its hex text did not decode
    #[error("Malformed binary record: {0}")]
    MalformedRecord(String),

    /// Binary record CRC does not match the transmitted checksum
    #[error("Checksum mismatch - RX: 0x{received:04X}, calculated: 0x{calculated:04X}")]
    ChecksumMismatch { received: u16, calculated: u16 },

    /// Payload ID is not present in the payload ID table
    #[error("Unknown payload ID {0}")]
    UnknownPayloadId(u8),

    /// ASCII sentence CRC suffix does not match the body
    #[error("CRC fail - RX: {received}, calculated: {calculated}")]
    ChecksumFail { received: String, calculated: String },

    /// ASCII sentence is structurally broken or a field does not parse
    #[error("Parse fail: {0}")]
    ParseFail(String),

    /// ASCII sentence time field is not a valid HH:MM:SS
    #[error("Invalid time: {0}")]
    InvalidTime(String),

    /// Latitude or longitude is exactly zero (no GPS fix)
    #[error("Zero latitude/longitude")]
    ZeroPosition,

    /// Altitude outside the 0-65535 m range
    #[error("Invalid altitude: {0}")]
    InvalidAltitude(i64),

    /// Upload queue was full, sentence dropped
    #[error("Upload queue full, sentence dropped")]
    QueueOverflow,

    /// Upload worker has gone away, nothing will drain the queue
    #[error("Upload worker has stopped")]
    UploaderStopped,

    /// Habitat kept answering 409 until the retry limit ran out
    #[error("Upload conflict not resolved with {0} retries")]
    UploadConflictExhausted(u32),

    /// Could not reach Habitat at all (timeout, DNS, refused)
    #[error("Upload failed: {0}")]
    UploadConnectionFailed(String),

    /// Habitat answered with a status that is neither success nor conflict
    #[error("Upload rejected with status code {0}")]
    UploadRejected(u16),

    /// UDP fan-out send failed on both broadcast and loopback
    #[error("UDP emit failed: {0}")]
    EmitFailed(String),

    /// Payload ID list could not be fetched or read
    #[error("Payload ID list error: {0}")]
    PayloadList(String),

    /// Listener information/position upload failed
    #[error("Listener upload error: {0}")]
    ListenerUpload(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Horus Relay
pub type Result<T> = std::result::Result<T, HorusError>;

//! # Horus Relay Library
//!
//! Relay balloon telemetry from a FSK demodulator to Habitat and local tools.
//!
//! Demodulator output (hex-encoded Horus Binary records or UKHAS ASCII
//! sentences) is decoded and validated, then uploaded to Habitat through a
//! bounded queue and broadcast over UDP to OziMux and Horus UDP listeners.

pub mod config;
pub mod error;
pub mod habitat;
pub mod ingest;
pub mod payload_list;
pub mod protocol;
pub mod shutdown;
pub mod telemetry;
pub mod udp;

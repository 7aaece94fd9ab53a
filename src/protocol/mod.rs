//! # Telemetry Protocol Module
//!
//! Wire formats handled by the relay:
//! - CRC16-CCITT checksums shared by both formats
//! - Horus Binary records (hex-encoded, one per line)
//! - UKHAS ASCII sentences (`$$...*CRC`)

pub mod binary;
pub mod crc;
pub mod ukhas;

//! # Horus Binary Packet Codec
//!
//! Decodes 22-byte Horus Binary telemetry records into typed telemetry and a
//! UKHAS sentence, and encodes synthetic records for test transmissions.
//!
//! Record layout (all multi-byte fields little-endian):
//!
//! ```text
//! offset  size  field
//!      0     1  payload id
//!      1     2  packet counter
//!      3     3  hours, minutes, seconds
//!      6     4  latitude (f32)
//!     10     4  longitude (f32)
//!     14     2  altitude (m)
//!     16     1  speed (kt)
//!     17     1  satellites
//!     18     1  temperature (i8, deg C)
//!     19     1  battery voltage (0 = 0 V, 255 = 5.0 V)
//!     20     2  CRC16-CCITT over bytes 0..20
//! ```

use bytes::{Buf, BufMut};
use tracing::info;

use super::crc::{crc16_ccitt, crc16_ccitt_hex};
use crate::error::{HorusError, Result};
use crate::payload_list::PayloadIdTable;

/// Total size of a Horus Binary record
pub const HORUS_BINARY_PACKET_SIZE: usize = 22;

/// Size of the record body covered by the checksum
pub const HORUS_BINARY_CRC_OFFSET: usize = HORUS_BINARY_PACKET_SIZE - 2;

/// Battery voltage at a raw reading of 255
pub const BATT_VOLTAGE_FULL_SCALE: f64 = 5.0;

/// Raw fields of a Horus Binary record, exactly as transmitted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinaryPacket {
    pub payload_id: u8,
    pub counter: u16,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: u16,
    pub speed: u8,
    pub sats: u8,
    pub temp: i8,
    pub batt_voltage_raw: u8,
    pub checksum: u16,
}

impl BinaryPacket {
    /// Unpack a record from its wire form
    ///
    /// Only the layout is checked here; the checksum is left for
    /// [`decode_binary_packet`] to validate.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` if `data` is not exactly 22 bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != HORUS_BINARY_PACKET_SIZE {
            return Err(HorusError::MalformedRecord(format!(
                "expected {} bytes, got {}",
                HORUS_BINARY_PACKET_SIZE,
                data.len()
            )));
        }

        let mut buf = data;

        Ok(Self {
            payload_id: buf.get_u8(),
            counter: buf.get_u16_le(),
            hours: buf.get_u8(),
            minutes: buf.get_u8(),
            seconds: buf.get_u8(),
            latitude: buf.get_f32_le(),
            longitude: buf.get_f32_le(),
            altitude: buf.get_u16_le(),
            speed: buf.get_u8(),
            sats: buf.get_u8(),
            temp: buf.get_i8(),
            batt_voltage_raw: buf.get_u8(),
            checksum: buf.get_u16_le(),
        })
    }

    /// Pack the record into its wire form, with a freshly computed checksum
    ///
    /// The `checksum` field of `self` is ignored.
    ///
    /// ```
    /// use horus_relay::protocol::binary::{BinaryPacket, HORUS_BINARY_PACKET_SIZE};
    ///
    /// let packet = BinaryPacket {
    ///     payload_id: 1, counter: 1, hours: 0, minutes: 0, seconds: 0,
    ///     latitude: -34.9, longitude: 138.6, altitude: 100, speed: 0,
    ///     sats: 8, temp: 20, batt_voltage_raw: 180, checksum: 0,
    /// };
    /// assert_eq!(packet.to_bytes().len(), HORUS_BINARY_PACKET_SIZE);
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HORUS_BINARY_PACKET_SIZE);
        buf.put_u8(self.payload_id);
        buf.put_u16_le(self.counter);
        buf.put_u8(self.hours);
        buf.put_u8(self.minutes);
        buf.put_u8(self.seconds);
        buf.put_f32_le(self.latitude);
        buf.put_f32_le(self.longitude);
        buf.put_u16_le(self.altitude);
        buf.put_u8(self.speed);
        buf.put_u8(self.sats);
        buf.put_i8(self.temp);
        buf.put_u8(self.batt_voltage_raw);

        let crc = crc16_ccitt(&buf);
        buf.put_u16_le(crc);
        buf
    }
}

/// Decoded telemetry from a validated binary record
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub payload_id: u8,
    /// Callsign looked up from the payload ID table
    pub callsign: String,
    pub counter: u16,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    /// Latitude in degrees
    pub latitude: f32,
    /// Longitude in degrees
    pub longitude: f32,
    /// Altitude in metres
    pub altitude: u16,
    /// Speed in knots
    pub speed: u8,
    pub sats: u8,
    /// Temperature in deg C
    pub temp: i8,
    pub batt_voltage_raw: u8,
    /// Battery voltage in volts, derived from `batt_voltage_raw`
    pub batt_voltage: f64,
    pub checksum: u16,
}

impl TelemetryRecord {
    /// Time of day as `HH:MM:SS`
    pub fn time(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }

    /// Render the record as a UKHAS sentence, including `*CRC` and newline
    pub fn to_sentence(&self) -> String {
        let body = format!(
            "{},{},{},{:.5},{:.5},{},{},{},{},{:.2}",
            self.callsign,
            self.counter,
            self.time(),
            self.latitude,
            self.longitude,
            self.altitude,
            self.speed,
            self.sats,
            self.temp,
            self.batt_voltage,
        );
        let checksum = crc16_ccitt_hex(body.as_bytes());

        format!("$${}*{}\n", body, checksum)
    }
}

/// Convert a raw battery reading to volts (0 = 0.0 V, 255 = 5.0 V)
pub fn batt_voltage_from_raw(raw: u8) -> f64 {
    BATT_VOLTAGE_FULL_SCALE * raw as f64 / 255.0
}

/// Decode a hex-encoded binary record (one line of demodulator output)
///
/// # Errors
///
/// Returns `MalformedRecord` if the text is not valid hex, otherwise any
/// error from [`decode_binary_packet`]
pub fn decode_hex_packet(line: &str, payloads: &PayloadIdTable) -> Result<(String, TelemetryRecord)> {
    let data = hex::decode(line.trim())
        .map_err(|e| HorusError::MalformedRecord(format!("invalid hex ({}): {}", e, line.trim())))?;

    decode_binary_packet(&data, payloads)
}

/// Decode and validate a binary record
///
/// # Arguments
///
/// * `data` - Raw record bytes (22 bytes)
/// * `payloads` - Payload ID to callsign table
///
/// # Returns
///
/// * `Result<(String, TelemetryRecord)>` - The UKHAS sentence and the decoded record
///
/// # Errors
///
/// Returns error if:
/// - Record is not 22 bytes (`MalformedRecord`)
/// - CRC over the first 20 bytes differs from the trailing checksum (`ChecksumMismatch`)
/// - Payload ID is not in the table (`UnknownPayloadId`)
pub fn decode_binary_packet(data: &[u8], payloads: &PayloadIdTable) -> Result<(String, TelemetryRecord)> {
    let packet = BinaryPacket::parse(data)?;

    // Binary checksums are compared as integers, not as hex text
    let calculated = crc16_ccitt(&data[..HORUS_BINARY_CRC_OFFSET]);
    if calculated != packet.checksum {
        return Err(HorusError::ChecksumMismatch {
            received: packet.checksum,
            calculated,
        });
    }

    let callsign = payloads
        .callsign(packet.payload_id)
        .ok_or(HorusError::UnknownPayloadId(packet.payload_id))?
        .to_string();

    let record = TelemetryRecord {
        payload_id: packet.payload_id,
        callsign,
        counter: packet.counter,
        hours: packet.hours,
        minutes: packet.minutes,
        seconds: packet.seconds,
        latitude: packet.latitude,
        longitude: packet.longitude,
        altitude: packet.altitude,
        speed: packet.speed,
        sats: packet.sats,
        temp: packet.temp,
        batt_voltage_raw: packet.batt_voltage_raw,
        batt_voltage: batt_voltage_from_raw(packet.batt_voltage_raw),
        checksum: packet.checksum,
    };

    let sentence = record.to_sentence();
    info!("Decoded Binary Telemetry as: {}", sentence.trim_end());

    Ok((sentence, record))
}

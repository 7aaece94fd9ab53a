//! # CRC16-CCITT Implementation
//!
//! CRC-16/CCITT-FALSE checksum used by both Horus Binary records and UKHAS
//! ASCII sentences.
//!
//! **Polynomial**: 0x1021 (x^16 + x^12 + x^5 + 1)
//! **Initial Value**: 0xFFFF
//! **Reflection**: none, no final XOR

/// CRC-16/CCITT polynomial
const CRC16_POLY: u16 = 0x1021;

/// CRC-16/CCITT-FALSE initial register value
const CRC16_INIT: u16 = 0xFFFF;

/// Precomputed CRC16 lookup table (MSB-first)
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate CRC16-CCITT-FALSE checksum using lookup table
///
/// # Arguments
///
/// * `data` - Byte slice to checksum
///
/// # Returns
///
/// * `u16` - Calculated checksum
///
/// # Examples
///
/// ```
/// use horus_relay::protocol::crc::crc16_ccitt;
///
/// assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
/// ```
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        let index = ((crc >> 8) as u8 ^ byte) as usize;
        crc = (crc << 8) ^ CRC16_TABLE[index];
    }

    crc
}

/// Calculate CRC16-CCITT-FALSE and render it as 4 uppercase hex digits
///
/// This is the form appended to UKHAS sentences after the `*`.
///
/// ```
/// use horus_relay::protocol::crc::crc16_ccitt_hex;
///
/// assert_eq!(crc16_ccitt_hex(b"123456789"), "29B1");
/// ```
pub fn crc16_ccitt_hex(data: &[u8]) -> String {
    format!("{:04X}", crc16_ccitt(data))
}

/// Bitwise reference implementation, used to cross-check the table
#[cfg(test)]
fn crc16_ccitt_slow(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= (byte as u16) << 8;

        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

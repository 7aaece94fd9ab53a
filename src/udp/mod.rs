//! # UDP Fan-out Module
//!
//! Best-effort UDP broadcasts to local listeners:
//! - OziMux position lines (`TELEMETRY,<time>,<lat>,<lon>,<alt>`)
//! - Horus UDP payload summary JSON
//!
//! Each send opens a fresh socket, tries the broadcast address, falls back to
//! loopback if the broadcast send fails (e.g. no network interface up), then
//! closes the socket. Failures are logged and never reach the caller.

use serde::Serialize;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{HorusError, Result};
use crate::protocol::binary::TelemetryRecord;
use crate::protocol::ukhas::PositionReport;

/// Upper bound on how long a single send may stall the caller
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Comment attached to summaries of decoded binary packets
pub const SUMMARY_COMMENT: &str = "Horus Binary";

/// One-shot UDP sender for a single destination port
#[derive(Debug, Clone)]
pub struct UdpEmitter {
    target: Ipv4Addr,
    port: u16,
}

impl UdpEmitter {
    /// Emitter sending to `target:port` (normally the broadcast address)
    pub fn new(target: Ipv4Addr, port: u16) -> Self {
        Self { target, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send one datagram, retrying once to loopback if the first send fails
    ///
    /// # Errors
    ///
    /// Returns `EmitFailed` if the socket cannot be opened or both sends fail
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let socket = open_socket()
            .map_err(|e| HorusError::EmitFailed(format!("could not open socket: {}", e)))?;

        let primary = SockAddr::from(SocketAddrV4::new(self.target, self.port));
        if let Err(e) = socket.send_to(payload, &primary) {
            warn!(
                "Send to {}:{} failed ({}), sending to localhost instead.",
                self.target, self.port, e
            );
            let fallback = SockAddr::from(SocketAddrV4::new(Ipv4Addr::LOCALHOST, self.port));
            socket
                .send_to(payload, &fallback)
                .map_err(|e| HorusError::EmitFailed(format!("localhost send failed: {}", e)))?;
        }

        Ok(())
    }
}

/// Create a broadcast-capable UDP socket with address reuse enabled
fn open_socket() -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;
    socket.set_write_timeout(Some(SEND_TIMEOUT))?;
    try_reuse_port(&socket);

    Ok(socket)
}

/// SO_REUSEPORT is missing on some platforms, its absence is not an error
#[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
fn try_reuse_port(socket: &Socket) {
    if let Err(e) = socket.set_reuse_port(true) {
        debug!("SO_REUSEPORT not available: {}", e);
    }
}

#[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
fn try_reuse_port(_socket: &Socket) {}

/// Sends position-only telemetry to OziMux / OziPlotter
#[derive(Debug, Clone)]
pub struct OziMuxEmitter {
    emitter: UdpEmitter,
}

impl OziMuxEmitter {
    pub fn new(target: Ipv4Addr, port: u16) -> Self {
        Self {
            emitter: UdpEmitter::new(target, port),
        }
    }

    /// Emit a `TELEMETRY` line; failures are logged only
    pub fn send_position(&self, report: &PositionReport) {
        let line = report.to_ozimux_line();

        match self.emitter.send(line.as_bytes()) {
            Ok(()) => debug!(
                "Sent Telemetry to OziMux ({}): {}",
                self.emitter.port(),
                line.trim_end()
            ),
            Err(e) => error!("Failed to send OziMux packet: {}", e),
        }
    }
}

/// Horus UDP `PAYLOAD_SUMMARY` message
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PayloadSummary {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub callsign: String,
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: u16,
    pub speed: u8,
    /// Not reported by Horus Binary, always -1
    pub heading: i32,
    pub time: String,
    pub comment: &'static str,
    pub temp: i8,
    pub sats: u8,
    pub batt_voltage: f64,
}

impl From<&TelemetryRecord> for PayloadSummary {
    fn from(record: &TelemetryRecord) -> Self {
        Self {
            msg_type: "PAYLOAD_SUMMARY",
            callsign: record.callsign.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            altitude: record.altitude,
            speed: record.speed,
            heading: -1,
            time: record.time(),
            comment: SUMMARY_COMMENT,
            temp: record.temp,
            sats: record.sats,
            batt_voltage: record.batt_voltage,
        }
    }
}

/// Sends payload summaries; does nothing when no port is configured
#[derive(Debug, Clone)]
pub struct SummaryEmitter {
    emitter: Option<UdpEmitter>,
}

impl SummaryEmitter {
    /// `port` of `None` disables the channel entirely
    pub fn new(target: Ipv4Addr, port: Option<u16>) -> Self {
        Self {
            emitter: port.map(|port| UdpEmitter::new(target, port)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.emitter.is_some()
    }

    /// Emit a summary of a decoded record; failures are logged only
    pub fn send_summary(&self, record: &TelemetryRecord) {
        let Some(emitter) = &self.emitter else {
            return;
        };

        if record.latitude == 0.0 && record.longitude == 0.0 {
            error!("Horus UDP - Zero Latitude/Longitude, not sending.");
            return;
        }

        let packet = match serde_json::to_vec(&PayloadSummary::from(record)) {
            Ok(packet) => packet,
            Err(e) => {
                error!("Horus UDP - Could not encode Payload Summary: {}", e);
                return;
            }
        };

        if let Err(e) = emitter.send(&packet) {
            error!("Horus UDP - Error sending Payload Summary: {}", e);
        }
    }
}

//! # Ingest Module
//!
//! Reads demodulator output and drives every line through the pipeline.
//!
//! This module handles:
//! - Reading lines from stdin, or datagrams from a local UDP socket
//! - Classifying each line as a UKHAS sentence (`$$...`) or hex binary record
//! - Decoding/validating, then fanning out to OziMux, the payload summary
//!   listener, packet sinks and the Habitat upload queue
//!
//! Every failure is logged and the line dropped; nothing here ever blocks on
//! Habitat, which is the upload worker's job.

pub mod sink;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::BufRead;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::habitat::UploadQueue;
use crate::payload_list::PayloadIdTable;
use crate::protocol::binary::decode_hex_packet;
use crate::protocol::ukhas::{extract_position, is_ukhas_line, parse_sentence, UkhasSentence};
use crate::shutdown::Shutdown;
use crate::udp::{OziMuxEmitter, SummaryEmitter};
pub use sink::PacketSink;

/// Receive timeout on the UDP ingest socket, bounds shutdown latency
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest datagram accepted on the UDP ingest socket
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Lines buffered between the stdin reader thread and the ingest loop
pub const LINE_CHANNEL_SIZE: usize = 64;

/// What a line of demodulator output contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// UKHAS ASCII sentence
    Ukhas,
    /// Hex-encoded Horus Binary record
    Binary,
    /// Nothing to process
    Empty,
}

/// Classify a line with trailing whitespace already removed
pub fn classify(line: &str) -> LineKind {
    if line.trim().is_empty() {
        LineKind::Empty
    } else if is_ukhas_line(line) {
        LineKind::Ukhas
    } else {
        LineKind::Binary
    }
}

/// Where demodulator output comes from
#[derive(Debug)]
pub enum IngestSource {
    Stdin,
    Udp(UdpSocket),
}

/// Bind the UDP ingest socket with address (and where possible port) reuse
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns error if the socket cannot be created or bound
pub fn bind_udp(address: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    {
        // BSD-style systems need this too, failure is harmless elsewhere
        let _ = socket.set_reuse_port(true);
    }
    socket.bind(&SockAddr::from(SocketAddrV4::new(address, port)))?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    info!("Opened UDP socket on {}:{}.", address, port);
    Ok(socket)
}

/// Decode/validate/fan-out context shared by every ingested line
pub struct Pipeline {
    payloads: Arc<PayloadIdTable>,
    uploads: UploadQueue,
    ozimux: OziMuxEmitter,
    summary: SummaryEmitter,
    sinks: Vec<Box<dyn PacketSink>>,
}

impl Pipeline {
    pub fn new(
        payloads: Arc<PayloadIdTable>,
        uploads: UploadQueue,
        ozimux: OziMuxEmitter,
        summary: SummaryEmitter,
    ) -> Self {
        Self {
            payloads,
            uploads,
            ozimux,
            summary,
            sinks: Vec::new(),
        }
    }

    /// Attach an observer of the packet stream
    pub fn with_sink(mut self, sink: Box<dyn PacketSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Process one line of demodulator output
    pub fn handle_line(&self, raw: &str) {
        let line = raw.trim_end();
        let kind = classify(line);
        if kind == LineKind::Empty {
            return;
        }

        self.notify_message(line);

        match kind {
            LineKind::Ukhas => self.handle_ukhas(line),
            LineKind::Binary => self.handle_binary(line),
            LineKind::Empty => {}
        }
    }

    fn handle_ukhas(&self, line: &str) {
        info!("ASCII Sentence: {}", line);

        let sentence = match parse_sentence(line) {
            Ok(sentence) => sentence,
            Err(e) => {
                error!("Could not parse ASCII Sentence - {}", e);
                return;
            }
        };

        relay_sentence(&sentence, &self.ozimux);
        self.notify_valid_packet(&format!("{}\n", line));
        self.enqueue(line);
    }

    fn handle_binary(&self, line: &str) {
        info!("Hexadecimal Sentence: {}", line);

        let (sentence, record) = match decode_hex_packet(line, &self.payloads) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!("Could not decode binary telemetry - {}", e);
                return;
            }
        };

        relay_to_ozimux(&sentence, &self.ozimux);
        self.summary.send_summary(&record);
        self.notify_valid_packet(&sentence);
        self.enqueue(&sentence);
    }

    fn enqueue(&self, sentence: &str) {
        if let Err(e) = self.uploads.enqueue(sentence) {
            error!("Error adding sentence to upload queue: {}", e);
        }
    }

    fn notify_message(&self, line: &str) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_message(line) {
                error!("Packet sink failed on message: {}", e);
            }
        }
    }

    fn notify_valid_packet(&self, sentence: &str) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_valid_packet(sentence) {
                error!("Packet sink failed on valid packet: {}", e);
            }
        }
    }
}

/// Validate a raw sentence and forward its position to OziMux
///
/// Never fails: any problem is logged and the sentence dropped. Returns
/// whether a datagram was handed to the emitter.
pub fn relay_to_ozimux(line: &str, emitter: &OziMuxEmitter) -> bool {
    match parse_sentence(line) {
        Ok(sentence) => relay_sentence(&sentence, emitter),
        Err(e) => {
            error!("Could not parse ASCII Sentence - {}", e);
            false
        }
    }
}

fn relay_sentence(sentence: &UkhasSentence, emitter: &OziMuxEmitter) -> bool {
    match extract_position(sentence) {
        Ok(report) => {
            emitter.send_position(&report);
            true
        }
        Err(e) => {
            error!("Could not parse ASCII Sentence - {}", e);
            false
        }
    }
}

/// Run the ingest loop until end of input or shutdown
pub async fn run(source: IngestSource, pipeline: &Pipeline, shutdown: &Shutdown) -> Result<()> {
    match source {
        IngestSource::Stdin => {
            info!("Waiting for data on stdin.");
            let lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
            run_lines(lines, pipeline, shutdown).await
        }
        IngestSource::Udp(socket) => run_udp(socket, pipeline, shutdown).await,
    }
}

/// Read newline-terminated lines from `reader` on a dedicated thread
///
/// Blocking reads cannot be cancelled, so they stay off the runtime. The
/// channel closes at end of input or on a read error; the thread exits once
/// the receiver is dropped and the next line arrives.
pub fn spawn_line_reader<R>(mut reader: R) -> mpsc::Receiver<Vec<u8>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_SIZE);

    thread::spawn(move || loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Error reading input: {}", e);
                break;
            }
        }
    });

    rx
}

/// Feed lines from `lines` into the pipeline
///
/// Returns when the channel closes (end of input) or on shutdown.
pub async fn run_lines(
    mut lines: mpsc::Receiver<Vec<u8>>,
    pipeline: &Pipeline,
    shutdown: &Shutdown,
) -> Result<()> {
    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            line = lines.recv() => line,
        };

        match line {
            Some(line) => pipeline.handle_line(&String::from_utf8_lossy(&line)),
            None => {
                info!("Caught EOF, exiting.");
                break;
            }
        }
    }

    Ok(())
}

/// Feed one datagram at a time from `socket` into the pipeline
pub async fn run_udp(socket: UdpSocket, pipeline: &Pipeline, shutdown: &Shutdown) -> Result<()> {
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    while !shutdown.is_triggered() {
        match tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                error!("UDP receive error: {}", e);
            }
            Ok(Ok((len, from))) => {
                debug!("Received {} bytes from {}", len, from);
                pipeline.handle_line(&String::from_utf8_lossy(&buf[..len]));
            }
        }
    }

    Ok(())
}

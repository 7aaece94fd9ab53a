//! # Habitat Upload Module
//!
//! Queued uploader for the Habitat telemetry database.
//!
//! This module handles:
//! - A bounded FIFO of normalized sentences, fed without blocking by ingest
//! - A single worker task that drains the queue and uploads each sentence
//! - Jittered retries on upload conflicts (HTTP 409)
//! - Skipping to the newest sentence when the queue backs up
//!
//! When the queue is completely full (usually no network and a fast
//! downlink), the worker drops everything except the most recent sentence.
//! A stale position is worse than a missing one for live tracking.

pub mod listener;
pub mod transport;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{HabitatConfig, UserConfig};
use crate::error::{HorusError, Result};
use crate::protocol::ukhas::normalize_sentence;
use crate::shutdown::Shutdown;
pub use transport::{HabitatTransport, HttpTransport};

/// Worker sleep between queue checks when there is nothing to upload
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Uploader behaviour, taken from the user and habitat config sections
#[derive(Debug, Clone)]
pub struct UploaderSettings {
    /// Receiver callsign reported with every upload
    pub callsign: String,
    /// Habitat base URL
    pub url: String,
    /// Queue capacity
    pub queue_size: usize,
    /// Attempts allowed while Habitat answers 409
    pub retries: u32,
    /// Base interval for upload jitter
    pub retry_interval: Duration,
    /// Drop everything instead of queueing
    pub inhibit: bool,
}

impl UploaderSettings {
    pub fn from_config(user: &UserConfig, habitat: &HabitatConfig) -> Self {
        Self {
            callsign: user.callsign.clone(),
            url: habitat.url.clone(),
            queue_size: habitat.queue_size,
            retries: habitat.upload_retries,
            retry_interval: habitat.upload_retry_interval(),
            inhibit: habitat.inhibit,
        }
    }
}

/// Producer side of the upload queue
#[derive(Debug, Clone)]
pub struct UploadQueue {
    tx: Sender<String>,
    inhibit: bool,
}

impl UploadQueue {
    /// Normalize a sentence and queue it for upload without blocking
    ///
    /// Does nothing when uploads are inhibited.
    ///
    /// # Errors
    ///
    /// Returns `QueueOverflow` if the queue is full (the new sentence is
    /// dropped, queued sentences are kept), or `UploaderStopped` if the
    /// worker is gone
    pub fn enqueue(&self, sentence: &str) -> Result<()> {
        if self.inhibit {
            debug!("Habitat upload inhibited, not queueing sentence");
            return Ok(());
        }

        self.tx
            .try_send(normalize_sentence(sentence))
            .map_err(|e| match e {
                TrySendError::Full(_) => HorusError::QueueOverflow,
                TrySendError::Disconnected(_) => HorusError::UploaderStopped,
            })
    }

    /// Number of sentences waiting for upload
    pub fn depth(&self) -> usize {
        self.tx.len()
    }
}

/// Consumer side of the upload queue, owns all Habitat telemetry traffic
pub struct UploadWorker<T: HabitatTransport> {
    rx: Receiver<String>,
    transport: T,
    settings: UploaderSettings,
}

/// Create a linked upload queue and worker
///
/// ```
/// use horus_relay::habitat::{upload_channel, HttpTransport, UploaderSettings};
/// use horus_relay::config::Config;
/// use std::time::Duration;
///
/// let config = Config::default();
/// let settings = UploaderSettings::from_config(&config.user, &config.habitat);
/// let transport = HttpTransport::new(Duration::from_secs(10)).unwrap();
/// let (queue, _worker) = upload_channel(settings, transport);
/// queue.enqueue("$$$PAYLOAD,1,00:00:01,1.0,2.0,3*ABCD").unwrap();
/// assert_eq!(queue.depth(), 1);
/// ```
pub fn upload_channel<T: HabitatTransport>(settings: UploaderSettings, transport: T) -> (UploadQueue, UploadWorker<T>) {
    let (tx, rx) = bounded(settings.queue_size);
    let queue = UploadQueue {
        tx,
        inhibit: settings.inhibit,
    };
    let worker = UploadWorker {
        rx,
        transport,
        settings,
    };

    (queue, worker)
}

impl<T: HabitatTransport + 'static> UploadWorker<T> {
    /// Run the worker loop on the tokio runtime
    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

impl<T: HabitatTransport> UploadWorker<T> {
    /// Number of sentences waiting for upload
    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    /// Pick the next sentence to upload according to the queue policy
    ///
    /// - Queue full: drain it and keep only the newest sentence
    /// - Otherwise: pop the oldest sentence
    pub fn take_next(&self) -> Option<String> {
        let depth = self.rx.len();
        if depth == 0 {
            return None;
        }

        if depth >= self.settings.queue_size {
            let mut latest = None;
            let mut dropped = 0usize;
            while let Ok(sentence) = self.rx.try_recv() {
                if latest.replace(sentence).is_some() {
                    dropped += 1;
                }
            }

            warn!(
                "Habitat uploader queue was full - possible connectivity issue. Dropped {} stale sentences.",
                dropped
            );
            latest
        } else {
            self.rx.try_recv().ok()
        }
    }

    /// Upload one sentence, retrying on conflicts
    ///
    /// 201 and 403 (already reported by another receiver) are success. 409
    /// is retried after a jittered sleep, up to the retry limit. Anything
    /// else, or no response at all, abandons the sentence immediately.
    pub async fn upload(&self, sentence: &str) -> Result<()> {
        let sentence_b64 = BASE64.encode(sentence.as_bytes());
        let url = telemetry_url(&self.settings.url, &sentence_b64);
        let body = telemetry_envelope(&sentence_b64, &self.settings.callsign, Utc::now());

        // Desynchronize from other receivers uploading the same packet
        tokio::time::sleep(jitter(self.settings.retry_interval * 2)).await;

        let mut retries = 0;
        while retries < self.settings.retries {
            let status = self.transport.put_json(&url, &body).await.map_err(|e| match e {
                HorusError::UploadConnectionFailed(_) => e,
                other => HorusError::UploadConnectionFailed(other.to_string()),
            })?;

            match status {
                201 | 403 => {
                    info!("Habitat - Uploaded sentence to Habitat successfully");
                    return Ok(());
                }
                409 => {
                    info!("Habitat - Upload conflict.. retrying.");
                    tokio::time::sleep(jitter(self.settings.retry_interval)).await;
                    retries += 1;
                }
                other => return Err(HorusError::UploadRejected(other)),
            }
        }

        Err(HorusError::UploadConflictExhausted(retries))
    }

    /// Drain the queue until `shutdown` is triggered
    ///
    /// Pending sentences are not flushed on shutdown.
    pub async fn run(self, shutdown: Shutdown) {
        info!("Started Habitat Uploader Thread.");

        while !shutdown.is_triggered() {
            match self.take_next() {
                Some(sentence) => {
                    if let Err(e) = self.upload(&sentence).await {
                        error!("Habitat - Abandoned sentence {}: {}", sentence.trim_end(), e);
                    }
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                        _ = shutdown.triggered() => {}
                    }
                }
            }
        }

        info!("Stopped Habitat Uploader Thread.");
    }
}

/// Random duration in `[0, max)`
fn jitter(max: Duration) -> Duration {
    max.mul_f64(rand::random::<f64>())
}

/// ISO-8601 UTC timestamp with a `Z` suffix, as Habitat expects
pub fn iso_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Join a path onto the Habitat base URL
pub(crate) fn habitat_endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Document URL for a telemetry upload, keyed by the SHA-256 of the
/// base64 sentence
pub fn telemetry_url(base: &str, sentence_b64: &str) -> String {
    let digest = hex::encode(Sha256::digest(sentence_b64.as_bytes()));
    habitat_endpoint(
        base,
        &format!("habitat/_design/payload_telemetry/_update/add_listener/{}", digest),
    )
}

/// `payload_telemetry` document reporting one received sentence
pub fn telemetry_envelope(sentence_b64: &str, callsign: &str, now: DateTime<Utc>) -> Value {
    let timestamp = iso_timestamp(now);
    let mut receivers = serde_json::Map::new();
    receivers.insert(
        callsign.to_string(),
        json!({
            "time_created": timestamp,
            "time_uploaded": timestamp,
        }),
    );

    json!({
        "type": "payload_telemetry",
        "data": {
            "_raw": sentence_b64,
        },
        "receivers": receivers,
    })
}

#[cfg(test)]
mod tests {
    use super::transport::mocks::{MockResponse, MockTransport};
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    fn test_settings() -> UploaderSettings {
        UploaderSettings {
            callsign: "TEST_RX".to_string(),
            url: "http://habitat.test/".to_string(),
            queue_size: 16,
            retries: 5,
            retry_interval: Duration::ZERO,
            inhibit: false,
        }
    }

    fn channel_with(script: &[MockResponse]) -> (UploadQueue, UploadWorker<MockTransport>, MockTransport) {
        let transport = MockTransport::new(script);
        let (queue, worker) = upload_channel(test_settings(), transport.clone());
        (queue, worker, transport)
    }

    #[test]
    fn test_enqueue_normalizes() {
        let (queue, worker, _) = channel_with(&[]);

        queue.enqueue("$$$$FOO,1,2,3").unwrap();
        queue.enqueue("FOO,1,2,3").unwrap();

        assert_eq!(worker.take_next().as_deref(), Some("$$FOO,1,2,3\n"));
        assert_eq!(worker.take_next().as_deref(), Some("$$FOO,1,2,3\n"));
        assert_eq!(worker.take_next(), None);
    }

    #[test]
    fn test_enqueue_inhibited_is_noop() {
        let mut settings = test_settings();
        settings.inhibit = true;
        let (queue, worker) = upload_channel(settings, MockTransport::new(&[]));

        assert!(queue.enqueue("$$FOO,1,2,3*0000").is_ok());
        assert_eq!(worker.depth(), 0);
    }

    #[test]
    fn test_enqueue_overflow_keeps_queued_entries() {
        let (queue, worker, _) = channel_with(&[]);

        for i in 1..=16 {
            queue.enqueue(&format!("$$S,{}", i)).unwrap();
        }
        assert!(matches!(queue.enqueue("$$S,17"), Err(HorusError::QueueOverflow)));
        assert_eq!(worker.depth(), 16);
    }

    #[test]
    fn test_enqueue_after_worker_dropped() {
        let (queue, worker, _) = channel_with(&[]);
        drop(worker);

        assert!(matches!(queue.enqueue("$$S,1"), Err(HorusError::UploaderStopped)));
    }

    /// Log sink collecting formatted tracing output
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn with_captured_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .finish();

        let result = tracing::subscriber::with_default(subscriber, f);
        (result, capture.contents())
    }

    #[test]
    fn test_take_next_full_queue_keeps_newest() {
        let (queue, worker, _) = channel_with(&[]);

        for i in 1..=17 {
            let _ = queue.enqueue(&format!("$$S,{}", i));
        }

        let (next, logs) = with_captured_logs(|| worker.take_next());

        assert_eq!(next.as_deref(), Some("$$S,16\n"));
        assert!(logs.contains("WARN"), "no warning logged: {}", logs);
        assert!(logs.contains("queue was full"), "no warning logged: {}", logs);
        assert!(logs.contains("Dropped 15 stale sentences"), "unexpected log: {}", logs);
        assert_eq!(worker.depth(), 0);
        assert_eq!(worker.take_next(), None);
    }

    #[test]
    fn test_take_next_fifo_logs_no_warning() {
        let (queue, worker, _) = channel_with(&[]);
        queue.enqueue("$$S,1").unwrap();

        let (next, logs) = with_captured_logs(|| worker.take_next());

        assert_eq!(next.as_deref(), Some("$$S,1\n"));
        assert!(!logs.contains("WARN"), "unexpected warning: {}", logs);
    }

    #[test]
    fn test_take_next_one_below_capacity_is_fifo() {
        let (queue, worker, _) = channel_with(&[]);

        for i in 1..=15 {
            queue.enqueue(&format!("$$S,{}", i)).unwrap();
        }

        assert_eq!(worker.take_next().as_deref(), Some("$$S,1\n"));
        assert_eq!(worker.depth(), 14);
        assert_eq!(worker.take_next().as_deref(), Some("$$S,2\n"));
    }

    #[tokio::test]
    async fn test_upload_success() {
        let (_queue, worker, transport) = channel_with(&[MockResponse::Status(201)]);

        assert!(worker.upload("$$FOO,1*ABCD\n").await.is_ok());
        assert_eq!(transport.get_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_403_is_success() {
        let (_queue, worker, transport) = channel_with(&[MockResponse::Status(403)]);

        assert!(worker.upload("$$FOO,1*ABCD\n").await.is_ok());
        assert_eq!(transport.get_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_conflict_then_success() {
        let (queue, worker, transport) =
            channel_with(&[MockResponse::Status(409), MockResponse::Status(201)]);

        queue.enqueue("$$FOO,1*ABCD").unwrap();
        let sentence = worker.take_next().unwrap();

        assert!(worker.upload(&sentence).await.is_ok());

        let requests = transport.get_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
        assert_eq!(worker.depth(), 0);
    }

    #[tokio::test]
    async fn test_upload_conflict_exhausted() {
        let (_queue, worker, transport) = channel_with(&[MockResponse::Status(409); 6]);

        assert!(matches!(
            worker.upload("$$FOO,1*ABCD\n").await,
            Err(HorusError::UploadConflictExhausted(5))
        ));
        assert_eq!(transport.get_requests().len(), 5);
    }

    #[tokio::test]
    async fn test_upload_other_status_not_retried() {
        let (_queue, worker, transport) =
            channel_with(&[MockResponse::Status(500), MockResponse::Status(201)]);

        assert!(matches!(
            worker.upload("$$FOO,1*ABCD\n").await,
            Err(HorusError::UploadRejected(500))
        ));
        assert_eq!(transport.get_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_connection_error_not_retried() {
        let (_queue, worker, transport) =
            channel_with(&[MockResponse::ConnectionError, MockResponse::Status(201)]);

        assert!(matches!(
            worker.upload("$$FOO,1*ABCD\n").await,
            Err(HorusError::UploadConnectionFailed(_))
        ));
        assert_eq!(transport.get_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_request_contents() {
        let (_queue, worker, transport) = channel_with(&[]);
        let sentence = "$$FOO,1*ABCD\n";

        worker.upload(sentence).await.unwrap();

        let (url, body) = transport.get_requests().remove(0);
        let b64 = BASE64.encode(sentence);
        let digest = hex::encode(Sha256::digest(b64.as_bytes()));
        assert_eq!(
            url,
            format!("http://habitat.test/habitat/_design/payload_telemetry/_update/add_listener/{}", digest)
        );
        assert_eq!(body["type"], "payload_telemetry");
        assert_eq!(body["data"]["_raw"], b64);
        assert!(body["receivers"]["TEST_RX"]["time_created"].is_string());
    }

    #[tokio::test]
    async fn test_worker_run_uploads_and_stops() {
        let (queue, worker, transport) = channel_with(&[]);
        let shutdown = Shutdown::new();
        let handle = worker.spawn(shutdown.clone());

        queue.enqueue("$$FOO,1*ABCD").unwrap();
        queue.enqueue("$$FOO,2*ABCD").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while transport.get_requests().len() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .unwrap();

        let raws: Vec<Value> = transport
            .get_requests()
            .into_iter()
            .map(|(_, body)| body["data"]["_raw"].clone())
            .collect();
        assert_eq!(raws, vec![json!(BASE64.encode("$$FOO,1*ABCD\n")), json!(BASE64.encode("$$FOO,2*ABCD\n"))]);
    }

    #[test]
    fn test_telemetry_envelope_shape() {
        let now = Utc.with_ymd_and_hms(2019, 6, 1, 12, 30, 0).unwrap();
        let envelope = telemetry_envelope("JCRGT08=", "VK5QI", now);

        assert_eq!(
            envelope,
            json!({
                "type": "payload_telemetry",
                "data": { "_raw": "JCRGT08=" },
                "receivers": {
                    "VK5QI": {
                        "time_created": "2019-06-01T12:30:00.000000Z",
                        "time_uploaded": "2019-06-01T12:30:00.000000Z",
                    }
                }
            })
        );
    }

    #[test]
    fn test_habitat_endpoint_joins_cleanly() {
        assert_eq!(habitat_endpoint("http://h/", "habitat/"), "http://h/habitat/");
        assert_eq!(habitat_endpoint("http://h", "_uuids?count=10"), "http://h/_uuids?count=10");
    }

    #[test]
    fn test_jitter_within_bounds() {
        let max = Duration::from_millis(500);
        for _ in 0..100 {
            assert!(jitter(max) <= max);
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}

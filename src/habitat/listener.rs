//! # Habitat Listener Registration
//!
//! Registers the receiving station with Habitat: a `listener_information`
//! document (callsign, radio, antenna) followed by a `listener_telemetry`
//! document carrying the station position.
//!
//! Every document needs a UUID `_id`, taken from a local pool that is
//! refilled from Habitat's `_uuids` endpoint.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{habitat_endpoint, iso_timestamp};
use crate::error::{HorusError, Result};

/// UUIDs requested per refill
pub const UUID_BATCH_SIZE: usize = 10;

/// Attempts made to refill the UUID pool
pub const UUID_FETCH_ATTEMPTS: u32 = 5;

/// Pause between UUID refill attempts
pub const UUID_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct UuidResponse {
    uuids: Vec<String>,
}

/// Station identity and position to register
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerInfo {
    pub callsign: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radio: String,
    pub antenna: String,
}

/// Client for Habitat listener documents
#[derive(Debug)]
pub struct ListenerClient {
    client: reqwest::Client,
    url: String,
    uuids: Vec<String>,
    uuid_retry_delay: Duration,
}

impl ListenerClient {
    /// Create a client for the Habitat instance at `url`
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            uuids: Vec::new(),
            uuid_retry_delay: UUID_RETRY_DELAY,
        })
    }

    /// Override the pause between UUID refill attempts
    pub fn with_uuid_retry_delay(mut self, delay: Duration) -> Self {
        self.uuid_retry_delay = delay;
        self
    }

    /// Number of unused UUIDs in the pool
    pub fn uuids_available(&self) -> usize {
        self.uuids.len()
    }

    /// Refill the UUID pool, retrying a few times before giving up
    async fn fetch_uuids(&mut self) -> Result<()> {
        let url = habitat_endpoint(&self.url, &format!("_uuids?count={}", UUID_BATCH_SIZE));

        for attempt in 1..=UUID_FETCH_ATTEMPTS {
            match self.request_uuids(&url).await {
                Ok(uuids) => {
                    debug!("Habitat - Got {} UUIDs", uuids.len());
                    self.uuids.extend(uuids);
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        "Habitat - Unable to fetch UUIDs (attempt {}/{}) - {}",
                        attempt, UUID_FETCH_ATTEMPTS, e
                    );
                    if attempt < UUID_FETCH_ATTEMPTS {
                        tokio::time::sleep(self.uuid_retry_delay).await;
                    }
                }
            }
        }

        Err(HorusError::ListenerUpload(
            "gave up trying to get UUIDs".to_string(),
        ))
    }

    async fn request_uuids(&self, url: &str) -> Result<Vec<String>> {
        let response: UuidResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.uuids)
    }

    /// Post a listener document with a fresh `_id` and upload timestamp
    async fn post_listener_data(&mut self, mut doc: Value) -> Result<()> {
        if self.uuids.is_empty() {
            // A failed refill surfaces below as an empty pool
            let _ = self.fetch_uuids().await;
        }

        let uuid = self.uuids.pop().ok_or_else(|| {
            HorusError::ListenerUpload("no UUIDs available".to_string())
        })?;

        doc["_id"] = json!(uuid);
        doc["time_uploaded"] = json!(iso_timestamp(Utc::now()));

        self.client
            .post(habitat_endpoint(&self.url, "habitat/"))
            .json(&doc)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    /// Post the station's `listener_information` document
    pub async fn init_listener_callsign(&mut self, info: &ListenerInfo) -> Result<()> {
        self.post_listener_data(listener_information_doc(info)).await?;
        debug!("Habitat - Listener Callsign Initialized.");
        Ok(())
    }

    /// Register the station callsign, then upload its position
    ///
    /// Stops after the first document if Habitat cannot be reached.
    pub async fn upload_listener_position(&mut self, info: &ListenerInfo) -> Result<()> {
        self.init_listener_callsign(info).await?;
        self.post_listener_data(listener_telemetry_doc(info)).await?;
        info!("Habitat - Listener information uploaded.");
        Ok(())
    }
}

/// `listener_information` document (without `_id` / `time_uploaded`)
pub fn listener_information_doc(info: &ListenerInfo) -> Value {
    json!({
        "type": "listener_information",
        "time_created": iso_timestamp(Utc::now()),
        "data": {
            "callsign": info.callsign,
            "antenna": info.antenna,
            "radio": info.radio,
        }
    })
}

/// `listener_telemetry` document for a fixed (non-chase) station
pub fn listener_telemetry_doc(info: &ListenerInfo) -> Value {
    json!({
        "type": "listener_telemetry",
        "time_created": iso_timestamp(Utc::now()),
        "data": {
            "callsign": info.callsign,
            "chase": false,
            "latitude": info.latitude,
            "longitude": info.longitude,
            "altitude": 0,
            "speed": 0,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> ListenerInfo {
        ListenerInfo {
            callsign: "VK5QI".to_string(),
            latitude: -34.9,
            longitude: 138.6,
            radio: "FT-817".to_string(),
            antenna: "Yagi".to_string(),
        }
    }

    #[test]
    fn test_listener_information_doc() {
        let doc = listener_information_doc(&station());

        assert_eq!(doc["type"], "listener_information");
        assert_eq!(doc["data"]["callsign"], "VK5QI");
        assert_eq!(doc["data"]["radio"], "FT-817");
        assert_eq!(doc["data"]["antenna"], "Yagi");
        assert!(doc["time_created"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_listener_telemetry_doc() {
        let doc = listener_telemetry_doc(&station());

        assert_eq!(doc["type"], "listener_telemetry");
        assert_eq!(doc["data"]["chase"], false);
        assert_eq!(doc["data"]["latitude"], -34.9);
        assert_eq!(doc["data"]["longitude"], 138.6);
        assert_eq!(doc["data"]["altitude"], 0);
        assert_eq!(doc["data"]["speed"], 0);
    }

    #[tokio::test]
    async fn test_upload_fails_without_server() {
        let mut client = ListenerClient::new("http://127.0.0.1:9/", Duration::from_secs(1))
            .unwrap()
            .with_uuid_retry_delay(Duration::ZERO);

        assert!(matches!(
            client.upload_listener_position(&station()).await,
            Err(HorusError::ListenerUpload(_))
        ));
        assert_eq!(client.uuids_available(), 0);
    }
}

//! # Payload ID List
//!
//! Maps Horus Binary payload IDs to callsigns.
//!
//! The list is a text file with one `<id>,<callsign>` entry per line and
//! `#` comment lines. The latest copy is fetched from the Project Horus
//! repository at startup and cached locally; the cached copy is used when
//! the download fails.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{HorusError, Result};

/// Upstream location of the payload ID list
pub const PAYLOAD_ID_LIST_URL: &str =
    "https://raw.githubusercontent.com/projecthorus/horusbinary/master/payload_id_list.txt";

/// Text every genuine payload ID list contains
pub const PAYLOAD_ID_LIST_SIGNATURE: &str = "HORUS BINARY PAYLOAD ID LIST";

/// Timeout for the payload ID list download
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable payload ID to callsign table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadIdTable {
    entries: BTreeMap<u8, String>,
}

impl Default for PayloadIdTable {
    /// Built-in entries, always present even without a list file
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(0, "4FSKTEST".to_string());
        entries.insert(1, "HORUSBINARY".to_string());
        Self { entries }
    }
}

impl PayloadIdTable {
    /// Parse list text on top of the built-in entries
    ///
    /// Malformed lines are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut table = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let params: Vec<&str> = line.split(',').collect();
            if params.len() != 2 {
                error!("Could not parse payload ID list line: {}", line);
                continue;
            }

            match params[0].trim().parse::<u8>() {
                Ok(id) => {
                    table.entries.insert(id, params[1].trim().to_string());
                }
                Err(e) => error!("Error parsing payload ID list line '{}': {}", line, e),
            }
        }

        table
    }

    /// Read the list from a file
    ///
    /// A missing or unreadable file leaves only the built-in entries.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path.as_ref()) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                error!(
                    "Error reading payload ID list {}, does it exist? - {}",
                    path.as_ref().display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Callsign for a payload ID
    pub fn callsign(&self, id: u8) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Log every known payload ID
    pub fn log_known(&self) {
        info!("Known Payload IDs:");
        for (id, callsign) in &self.entries {
            info!("\t{} - {}", id, callsign);
        }
    }
}

/// Check that downloaded text looks like a payload ID list
fn verify_signature(text: &str, signature: &str) -> Result<()> {
    if text.contains(signature) {
        Ok(())
    } else {
        Err(HorusError::PayloadList(
            "downloaded payload ID list is invalid".to_string(),
        ))
    }
}

/// Download the latest payload ID list and overwrite the local copy
///
/// # Errors
///
/// Returns error if the download fails, the text lacks `signature`, or the
/// local file cannot be written. The local file is untouched on error.
pub async fn fetch_latest<P: AsRef<Path>>(url: &str, signature: &str, local_file: P) -> Result<()> {
    info!("Attempting to download latest payload ID list from {}", url);

    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let text = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    verify_signature(&text, signature)?;
    tokio::fs::write(local_file.as_ref(), text).await?;

    Ok(())
}

/// Refresh the local copy if possible, then load it
pub async fn update_and_load<P: AsRef<Path>>(url: &str, signature: &str, local_file: P) -> PayloadIdTable {
    match fetch_latest(url, signature, local_file.as_ref()).await {
        Ok(()) => info!("Payload ID list updated successfully."),
        Err(e) => warn!("Could not update payload ID list, using local copy: {}", e),
    }

    PayloadIdTable::load(local_file)
}

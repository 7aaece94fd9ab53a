//! Capability interface for collaborators observing the packet stream

use crate::error::Result;

/// Observer of ingested lines and validated packets
///
/// Errors returned by a sink are logged by the pipeline and otherwise
/// ignored; a failing sink never stops ingestion.
#[cfg_attr(test, mockall::automock)]
pub trait PacketSink: Send + Sync {
    /// Called with every non-empty input line
    fn on_message(&self, _line: &str) -> Result<()> {
        Ok(())
    }

    /// Called with each sentence that passed validation, newline-terminated
    fn on_valid_packet(&self, _sentence: &str) -> Result<()> {
        Ok(())
    }
}

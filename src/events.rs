//! Upload event channel
//!
//! Each upload call returns an [`UploadHandle`] immediately, before
//! validation runs; every stage reports through it. Events buffer in an
//! unbounded channel, so an observer that attaches late still sees the full
//! history, including the single terminal event.

use crate::api::JobDescriptor;
use crate::error::UploadError;
use crate::progress::ProgressSample;
use tokio::sync::mpsc;

/// One event on the upload channel
///
/// A call emits zero or more `Progress` events followed by exactly one
/// terminal event (`Failed` or `Finished`). Nothing follows a terminal event.
#[derive(Debug)]
pub enum UploadEvent {
    /// Periodic transfer measurement
    Progress(ProgressSample),
    /// The upload failed; terminal
    Failed(UploadError),
    /// The hosting service accepted the upload as a processing job; terminal
    Finished(JobDescriptor),
}

impl UploadEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadEvent::Failed(_) | UploadEvent::Finished(_))
    }
}

/// Observable side of one upload call
///
/// Returned before any stage runs. Dropping the handle does not cancel the
/// upload; to cancel, abort the source stream instead.
pub struct UploadHandle {
    events: mpsc::UnboundedReceiver<UploadEvent>,
}

impl UploadHandle {
    pub(crate) fn new(events: mpsc::UnboundedReceiver<UploadEvent>) -> Self {
        Self { events }
    }

    /// Receive the next event, `None` once the terminal event was consumed
    pub async fn recv(&mut self) -> Option<UploadEvent> {
        self.events.recv().await
    }

    /// Drain progress events and return the terminal outcome
    pub async fn wait(mut self) -> Result<JobDescriptor, UploadError> {
        while let Some(event) = self.events.recv().await {
            match event {
                UploadEvent::Progress(_) => continue,
                UploadEvent::Failed(err) => return Err(err),
                UploadEvent::Finished(job) => return Ok(job),
            }
        }
        // Unreachable through the orchestrator, which always sends a terminal
        // event before dropping the sender.
        Err(UploadError::storage(
            "event channel closed before a terminal event".to_string(),
        ))
    }
}

//! Report publishing seam.
//!
//! The rendered report can be handed to an external document service
//! (a wiki, a shared document folder, a chat workspace). This module only
//! defines the contract: a title, the report body, a destination id and
//! the collaborators to share with go in; a permanent URL comes out, or
//! nothing if publishing is disabled or failed.
//!
//! [`DisabledPublisher`] is the default and does nothing, so the pipeline
//! can call the publisher unconditionally.

use tracing::{debug, info};

/// Input of one publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub title: String,
    pub body: String,
    pub destination_id: Option<String>,
    pub collaborator_ids: Vec<String>,
}

/// An external publishing collaborator.
pub trait ReportPublisher {
    /// Publish the report; `None` means nothing was published. Failures are
    /// logged by the implementation and never abort the run.
    async fn publish(&self, request: &PublishRequest) -> Option<String>;
}

/// Publisher used when no publishing backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPublisher;

impl ReportPublisher for DisabledPublisher {
    async fn publish(&self, request: &PublishRequest) -> Option<String> {
        debug!(title = %request.title, "Publishing disabled");
        if request.destination_id.is_some() {
            info!(
                destination = ?request.destination_id,
                collaborators = request.collaborator_ids.len(),
                "Destination configured but no publishing backend is available; skipping"
            );
        }
        None
    }
}

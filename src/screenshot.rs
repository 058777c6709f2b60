//! The capture request entity and its status state machine
//!
//! A [`CaptureRequest`] only ever moves forward:
//! `Created -> Queued -> Started -> {Succeeded | Failed}`. Every mutation goes
//! through one of the `mark_*` methods, which keep `fail_reason` and
//! `artifact_ref` consistent with the status.

use crate::{CaptureError, FailReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureStatus {
    /// Constructed by intake, not yet accepted by the work queue
    Created,
    /// Accepted into the work queue
    Queued,
    /// A worker has entered the pipeline for this request
    Started,
    /// An artifact was produced and stored
    Succeeded,
    /// The pipeline ended with a classified failure reason
    Failed,
}

impl CaptureStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureStatus::Succeeded | CaptureStatus::Failed)
    }

    fn can_transition_to(&self, next: CaptureStatus) -> bool {
        matches!(
            (self, next),
            (CaptureStatus::Created, CaptureStatus::Queued)
                | (CaptureStatus::Queued, CaptureStatus::Started)
                | (CaptureStatus::Started, CaptureStatus::Succeeded)
                | (CaptureStatus::Started, CaptureStatus::Failed)
        )
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureStatus::Created => "CREATED",
            CaptureStatus::Queued => "QUEUED",
            CaptureStatus::Started => "STARTED",
            CaptureStatus::Succeeded => "SUCCEEDED",
            CaptureStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Location of a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to capture one destination for one owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub id: Uuid,
    destination: String,
    pub owner: String,
    status: CaptureStatus,
    fail_reason: Option<FailReason>,
    pub created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    artifact_ref: Option<ArtifactRef>,
}

impl CaptureRequest {
    pub fn new(owner: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination: destination.into(),
            owner: owner.into(),
            status: CaptureStatus::Created,
            fail_reason: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            artifact_ref: None,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    pub fn fail_reason(&self) -> Option<&FailReason> {
        self.fail_reason.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn artifact_ref(&self) -> Option<&ArtifactRef> {
        self.artifact_ref.as_ref()
    }

    pub fn mark_queued(&mut self) -> Result<(), CaptureError> {
        self.transition(CaptureStatus::Queued)
    }

    pub fn mark_started(&mut self) -> Result<(), CaptureError> {
        self.transition(CaptureStatus::Started)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: FailReason) -> Result<(), CaptureError> {
        self.transition(CaptureStatus::Failed)?;
        self.fail_reason = Some(reason);
        self.finished_at = Some(self.finish_time());
        Ok(())
    }

    pub fn mark_succeeded(&mut self, artifact: ArtifactRef) -> Result<(), CaptureError> {
        self.transition(CaptureStatus::Succeeded)?;
        self.artifact_ref = Some(artifact);
        self.finished_at = Some(self.finish_time());
        Ok(())
    }

    fn transition(&mut self, next: CaptureStatus) -> Result<(), CaptureError> {
        if !self.status.can_transition_to(next) {
            return Err(CaptureError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    // Wall clocks can step backwards; finished_at never precedes started_at.
    fn finish_time(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.started_at {
            Some(started) if started > now => started,
            _ => now,
        }
    }
}

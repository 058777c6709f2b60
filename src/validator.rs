//! Pre-flight validation of a capture destination
//!
//! A header-only request decides, before anything expensive happens, whether
//! the destination is worth rendering. Failures are classified into reason
//! codes and tallied; 405/406 answers let rendering go ahead blind.

use crate::{classify, CaptureMetrics, Classification, FailReason, Transport};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightDecision {
    /// The probe succeeded; headers are trustworthy
    Proceed,
    /// The probe was refused but the resource may exist; headers are unknown
    PermitWithoutHeaders,
    Fail(FailReason),
}

/// Result of probing a destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    pub decision: PreflightDecision,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl Preflight {
    fn without_headers(decision: PreflightDecision) -> Self {
        Self {
            decision,
            content_type: None,
            content_length: None,
        }
    }

    pub fn fail_reason(&self) -> Option<&FailReason> {
        match &self.decision {
            PreflightDecision::Fail(reason) => Some(reason),
            _ => None,
        }
    }
}

pub struct DestinationValidator {
    transport: Arc<dyn Transport>,
    metrics: Arc<CaptureMetrics>,
}

impl DestinationValidator {
    pub fn new(transport: Arc<dyn Transport>, metrics: Arc<CaptureMetrics>) -> Self {
        Self { transport, metrics }
    }

    pub async fn validate(&self, destination: &str) -> Preflight {
        match self.transport.head(destination).await {
            Ok(response) => {
                debug!(
                    "Pre-flight for {} returned {} (type: {:?}, length: {:?})",
                    destination, response.status, response.content_type, response.content_length
                );
                Preflight {
                    decision: PreflightDecision::Proceed,
                    content_type: response.content_type,
                    content_length: response.content_length,
                }
            }
            Err(fault) => {
                self.metrics.record_fault(&fault);

                match classify(&fault) {
                    Classification::PermitWithoutHeaders => {
                        debug!("Pre-flight for {} refused ({}), rendering anyway", destination, fault);
                        Preflight::without_headers(PreflightDecision::PermitWithoutHeaders)
                    }
                    Classification::Fail(reason) => {
                        warn!("Pre-flight for {} failed: {} ({})", destination, fault, reason);
                        Preflight::without_headers(PreflightDecision::Fail(reason))
                    }
                }
            }
        }
    }
}

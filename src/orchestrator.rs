//! Capture orchestrator driving one request through the pipeline
//!
//! The orchestrator owns the status state machine of a capture. It runs the
//! destination validator, applies the size gate, hands over to the renderer
//! chain and records the outcome. Each transition is persisted before the
//! next stage starts, so a crash mid-pipeline leaves the request visibly
//! `STARTED`.

use crate::{
    validate_url, ArtifactStore, CaptureError, CaptureMetrics, CaptureQueue, CaptureRequest,
    CaptureStore, ChannelQueue, Config, DestinationValidator, FailReason, FileArtifactStore,
    MemoryStore, Preflight, PreflightDecision, ProcessLauncher, QueueReceivers, RenderedImage,
    RendererChain, ReqwestTransport, TokioLauncher, Transport,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Collaborators injected into the orchestrator
#[derive(Clone)]
pub struct PipelineDeps {
    pub transport: Arc<dyn Transport>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub store: Arc<dyn CaptureStore>,
    pub queue: Arc<dyn CaptureQueue>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub metrics: Arc<CaptureMetrics>,
}

/// Runs captures end to end
///
/// # Examples
///
/// ```rust,no_run
/// use screenshot_pipeline::{CaptureOrchestrator, Config};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (orchestrator, mut receivers) = CaptureOrchestrator::from_config(Config::default())?;
///
///     let capture = orchestrator.submit("user-1", "https://example.com").await?;
///     let id = receivers.renders.recv().await.expect("queued");
///     assert_eq!(id, capture.id);
///
///     let finished = orchestrator.capture(id).await?;
///     println!("{} -> {}", finished.destination(), finished.status());
///     Ok(())
/// }
/// ```
pub struct CaptureOrchestrator {
    config: Config,
    store: Arc<dyn CaptureStore>,
    queue: Arc<dyn CaptureQueue>,
    artifacts: Arc<dyn ArtifactStore>,
    metrics: Arc<CaptureMetrics>,
    validator: DestinationValidator,
    chain: RendererChain,
}

impl CaptureOrchestrator {
    pub fn new(config: Config, deps: PipelineDeps) -> Self {
        let validator = DestinationValidator::new(deps.transport.clone(), deps.metrics.clone());
        let chain = RendererChain::from_config(
            &config,
            deps.transport,
            deps.launcher,
            deps.metrics.clone(),
        );

        Self {
            config,
            store: deps.store,
            queue: deps.queue,
            artifacts: deps.artifacts,
            metrics: deps.metrics,
            validator,
            chain,
        }
    }

    /// Wire the orchestrator with the bundled adapters: reqwest, tokio
    /// subprocesses, an in-memory store, a channel queue and artifact files.
    pub fn from_config(config: Config) -> Result<(Self, QueueReceivers), CaptureError> {
        config.validate()?;

        let (queue, receivers) = ChannelQueue::new(config.queue_capacity);
        let deps = PipelineDeps {
            transport: Arc::new(ReqwestTransport::new(&config)?),
            launcher: Arc::new(TokioLauncher::new()),
            store: Arc::new(MemoryStore::new()),
            queue: Arc::new(queue),
            artifacts: Arc::new(FileArtifactStore::new(
                config.artifact_dir.clone(),
                config.output_format,
            )),
            metrics: Arc::new(CaptureMetrics::new()),
        };

        Ok((Self::new(config, deps), receivers))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<CaptureMetrics> {
        &self.metrics
    }

    /// Accept a new capture request and hand it to the work queue
    pub async fn submit(
        &self,
        owner: &str,
        destination: &str,
    ) -> Result<CaptureRequest, CaptureError> {
        let destination = destination.trim();
        validate_url(destination)
            .map_err(|e| CaptureError::InvalidUrl(format!("{destination}: {e}")))?;

        let mut capture = CaptureRequest::new(owner, destination);
        self.store.save(&capture).await?;

        capture.mark_queued()?;
        self.store.save(&capture).await?;

        if let Err(e) = self.queue.enqueue_for_render(&capture).await {
            error!("Failed to queue capture {}: {}", capture.id, e);
            self.store.remove(capture.id).await?;
            return Err(e);
        }

        info!("Queued capture {} for {}", capture.id, destination);
        Ok(capture)
    }

    /// Delete a capture record
    pub async fn remove(&self, id: Uuid) -> Result<Option<CaptureRequest>, CaptureError> {
        self.store.remove(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<CaptureRequest>, CaptureError> {
        self.store.get(id).await
    }

    /// Run only the pre-flight probe for a destination
    pub async fn probe(&self, destination: &str) -> Preflight {
        self.validator.validate(destination).await
    }

    /// Claim a queued capture and run it through validation and rendering
    ///
    /// Returns the capture in its terminal state. Errors are reserved for
    /// infrastructure failures (store, queue, artifact writes) and for
    /// captures that are not in the `QUEUED` state. The store's claim is
    /// atomic, so a redelivered id never runs the pipeline twice.
    pub async fn capture(&self, id: Uuid) -> Result<CaptureRequest, CaptureError> {
        let start_time = Instant::now();

        let capture = self
            .store
            .claim(id)
            .await?
            .ok_or_else(|| CaptureError::StorageError(format!("Capture {id} not found")))?;
        debug!("Started capture {} for {}", capture.id, capture.destination());

        self.run(capture, start_time).await
    }

    async fn run(
        &self,
        capture: CaptureRequest,
        start_time: Instant,
    ) -> Result<CaptureRequest, CaptureError> {
        let preflight = self.validator.validate(capture.destination()).await;

        if let PreflightDecision::Fail(reason) = &preflight.decision {
            return self.fail(capture, reason.clone(), start_time).await;
        }

        if let Some(length) = preflight.content_length {
            if length > self.config.max_content_length {
                warn!(
                    "Capture {} declared {} bytes, above the {} byte limit",
                    capture.id, length, self.config.max_content_length
                );
                return self.fail(capture, FailReason::FilesizeTooBig, start_time).await;
            }
        }

        match self.chain.render(&capture, &preflight).await {
            Ok(rendered) => self.succeed(capture, rendered, start_time).await,
            Err(reason) => self.fail(capture, reason, start_time).await,
        }
    }

    async fn fail(
        &self,
        mut capture: CaptureRequest,
        reason: FailReason,
        start_time: Instant,
    ) -> Result<CaptureRequest, CaptureError> {
        capture.mark_failed(reason.clone())?;
        self.store.save(&capture).await?;
        self.queue.notify_failure(&capture, &reason).await?;

        self.finish(&capture, start_time.elapsed());
        Ok(capture)
    }

    async fn succeed(
        &self,
        mut capture: CaptureRequest,
        rendered: RenderedImage,
        start_time: Instant,
    ) -> Result<CaptureRequest, CaptureError> {
        let artifact = self.artifacts.put(&capture, &rendered).await?;

        capture.mark_succeeded(artifact)?;
        self.store.save(&capture).await?;
        self.queue.notify_success(&capture).await?;

        self.finish(&capture, start_time.elapsed());
        Ok(capture)
    }

    fn finish(&self, capture: &CaptureRequest, duration: Duration) {
        self.metrics.record_capture(capture, duration);

        match capture.fail_reason() {
            Some(reason) => info!(
                "Capture {} failed after {:?}: {}",
                capture.id, duration, reason
            ),
            None => info!(
                "Capture {} succeeded after {:?}: {}",
                capture.id,
                duration,
                capture
                    .artifact_ref()
                    .map(|artifact| artifact.to_string())
                    .unwrap_or_default()
            ),
        }
    }
}

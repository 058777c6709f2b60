//! Renderer chain: turn a validated destination into an image
//!
//! Strategies run strictly in order. A direct fetch handles destinations that
//! already are raster images; everything else goes through the external
//! render backends until one of them produces a decodable image.

use crate::{
    classify, BackendConfig, CaptureMetrics, CaptureRequest, Classification, CommandSpec, Config,
    FailReason, LaunchError, Preflight, ProcessLauncher, ScratchStorage, StrategyError, Transport,
};
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Strategy name recorded for images taken from a direct fetch
pub const DIRECT_FETCH: &str = "direct";

/// A decoded image and the strategy that produced it
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub image: DynamicImage,
    pub strategy: String,
}

/// One way of rendering a destination to an image
#[async_trait]
pub trait RenderStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, capture: &CaptureRequest) -> Result<DynamicImage, StrategyError>;
}

/// Render backend driven through a subprocess writing into a scratch file
pub struct ProcessBackend {
    backend: BackendConfig,
    launcher: Arc<dyn ProcessLauncher>,
    scratch: ScratchStorage,
    timeout: Duration,
}

impl ProcessBackend {
    pub fn new(
        backend: BackendConfig,
        launcher: Arc<dyn ProcessLauncher>,
        scratch: ScratchStorage,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            launcher,
            scratch,
            timeout,
        }
    }
}

#[async_trait]
impl RenderStrategy for ProcessBackend {
    fn name(&self) -> &str {
        &self.backend.name
    }

    async fn render(&self, capture: &CaptureRequest) -> Result<DynamicImage, StrategyError> {
        // Dropping `output` deletes the file on every path out of this fn.
        let output = self
            .scratch
            .allocate(capture.id, &self.backend.name, &self.backend.output_extension)
            .await?;

        let command = CommandSpec::new(
            self.backend.program.clone(),
            self.backend.render_args(capture.destination(), output.path()),
        );

        let result = self
            .launcher
            .run(&command, self.timeout)
            .await
            .map_err(|e| match e {
                LaunchError::TimedOut(after) => StrategyError::TimedOut(after),
                LaunchError::Spawn { .. } => StrategyError::LaunchFailed(e.to_string()),
            })?;

        let data = output.read().await?;
        match (result.success, data) {
            (true, Some(data)) => Ok(image::load_from_memory(&data)?),
            (true, None) => Err(StrategyError::EmptyOutput(command.to_string())),
            (false, _) => Err(StrategyError::ProcessFailed {
                status: result
                    .exit_code
                    .map(|code| format!("exit code {code}"))
                    .unwrap_or_else(|| "terminated by signal".to_string()),
                stderr: result.stderr,
            }),
        }
    }
}

/// Full-body fetch of a destination that already is an image
pub struct DirectFetch {
    transport: Arc<dyn Transport>,
    max_content_length: u64,
}

impl DirectFetch {
    pub fn new(transport: Arc<dyn Transport>, max_content_length: u64) -> Self {
        Self {
            transport,
            max_content_length,
        }
    }

    async fn fetch(&self, destination: &str, metrics: &CaptureMetrics) -> Result<DynamicImage, FailReason> {
        let body = match self.transport.get(destination, self.max_content_length).await {
            Ok(body) => body,
            Err(fault) => {
                metrics.record_fault(&fault);
                warn!("Direct fetch of {} failed: {}", destination, fault);
                return Err(match classify(&fault) {
                    Classification::Fail(reason) => reason,
                    // A refusal of the full GET leaves nothing to decode.
                    Classification::PermitWithoutHeaders => FailReason::ClientErrorOther,
                });
            }
        };

        image::load_from_memory(&body).map_err(|e| {
            warn!("Direct fetch of {} returned an undecodable image: {}", destination, e);
            FailReason::Other
        })
    }
}

pub struct RendererChain {
    direct: DirectFetch,
    strategies: Vec<Box<dyn RenderStrategy>>,
    config: Config,
    metrics: Arc<CaptureMetrics>,
}

impl RendererChain {
    pub fn new(
        direct: DirectFetch,
        strategies: Vec<Box<dyn RenderStrategy>>,
        config: Config,
        metrics: Arc<CaptureMetrics>,
    ) -> Self {
        Self {
            direct,
            strategies,
            config,
            metrics,
        }
    }

    /// Build the default chain: one process backend per configured entry
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        launcher: Arc<dyn ProcessLauncher>,
        metrics: Arc<CaptureMetrics>,
    ) -> Self {
        let scratch = ScratchStorage::new(config.scratch_dir.clone());
        let strategies = config
            .backends
            .iter()
            .map(|backend| {
                Box::new(ProcessBackend::new(
                    backend.clone(),
                    launcher.clone(),
                    scratch.clone(),
                    config.render_timeout,
                )) as Box<dyn RenderStrategy>
            })
            .collect();

        Self::new(
            DirectFetch::new(transport, config.max_content_length),
            strategies,
            config.clone(),
            metrics,
        )
    }

    /// Names of the strategies in the order they are tried
    pub fn strategy_names(&self) -> Vec<&str> {
        std::iter::once(DIRECT_FETCH)
            .chain(self.strategies.iter().map(|s| s.name()))
            .collect()
    }

    pub async fn render(
        &self,
        capture: &CaptureRequest,
        preflight: &Preflight,
    ) -> Result<RenderedImage, FailReason> {
        let is_image = preflight
            .content_type
            .as_deref()
            .map(|content_type| self.config.is_direct_image(content_type))
            .unwrap_or(false);

        if is_image {
            debug!("Capture {} is an image, fetching directly", capture.id);
            let result = self.direct.fetch(capture.destination(), &self.metrics).await;
            self.metrics.record_strategy(DIRECT_FETCH, result.is_ok());
            return result.map(|image| RenderedImage {
                image,
                strategy: DIRECT_FETCH.to_string(),
            });
        }

        let mut last_backend = None;
        for strategy in &self.strategies {
            debug!("Rendering capture {} via {}", capture.id, strategy.name());
            last_backend = Some(strategy.name());

            match strategy.render(capture).await {
                Ok(image) => {
                    self.metrics.record_strategy(strategy.name(), true);
                    info!("Capture {} rendered via {}", capture.id, strategy.name());
                    return Ok(RenderedImage {
                        image,
                        strategy: strategy.name().to_string(),
                    });
                }
                Err(e) => {
                    self.metrics.record_strategy(strategy.name(), false);
                    warn!("Backend {} failed for capture {}: {}", strategy.name(), capture.id, e);
                }
            }
        }

        Err(last_backend
            .map(FailReason::process_error)
            .unwrap_or(FailReason::Other))
    }
}

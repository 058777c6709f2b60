//! Configuration management with serde serialization/deserialization
//!
//! This module holds every tunable of the capture pipeline: worker pool size,
//! pre-flight and render timeouts, the size gate, the render backend command
//! lines and the on-disk locations for scratch files and artifacts.

use crate::CaptureError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder replaced by the capture destination in backend arguments
pub const URL_PLACEHOLDER: &str = "{url}";

/// Placeholder replaced by the scratch output path in backend arguments
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Main configuration structure for the capture pipeline
///
/// # Examples
///
/// ```rust
/// use screenshot_pipeline::Config;
///
/// let config = Config {
///     worker_count: 4,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of workers pulling captures off the queue (default: CPU count)
    ///
    /// This also bounds how many render subprocesses run at once.
    pub worker_count: usize,

    /// Capacity of the in-process render queue (default: 1000)
    pub queue_capacity: usize,

    /// Timeout for the header-only pre-flight request (default: 15 seconds)
    pub preflight_timeout: Duration,

    /// Timeout for the full-body direct image fetch (default: 30 seconds)
    pub fetch_timeout: Duration,

    /// Hard wall-clock limit per render subprocess (default: 60 seconds)
    pub render_timeout: Duration,

    /// Largest declared content length that will be rendered (default: 4 MB)
    pub max_content_length: u64,

    /// Content types that are fetched and decoded directly
    pub image_mime_types: Vec<String>,

    /// Render backends, tried in order after the direct fetch
    pub backends: Vec<BackendConfig>,

    /// Directory for capture-scoped scratch files
    pub scratch_dir: PathBuf,

    /// Directory where finished artifacts are written
    pub artifact_dir: PathBuf,

    /// Output image format for stored artifacts (default: PNG)
    pub output_format: OutputFormat,

    /// Custom User-Agent string for pre-flight and fetch requests
    pub user_agent: Option<String>,

    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            queue_capacity: 1000,
            preflight_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(30),
            render_timeout: Duration::from_secs(60),
            max_content_length: 4 * 1000 * 1000,
            image_mime_types: vec!["image/png".to_string(), "image/jpeg".to_string()],
            backends: vec![BackendConfig::wkhtmltoimage(), BackendConfig::phantomjs()],
            scratch_dir: std::env::temp_dir().join("screenshot-pipeline"),
            artifact_dir: PathBuf::from("screenshots"),
            output_format: OutputFormat::Png,
            user_agent: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub async fn from_file(path: &Path) -> Result<Self, CaptureError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.worker_count == 0 {
            return Err(CaptureError::ConfigurationError(
                "Worker count must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(CaptureError::ConfigurationError(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.preflight_timeout.is_zero()
            || self.fetch_timeout.is_zero()
            || self.render_timeout.is_zero()
        {
            return Err(CaptureError::ConfigurationError(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.backends.is_empty() {
            return Err(CaptureError::ConfigurationError(
                "At least one render backend is required".to_string(),
            ));
        }

        for backend in &self.backends {
            backend.validate()?;
        }

        Ok(())
    }

    /// Whether a declared content type should go through the direct fetch
    pub fn is_direct_image(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        self.image_mime_types
            .iter()
            .any(|mime| mime.eq_ignore_ascii_case(&essence))
    }
}

/// An external render backend invoked as a subprocess
///
/// Arguments equal to `{url}` or `{output}` are replaced whole; nothing is
/// ever passed through a shell.
///
/// # Examples
///
/// ```rust
/// use screenshot_pipeline::BackendConfig;
///
/// let backend = BackendConfig {
///     name: "chromium".to_string(),
///     program: "chromium".to_string(),
///     args: vec![
///         "--headless".to_string(),
///         "--screenshot={output}".to_string(),
///         "{url}".to_string(),
///     ],
///     output_extension: "png".to_string(),
/// };
/// assert!(backend.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Short identifier, used in logs and in `PROCESS_ERROR_<NAME>`
    pub name: String,

    /// Executable to spawn
    pub program: String,

    /// Argument vector with whole-argument placeholders
    pub args: Vec<String>,

    /// Extension of the scratch output file
    pub output_extension: String,
}

impl BackendConfig {
    pub fn wkhtmltoimage() -> Self {
        Self {
            name: "wkhtml".to_string(),
            program: "wkhtmltoimage".to_string(),
            args: ["--crop-h", "1000", "-f", "jpeg", URL_PLACEHOLDER, OUTPUT_PLACEHOLDER]
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
            output_extension: "jpg".to_string(),
        }
    }

    pub fn phantomjs() -> Self {
        Self {
            name: "phantomjs".to_string(),
            program: "phantomjs".to_string(),
            args: ["render.js", URL_PLACEHOLDER, OUTPUT_PLACEHOLDER]
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
            output_extension: "jpg".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.name.is_empty() || self.program.is_empty() {
            return Err(CaptureError::ConfigurationError(
                "Backend name and program must not be empty".to_string(),
            ));
        }

        let has = |placeholder: &str| self.args.iter().any(|arg| arg == placeholder);
        if !has(URL_PLACEHOLDER) || !has(OUTPUT_PLACEHOLDER) {
            return Err(CaptureError::ConfigurationError(format!(
                "Backend {} must pass both {URL_PLACEHOLDER} and {OUTPUT_PLACEHOLDER} as arguments",
                self.name
            )));
        }

        Ok(())
    }

    /// Build the argument vector for one invocation
    pub fn render_args(&self, destination: &str, output: &Path) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg.as_str() {
                URL_PLACEHOLDER => destination.to_string(),
                OUTPUT_PLACEHOLDER => output.display().to_string(),
                _ => arg.clone(),
            })
            .collect()
    }
}

/// Supported output image formats for stored artifacts
///
/// - PNG: Lossless compression, larger files, best quality
/// - JPEG: Lossy compression, smaller files, good for photos
/// - WebP: Modern format with excellent compression and quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.worker_count > 0);
        assert_eq!(config.render_timeout, Duration::from_secs(60));
        assert_eq!(config.max_content_length, 4_000_000);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].name, "phantomjs");
        assert!(matches!(config.output_format, OutputFormat::Png));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = Config {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CaptureError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_chain() {
        let config = Config {
            backends: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"worker_count": 3}"#).unwrap();
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.max_content_length, 4_000_000);
    }

    #[test]
    fn test_direct_image_matches_mime_essence() {
        let config = Config::default();
        assert!(config.is_direct_image("image/png"));
        assert!(config.is_direct_image("IMAGE/JPEG; charset=binary"));
        assert!(!config.is_direct_image("image/gif"));
        assert!(!config.is_direct_image("text/html; charset=utf-8"));
    }

    #[test]
    fn test_render_args_replace_whole_arguments() {
        let backend = BackendConfig::wkhtmltoimage();
        let args = backend.render_args(
            "https://example.com/?q={output}",
            Path::new("/tmp/scratch/out.jpg"),
        );
        assert_eq!(
            args,
            vec![
                "--crop-h",
                "1000",
                "-f",
                "jpeg",
                "https://example.com/?q={output}",
                "/tmp/scratch/out.jpg",
            ]
        );
    }
}

use crate::{
    format_bytes, format_duration, BatchProcessor, CaptureOrchestrator, CaptureOutcome, Config,
    OutputFormat, PreflightDecision, QueueNotice, QueueReceivers, WorkerPool, CONNECTION_FAULTS,
    EXCEPTIONS, EXCEPTION_CODES,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "screenshot-pipeline")]
#[command(about = "Capture screenshots of web destinations through a chain of render backends")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Number of capture workers")]
    pub workers: Option<usize>,

    #[arg(long, help = "Render backend timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Directory for finished screenshots")]
    pub output_dir: Option<PathBuf>,

    #[arg(long, help = "Output format (png, jpeg, webp)")]
    pub format: Option<String>,

    #[arg(long, help = "Serve Prometheus metrics on this port")]
    pub metrics_port: Option<u16>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(timeout) = self.timeout {
            config.render_timeout = Duration::from_secs(timeout);
        }
        if let Some(output_dir) = &self.output_dir {
            config.artifact_dir = output_dir.clone();
        }
        if let Some(format) = &self.format {
            config.output_format = parse_format(format)?;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = Some(port);
        }
        Ok(())
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture a single destination through the full pipeline
    Capture {
        #[arg(short, long, help = "Destination URL")]
        url: String,

        #[arg(long, default_value = "cli", help = "Owner recorded on the capture")]
        owner: String,
    },

    /// Capture every destination listed in a file
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(long, default_value = "cli", help = "Owner recorded on the captures")]
        owner: String,
    },

    /// Run only the pre-flight check and print its decision
    Probe {
        #[arg(short, long, help = "Destination URL")]
        url: String,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

pub struct CliRunner {
    pub config: Config,
    pub orchestrator: Arc<CaptureOrchestrator>,
    receivers: QueueReceivers,
}

impl CliRunner {
    pub fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let (orchestrator, receivers) = CaptureOrchestrator::from_config(config.clone())?;

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            receivers,
        })
    }

    pub async fn run(self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Capture { url, owner } => {
                let outcomes = self.run_captures(&owner, vec![url]).await;
                match outcomes.first() {
                    Some(outcome) if outcome.succeeded() => Ok(()),
                    Some(CaptureOutcome { result: Err(e), .. }) => {
                        Err(format!("Capture failed: {e}").into())
                    }
                    Some(CaptureOutcome { result: Ok(capture), .. }) => Err(format!(
                        "Capture failed: {}",
                        capture
                            .fail_reason()
                            .map(|reason| reason.to_string())
                            .unwrap_or_default()
                    )
                    .into()),
                    None => Err("Capture produced no result".into()),
                }
            }
            Commands::Batch { input, owner } => {
                let urls = read_urls_from_file(&input).await?;
                info!("Loaded {} URLs from {}", urls.len(), input.display());
                self.run_captures(&owner, urls).await;
                Ok(())
            }
            Commands::Probe { url } => self.run_probe(&url).await,
            Commands::Validate { config } => validate_config(&config).await,
        }
    }

    async fn run_captures(self, owner: &str, urls: Vec<String>) -> Vec<CaptureOutcome> {
        let started = Instant::now();
        let QueueReceivers { renders, mut notices } = self.receivers;

        // Terminal notices have no downstream consumer on the command line.
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                match notice {
                    QueueNotice::Succeeded(id) => debug!("Capture {} succeeded", id),
                    QueueNotice::Failed(id, reason) => debug!("Capture {} failed: {}", id, reason),
                }
            }
        });

        let pool = WorkerPool::new(self.config.worker_count, self.orchestrator.clone(), renders);
        let mut processor = BatchProcessor::new(self.orchestrator.clone(), pool);
        let outcomes = processor.process_urls(owner, urls).await;

        print_outcomes(&outcomes).await;
        print_tallies(&self.orchestrator);
        println!("Completed in {}", format_duration(started.elapsed()));

        outcomes
    }

    async fn run_probe(&self, url: &str) -> Result<(), Box<dyn std::error::Error>> {
        let preflight = self.orchestrator.probe(url).await;

        println!("Pre-flight for {url}:");
        match &preflight.decision {
            PreflightDecision::Proceed => println!("  Decision: proceed"),
            PreflightDecision::PermitWithoutHeaders => {
                println!("  Decision: proceed without headers")
            }
            PreflightDecision::Fail(reason) => println!("  Decision: fail ({reason})"),
        }
        if let Some(content_type) = &preflight.content_type {
            let route = if self.config.is_direct_image(content_type) {
                "direct fetch"
            } else {
                "render backends"
            };
            println!("  Content-Type: {content_type} ({route})");
        }
        if let Some(length) = preflight.content_length {
            let gate = if length > self.config.max_content_length {
                " (above size limit)"
            } else {
                ""
            };
            println!("  Content-Length: {}{}", format_bytes(length), gate);
        }

        Ok(())
    }
}

async fn print_outcomes(outcomes: &[CaptureOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(capture) => match (capture.artifact_ref(), capture.fail_reason()) {
                (Some(artifact), _) => {
                    let size = fs::metadata(&artifact.0)
                        .await
                        .map(|meta| format_bytes(meta.len()))
                        .unwrap_or_default();
                    println!("OK      {} -> {} {}", capture.destination(), artifact, size);
                }
                (None, reason) => println!(
                    "FAILED  {} ({})",
                    capture.destination(),
                    reason.map(|r| r.to_string()).unwrap_or_default()
                ),
            },
            Err(e) => println!("ERROR   {e}"),
        }
    }

    let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
    println!(
        "\n{} succeeded, {} failed",
        succeeded,
        outcomes.len() - succeeded
    );
}

fn print_tallies(orchestrator: &CaptureOrchestrator) {
    for family in [EXCEPTIONS, EXCEPTION_CODES, CONNECTION_FAULTS] {
        let tallies = orchestrator.metrics().snapshot(family);
        if tallies.is_empty() {
            continue;
        }

        println!("{family}:");
        for (key, count) in tallies {
            println!("  {key}: {count}");
        }
    }
}

pub async fn validate_config(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration: {}", config_path.display());

    let config = Config::from_file(config_path).await?;
    config.validate()?;

    println!("Configuration is valid:");
    println!("  Workers: {}", config.worker_count);
    println!("  Pre-flight timeout: {:?}", config.preflight_timeout);
    println!("  Render timeout: {:?}", config.render_timeout);
    println!("  Size limit: {}", format_bytes(config.max_content_length));
    println!("  Output format: {:?}", config.output_format);
    println!(
        "  Backends: {}",
        config
            .backends
            .iter()
            .map(|b| b.name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    Ok(())
}

pub async fn read_urls_from_file(path: &Path) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path).await?;
    let urls: Vec<String> = content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect();

    if urls.is_empty() {
        warn!("No URLs found in {}", path.display());
    }

    Ok(urls)
}

pub fn parse_format(format: &str) -> Result<OutputFormat, Box<dyn std::error::Error>> {
    match format.to_ascii_lowercase().as_str() {
        "png" => Ok(OutputFormat::Png),
        "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
        "webp" => Ok(OutputFormat::Webp),
        other => Err(format!("Unsupported output format: {other}").into()),
    }
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_urls_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(
            &path,
            "# destinations\nhttps://example.com\n\n  https://example.org/a.png  \n",
        )
        .unwrap();

        let urls = read_urls_from_file(&path).await.unwrap();
        assert_eq!(urls, vec!["https://example.com", "https://example.org/a.png"]);
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = Cli::parse_from([
            "screenshot-pipeline",
            "--workers",
            "3",
            "--timeout",
            "20",
            "--format",
            "jpg",
            "probe",
            "--url",
            "https://example.com",
        ]);

        let mut config = Config::default();
        cli.apply_overrides(&mut config).unwrap();

        assert_eq!(config.worker_count, 3);
        assert_eq!(config.render_timeout, Duration::from_secs(20));
        assert_eq!(config.output_format, OutputFormat::Jpeg);
        assert!(matches!(cli.command, Commands::Probe { .. }));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(parse_format("gif").is_err());
        assert!(matches!(parse_format("WEBP"), Ok(OutputFormat::Webp)));
    }

    #[tokio::test]
    async fn test_validate_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"worker_count": 2, "max_content_length": 1000}"#).unwrap();
        assert!(validate_config(&path).await.is_ok());

        std::fs::write(&path, r#"{"worker_count": 0}"#).unwrap();
        assert!(validate_config(&path).await.is_err());
    }
}

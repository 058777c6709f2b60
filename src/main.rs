use clap::Parser;
use screenshot_pipeline::{setup_logging, Cli, CliRunner, Config, PrometheusExporter};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting screenshot-pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args).await?;

    if let Some(port) = config.metrics_port {
        PrometheusExporter::new(port).start()?;
    }

    let cli_runner = CliRunner::new(config)?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx);

    // Dropping an in-flight capture kills its render subprocess.
    let result = tokio::select! {
        result = cli_runner.run(args.command) => {
            info!("Application completed");
            result
        }
        _ = shutdown_rx.recv() => {
            warn!("Received shutdown signal, abandoning in-flight captures");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    info!("screenshot-pipeline stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path).await?,
        None => Config::default(),
    };

    args.apply_overrides(&mut config)?;
    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Workers: {}", config.worker_count);
    info!("Render timeout: {:?}", config.render_timeout);
    info!(
        "Backends: {}",
        config
            .backends
            .iter()
            .map(|b| b.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(config)
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to create SIGINT handler: {}", e);
                return;
            }
        };
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to create SIGTERM handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        let _ = shutdown_tx.send(());
    })
}

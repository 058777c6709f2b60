//! # Screenshot Pipeline
//!
//! Captures an image of a web destination through a fixed chain of strategies.
//! Each capture request moves through a persisted status state machine:
//!
//! ```text
//! CREATED -> QUEUED -> STARTED -> SUCCEEDED | FAILED
//! ```
//!
//! ## Pipeline
//!
//! 1. **Pre-flight**: a header-only request probes the destination. HTTP and
//!    connection faults are classified into stable reason codes such as
//!    `CLIENT_ERROR_404` or `CURL_ERROR_INVALID_HOST`. `405`/`406` mean the
//!    destination refuses header requests and the capture proceeds anyway.
//! 2. **Size gate**: a declared content length above the limit fails the
//!    capture with `FILESIZE_TOO_BIG`.
//! 3. **Renderer chain**: raster images are fetched and decoded directly.
//!    Everything else goes to the render backends in order (`wkhtml`, then
//!    `phantomjs` by default), each a subprocess with a hard timeout writing
//!    into a capture-scoped scratch file. When all backends fail the capture
//!    fails with `PROCESS_ERROR_<LAST BACKEND>`.
//!
//! Every request gets exactly one attempt; retry policy belongs to the queue.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use screenshot_pipeline::{CaptureOrchestrator, Config, WorkerPool};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let (orchestrator, receivers) = CaptureOrchestrator::from_config(config.clone())?;
//!     let orchestrator = Arc::new(orchestrator);
//!
//!     let mut pool = WorkerPool::new(config.worker_count, orchestrator.clone(), receivers.renders);
//!     orchestrator.submit("user-1", "https://example.com").await?;
//!
//!     if let Some(outcome) = pool.get_result().await {
//!         println!("{} succeeded: {}", outcome.id, outcome.succeeded());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! screenshot-pipeline capture --url https://example.com
//! screenshot-pipeline batch --input urls.txt --output-dir screenshots/
//! screenshot-pipeline probe --url https://example.com/photo.jpg
//! screenshot-pipeline validate --config config.json
//! ```

/// Configuration and settings for the pipeline
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Failure reason codes and the transport fault classifier
pub mod classifier;

/// Capture request record and its status state machine
pub mod screenshot;

/// HTTP transport used by the pre-flight and the direct fetch
pub mod transport;

/// Subprocess launcher for render backends
pub mod launcher;

/// Capture-scoped scratch files
pub mod scratch;

/// Destination pre-flight validation
pub mod validator;

/// Render strategies and the chain that tries them in order
pub mod renderer;

/// Capture record and artifact persistence
pub mod store;

/// Work queue seam and in-process channel queue
pub mod queue;

/// Capture orchestrator driving requests through the pipeline
pub mod orchestrator;

/// Worker pool pulling captures off the render queue
pub mod worker;

/// Command-line interface implementation
pub mod cli;

/// Operational tallies and metrics export
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use classifier::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use launcher::*;
pub use self::metrics::*;
pub use orchestrator::*;
pub use queue::*;
pub use renderer::*;
pub use scratch::*;
pub use screenshot::*;
pub use store::*;
pub use transport::*;
pub use utils::*;
pub use validator::*;
pub use worker::*;

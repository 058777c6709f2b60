use crate::{CaptureError, CaptureOrchestrator, CaptureRequest, CaptureStatus, ErrorSeverity};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a worker reports back for one capture id
#[derive(Debug)]
pub struct CaptureOutcome {
    pub id: Uuid,
    pub result: Result<CaptureRequest, CaptureError>,
}

impl CaptureOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(capture) if capture.status() == CaptureStatus::Succeeded)
    }
}

#[derive(Clone)]
pub struct CaptureWorker {
    id: usize,
    orchestrator: Arc<CaptureOrchestrator>,
    is_running: Arc<AtomicBool>,
    processed_count: Arc<AtomicUsize>,
    error_count: Arc<AtomicUsize>,
}

impl CaptureWorker {
    pub fn new(id: usize, orchestrator: Arc<CaptureOrchestrator>) -> Self {
        Self {
            id,
            orchestrator,
            is_running: Arc::new(AtomicBool::new(false)),
            processed_count: Arc::new(AtomicUsize::new(0)),
            error_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn run_with_shared_receiver(
        &self,
        requests: Arc<Mutex<mpsc::Receiver<Uuid>>>,
        results: mpsc::Sender<CaptureOutcome>,
    ) {
        info!("Starting capture worker {}", self.id);
        self.is_running.store(true, Ordering::Relaxed);

        loop {
            let request = {
                let mut receiver = requests.lock().await;
                receiver.recv().await
            };

            let Some(capture_id) = request else { break };
            let outcome = self.process_request(capture_id).await;

            if let Err(e) = results.send(outcome).await {
                error!("Worker {} failed to send result: {}", self.id, e);
                break;
            }
        }

        self.is_running.store(false, Ordering::Relaxed);
        info!("Capture worker {} stopped", self.id);
    }

    async fn process_request(&self, capture_id: Uuid) -> CaptureOutcome {
        debug!("Worker {} processing capture {}", self.id, capture_id);

        let result = self.orchestrator.capture(capture_id).await;
        match &result {
            Ok(capture) if capture.status() == CaptureStatus::Succeeded => {
                self.processed_count.fetch_add(1, Ordering::Relaxed);
                debug!("Worker {} captured {}", self.id, capture_id);
            }
            Ok(capture) => {
                self.processed_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Worker {} finished capture {} as failed: {:?}",
                    self.id,
                    capture_id,
                    capture.fail_reason()
                );
            }
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                // A redelivered id that lost its claim is routine; store and
                // queue outages are not.
                match e.severity() {
                    ErrorSeverity::Low | ErrorSeverity::Medium => warn!(
                        "Worker {} skipped capture {}: {}",
                        self.id, capture_id, e
                    ),
                    ErrorSeverity::High | ErrorSeverity::Critical => error!(
                        "Worker {} could not process capture {}: {}",
                        self.id, capture_id, e
                    ),
                }
            }
        }

        CaptureOutcome {
            id: capture_id,
            result,
        }
    }

    pub fn get_stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            is_running: self.is_running(),
            processed_count: self.processed_count(),
            error_count: self.error_count(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Captures that reached a terminal state, successful or not
    pub fn processed_count(&self) -> usize {
        self.processed_count.load(Ordering::Relaxed)
    }

    /// Captures abandoned because of an infrastructure error
    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub id: usize,
    pub is_running: bool,
    pub processed_count: usize,
    pub error_count: usize,
}

/// Fixed-size pool of workers sharing one render queue
///
/// The pool size is also the ceiling on concurrently running render
/// subprocesses.
pub struct WorkerPool {
    workers: Vec<CaptureWorker>,
    handles: Vec<JoinHandle<()>>,
    result_receiver: mpsc::Receiver<CaptureOutcome>,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        orchestrator: Arc<CaptureOrchestrator>,
        renders: mpsc::Receiver<Uuid>,
    ) -> Self {
        let (result_sender, result_receiver) = mpsc::channel(worker_count.max(1) * 4);
        let shared_receiver = Arc::new(Mutex::new(renders));

        let workers: Vec<CaptureWorker> = (0..worker_count)
            .map(|i| CaptureWorker::new(i, orchestrator.clone()))
            .collect();

        let handles = workers
            .iter()
            .map(|worker| {
                let worker = worker.clone();
                let rx = shared_receiver.clone();
                let tx = result_sender.clone();
                tokio::spawn(async move {
                    worker.run_with_shared_receiver(rx, tx).await;
                })
            })
            .collect();

        Self {
            workers,
            handles,
            result_receiver,
        }
    }

    pub async fn get_result(&mut self) -> Option<CaptureOutcome> {
        self.result_receiver.recv().await
    }

    pub fn get_worker_stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.get_stats()).collect()
    }

    pub fn total_processed(&self) -> usize {
        self.workers.iter().map(|w| w.processed_count()).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.workers.iter().map(|w| w.error_count()).sum()
    }

    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }

    /// Wait for every worker to exit; they stop once the render queue closes
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!("Capture worker task failed: {}", e);
            }
        }
    }
}

/// Submits a list of destinations and waits for every outcome
pub struct BatchProcessor {
    orchestrator: Arc<CaptureOrchestrator>,
    worker_pool: WorkerPool,
}

impl BatchProcessor {
    pub fn new(orchestrator: Arc<CaptureOrchestrator>, worker_pool: WorkerPool) -> Self {
        Self {
            orchestrator,
            worker_pool,
        }
    }

    /// Submit every URL and wait for its outcome
    ///
    /// Submission runs in its own task while results are drained here, so a
    /// batch larger than the render queue and result channel combined keeps
    /// flowing instead of blocking on a full queue.
    pub async fn process_urls(&mut self, owner: &str, urls: Vec<String>) -> Vec<CaptureOutcome> {
        let total = urls.len();
        info!("Processing batch of {} destinations", total);

        let mut submitter = {
            let orchestrator = self.orchestrator.clone();
            let owner = owner.to_string();
            tokio::spawn(async move {
                let mut queued = 0;
                let mut rejected = Vec::new();

                for url in urls {
                    match orchestrator.submit(&owner, &url).await {
                        Ok(_) => queued += 1,
                        Err(e) => {
                            warn!("Rejected destination {}: {}", url, e);
                            rejected.push(CaptureOutcome {
                                id: Uuid::nil(),
                                result: Err(e),
                            });
                        }
                    }
                }

                (queued, rejected)
            })
        };

        let mut results = Vec::with_capacity(total);
        let mut received = 0;
        let mut queued: Option<usize> = None;

        loop {
            if queued.is_some_and(|queued| received >= queued) {
                break;
            }

            tokio::select! {
                submitted = &mut submitter, if queued.is_none() => match submitted {
                    Ok((count, rejected)) => {
                        queued = Some(count);
                        results.extend(rejected);
                    }
                    Err(e) => {
                        error!("Batch submission task failed: {}", e);
                        queued = Some(received);
                    }
                },
                outcome = self.worker_pool.get_result() => match outcome {
                    Some(outcome) => {
                        received += 1;
                        results.push(outcome);
                    }
                    None => break,
                },
            }
        }

        info!(
            "Batch processing completed. Succeeded: {}, Failed: {}",
            results.iter().filter(|r| r.succeeded()).count(),
            results.iter().filter(|r| !r.succeeded()).count()
        );

        results
    }

    pub fn get_stats(&self) -> BatchProcessorStats {
        BatchProcessorStats {
            worker_stats: self.worker_pool.get_worker_stats(),
            total_processed: self.worker_pool.total_processed(),
            total_errors: self.worker_pool.total_errors(),
            active_workers: self.worker_pool.active_workers(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchProcessorStats {
    pub worker_stats: Vec<WorkerStats>,
    pub total_processed: usize,
    pub total_errors: usize,
    pub active_workers: usize,
}

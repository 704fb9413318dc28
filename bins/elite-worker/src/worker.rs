/// Worker Loop
///
/// **Responsibility:**
/// Drive one worker through `Idle → BlockingPop → Dispatch → Execute →
/// Publish → Idle` until shutdown, processing one job to completion at a
/// time.
///
/// **Failure Policy:**
/// - Transient pop failures are retried after a short pause
/// - A closed broker, or too many consecutive failures, ends the worker
/// - Publish / cache failures are logged and the worker moves on
use crate::executor::Executor;
use elite_common::broker::{Broker, BrokerError};
use elite_common::redis::result_channel;
use elite_common::submission::recover_job_id;
use elite_common::types::{ErrorKind, ExecutionResult, Job, Mode, SystemError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// BLPOP timeout; bounds how long shutdown can go unnoticed
pub const POP_TIMEOUT: Duration = Duration::from_secs(5);
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    BlockingPop,
    Dispatch,
    Execute,
    Publish,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub worker_id: usize,
    pub state: WorkerState,
    pub jobs_processed: u64,
}

/// Shared view of every worker in this process, read by the health server
pub struct WorkerStatus {
    states: Mutex<Vec<WorkerState>>,
    processed: Vec<AtomicU64>,
}

impl WorkerStatus {
    pub fn new(workers: usize) -> Self {
        Self {
            states: Mutex::new(vec![WorkerState::Idle; workers]),
            processed: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn set(&self, worker_id: usize, state: WorkerState) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(slot) = states.get_mut(worker_id) {
            *slot = state;
        }
    }

    fn job_done(&self, worker_id: usize) {
        if let Some(counter) = self.processed.get(worker_id) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states
            .iter()
            .enumerate()
            .map(|(worker_id, state)| WorkerSnapshot {
                worker_id,
                state: *state,
                jobs_processed: self.processed[worker_id].load(Ordering::Relaxed),
            })
            .collect()
    }

    pub fn total_processed(&self) -> u64 {
        self.processed.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

pub struct Worker {
    pub id: usize,
    pub broker: Arc<dyn Broker>,
    pub executor: Arc<Executor>,
    pub status: Arc<WorkerStatus>,
    pub cache_ttl: Duration,
}

impl Worker {
    /// Run until `shutdown` flips to true. `Err` means the broker is gone
    /// for good.
    ///
    /// Shutdown is only observed between pops: a pop in flight is never
    /// abandoned, so a job taken off the queue is always answered.
    #[instrument(skip_all, fields(worker_id = self.id))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), BrokerError> {
        let mut consecutive_failures = 0u32;
        info!("Worker started");

        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            self.status.set(self.id, WorkerState::BlockingPop);

            match self.broker.pop(POP_TIMEOUT).await {
                Ok(Some(payload)) => {
                    consecutive_failures = 0;
                    self.handle_payload(&payload).await;
                    self.status.set(self.id, WorkerState::Idle);
                }
                Ok(None) => {
                    // Timeout - check for shutdown
                    consecutive_failures = 0;
                    self.status.set(self.id, WorkerState::Idle);
                }
                Err(BrokerError::NotConnected) => {
                    error!("Broker closed");
                    break Err(BrokerError::NotConnected);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(error = %e, consecutive_failures, "Queue error");
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        break Err(e);
                    }
                    self.status.set(self.id, WorkerState::Idle);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        };

        self.status.set(self.id, WorkerState::Stopped);
        info!("Worker stopped");
        outcome
    }

    /// Process one queue entry to completion. Never fails: anything that can
    /// be answered is answered on the job's channel.
    pub async fn handle_payload(&self, payload: &str) {
        self.status.set(self.id, WorkerState::Dispatch);

        let job: Job = match serde_json::from_str(payload) {
            Ok(job) => job,
            Err(e) => {
                match recover_job_id(payload) {
                    Some(job_id) => {
                        warn!(job_id = %job_id, error = %e, "Malformed job envelope");
                        let result = ExecutionResult::system_error(
                            &job_id,
                            Mode::default(),
                            SystemError::new(ErrorKind::Internal, format!("malformed job envelope: {}", e)),
                        );
                        self.publish(&result).await;
                    }
                    None => error!(error = %e, "Discarding queue entry without a job_id"),
                }
                return;
            }
        };

        if job.job_id.trim().is_empty() {
            error!("Discarding job without a job_id");
            return;
        }

        info!(
            job_id = %job.job_id,
            language = %job.language,
            mode = ?job.mode,
            timeout_ms = job.timeout,
            test_cases = job.test_case.len(),
            source_size = job.code.len(),
            "Received job"
        );

        self.status.set(self.id, WorkerState::Execute);
        let result = self.executor.execute(&job).await;

        info!(
            job_id = %job.job_id,
            verdict = ?result.verdict,
            all_passed = result.all_passed,
            system_error = result.is_system_error(),
            "Execution completed"
        );

        self.publish(&result).await;
        self.status.job_done(self.id);
    }

    async fn publish(&self, result: &ExecutionResult) {
        self.status.set(self.id, WorkerState::Publish);
        let job_id = &result.job_id;

        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to serialize result");
                return;
            }
        };

        match self.broker.publish(&result_channel(job_id), payload.clone()).await {
            Ok(()) => debug!(job_id = %job_id, "Result published"),
            Err(e) => {
                // Non-fatal - the cached copy may still reach the client
                error!(job_id = %job_id, error = %e, "Failed to publish result");
            }
        }

        if let Err(e) = self.broker.cache_result(job_id, &payload, self.cache_ttl).await {
            warn!(job_id = %job_id, error = %e, "Failed to cache result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::tests::{sh_config, SUM_STDIN};
    use elite_common::broker::{BrokerManager, MemoryBroker};
    use elite_common::types::{Language, TestCase};

    fn worker(id: usize, broker: Arc<MemoryBroker>, status: Arc<WorkerStatus>) -> Worker {
        Worker {
            id,
            broker,
            executor: Arc::new(Executor::new(&sh_config())),
            status,
            cache_ttl: Duration::from_secs(60),
        }
    }

    fn sum_job(a: i32, b: i32) -> Job {
        Job::new(
            Language::Cpp,
            SUM_STDIN,
            vec![TestCase::new(vec![format!("{} {}", a, b)], (a + b).to_string())],
            2000,
            Mode::Submit,
        )
    }

    #[tokio::test]
    async fn test_submit_through_worker() {
        let broker = Arc::new(MemoryBroker::new());
        let status = Arc::new(WorkerStatus::new(1));
        let (tx, rx) = watch::channel(false);
        let w = worker(0, broker.clone(), status.clone());
        let handle = tokio::spawn(async move { w.run(rx).await });

        let manager = BrokerManager::new(broker.clone(), Duration::from_secs(10));
        let raw = manager.submit(sum_job(2, 3)).await.unwrap();
        let result = raw.parse().unwrap();
        assert!(result.all_passed);
        assert_eq!(result.job_id, raw.job_id);

        // The published result is also retrievable afterwards
        let cached = broker.cached_result(&raw.job_id).await.unwrap();
        assert_eq!(cached.as_deref(), Some(raw.payload.as_str()));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(status.total_processed(), 1);
        assert_eq!(status.snapshot()[0].state, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_language_still_answers() {
        let broker = Arc::new(MemoryBroker::new());
        let status = Arc::new(WorkerStatus::new(1));
        let (tx, rx) = watch::channel(false);
        let w = worker(0, broker.clone(), status);
        let handle = tokio::spawn(async move { w.run(rx).await });

        let mut job = sum_job(1, 1);
        job.language = "Brainfuck".to_string();
        let manager = BrokerManager::new(broker.clone(), Duration::from_secs(10));
        let result = manager.submit(job).await.unwrap().parse().unwrap();
        assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::UnsupportedLanguage));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_envelope_with_job_id_gets_error_result() {
        let broker = Arc::new(MemoryBroker::new());
        let w = worker(0, broker.clone(), Arc::new(WorkerStatus::new(1)));

        let mut subscription = broker.subscribe(&result_channel("broken-1")).unwrap();
        w.handle_payload(r#"{"job_id":"broken-1","code":42}"#).await;
        let result: ExecutionResult = serde_json::from_str(&subscription.recv().await.unwrap()).unwrap();
        assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::Internal));

        // No job_id: nothing to answer, nothing published
        w.handle_payload("garbage").await;
        assert_eq!(broker.router().active(), 0);
    }

    #[tokio::test]
    async fn test_closed_broker_is_terminal() {
        let broker = Arc::new(MemoryBroker::new());
        let (_tx, rx) = watch::channel(false);
        let w = worker(0, broker.clone(), Arc::new(WorkerStatus::new(1)));
        let handle = tokio::spawn(async move { w.run(rx).await });

        broker.close().await;
        let outcome = tokio::time::timeout(POP_TIMEOUT * 3, handle).await.unwrap().unwrap();
        assert!(matches!(outcome, Err(BrokerError::NotConnected)));
    }

    #[tokio::test]
    async fn test_more_jobs_than_workers_all_complete() {
        const WORKERS: usize = 3;
        const JOBS: i32 = 12;

        let broker = Arc::new(MemoryBroker::new());
        let status = Arc::new(WorkerStatus::new(WORKERS));
        let (tx, rx) = watch::channel(false);
        let handles: Vec<_> = (0..WORKERS)
            .map(|id| {
                let w = worker(id, broker.clone(), status.clone());
                let rx = rx.clone();
                tokio::spawn(async move { w.run(rx).await })
            })
            .collect();

        let manager = Arc::new(BrokerManager::new(broker.clone(), Duration::from_secs(30)));
        let submits: Vec<_> = (0..JOBS)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.submit(sum_job(i, i)).await })
            })
            .collect();

        for submit in submits {
            let result = submit.await.unwrap().unwrap().parse().unwrap();
            assert!(result.all_passed, "{:?}", result);
        }

        tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(status.total_processed(), JOBS as u64);
        assert_eq!(broker.router().active(), 0);
    }

    #[tokio::test]
    async fn test_job_queued_after_shutdown_signal_is_answered() {
        let broker = Arc::new(MemoryBroker::new());
        let status = Arc::new(WorkerStatus::new(1));
        let (tx, rx) = watch::channel(false);
        let w = worker(0, broker.clone(), status.clone());
        let handle = tokio::spawn(async move { w.run(rx).await });

        // Wait until the worker is parked in a pop
        while status.snapshot()[0].state != WorkerState::BlockingPop {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();

        let manager = BrokerManager::new(broker.clone(), POP_TIMEOUT * 2);
        let result = manager.submit(sum_job(4, 5)).await.unwrap().parse().unwrap();
        assert!(result.all_passed);

        let outcome = tokio::time::timeout(POP_TIMEOUT * 3, handle).await.unwrap().unwrap();
        assert!(outcome.is_ok());
        assert_eq!(status.total_processed(), 1);
        assert!(broker.is_empty());
    }
}

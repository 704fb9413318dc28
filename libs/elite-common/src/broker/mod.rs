//! Broker manager: the request/response protocol layered over a FIFO queue
//! and a per-job result channel.
//!
//! The queue delivers each entry to exactly one worker. The result channel is
//! at-most-once, so [`BrokerManager::submit`] subscribes *before* it pushes
//! the job and always releases its subscription on the way out.

pub mod memory;
pub mod router;

use crate::redis::result_channel;
use crate::types::{ErrorKind, ExecutionResult, Job, SystemError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub use memory::MemoryBroker;
pub use router::{ResultRouter, Subscription};

/// Default bound on one submit round trip.
pub const DEFAULT_ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection is not open")]
    NotConnected,

    #[error("no result for job {job_id} within {timeout:?}")]
    Timeout { job_id: String, timeout: Duration },

    #[error("result channel {0} already has a subscriber")]
    AlreadySubscribed(String),

    #[error("result channel {0} closed before a message arrived")]
    ChannelClosed(String),

    #[error("this broker connection was opened without a result subscriber")]
    NoSubscriber,

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BrokerError {
    /// Wire classification of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Timeout { .. } => ErrorKind::BrokerTimeout,
            BrokerError::Serialization(_) | BrokerError::AlreadySubscribed(_) => ErrorKind::Internal,
            BrokerError::NotConnected
            | BrokerError::ChannelClosed(_)
            | BrokerError::NoSubscriber
            | BrokerError::Redis(_) => ErrorKind::QueueUnavailable,
        }
    }

    pub fn to_system_error(&self) -> SystemError {
        SystemError::new(self.kind(), self.to_string())
    }
}

/// Queue plus publish/subscribe transport shared by the gateway and workers.
#[async_trait]
pub trait Broker: Send + Sync {
    fn is_open(&self) -> bool;

    /// Start listening on `channel`. Must be called before the job that will
    /// answer on it is pushed.
    fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError>;

    /// Append a serialized job to the tail of the queue.
    async fn push(&self, payload: String) -> Result<(), BrokerError>;

    /// Take the head of the queue, waiting up to `timeout` for one to arrive.
    async fn pop(&self, timeout: Duration) -> Result<Option<String>, BrokerError>;

    /// Publish one message on `channel`. Succeeds even if nobody listens.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError>;

    /// Keep a published result retrievable for `ttl`.
    async fn cache_result(&self, job_id: &str, payload: &str, ttl: Duration) -> Result<(), BrokerError>;

    async fn cached_result(&self, job_id: &str) -> Result<Option<String>, BrokerError>;

    /// Stop serving; pending subscriptions fail with `ChannelClosed`.
    async fn close(&self);
}

/// Result payload exactly as the worker published it.
#[derive(Debug, Clone)]
pub struct RawResult {
    pub job_id: String,
    pub payload: String,
}

impl RawResult {
    pub fn parse(&self) -> Result<ExecutionResult, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

pub struct BrokerManager {
    backend: Arc<dyn Broker>,
    round_trip_timeout: Duration,
}

impl BrokerManager {
    pub fn new(backend: Arc<dyn Broker>, round_trip_timeout: Duration) -> Self {
        Self {
            backend,
            round_trip_timeout,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Broker> {
        &self.backend
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_open()
    }

    pub fn round_trip_timeout(&self) -> Duration {
        self.round_trip_timeout
    }

    /// Queue `job` and wait for the single result published for it.
    #[instrument(skip(self, job), fields(job_id = tracing::field::Empty, language = %job.language))]
    pub async fn submit(&self, mut job: Job) -> Result<RawResult, BrokerError> {
        if !self.backend.is_open() {
            return Err(BrokerError::NotConnected);
        }

        let job_id = job.ensure_job_id().to_string();
        tracing::Span::current().record("job_id", job_id.as_str());

        let channel = result_channel(&job_id);
        // Dropped on every exit path below, which releases the channel.
        let mut subscription = self.backend.subscribe(&channel)?;

        let payload = serde_json::to_string(&job)?;
        let started = Instant::now();
        self.backend.push(payload).await?;
        debug!(channel = %channel, test_cases = job.test_case.len(), "Job queued, awaiting result");

        match tokio::time::timeout(self.round_trip_timeout, subscription.recv()).await {
            Ok(Ok(payload)) => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Result received");
                Ok(RawResult { job_id, payload })
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Result channel closed");
                Err(e)
            }
            Err(_) => {
                warn!(timeout_secs = self.round_trip_timeout.as_secs(), "Timed out waiting for result");
                Err(BrokerError::Timeout {
                    job_id,
                    timeout: self.round_trip_timeout,
                })
            }
        }
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }
}

/// Process-scoped holder for the shared [`BrokerManager`].
///
/// `get_or_init` runs the initializer at most once at a time; concurrent first
/// callers wait on the guard and then share the established manager. A failed
/// initialization, or a manager whose connection has dropped, leaves room for
/// the next caller to establish a fresh one.
#[derive(Default)]
pub struct BrokerSlot {
    inner: Mutex<Option<Arc<BrokerManager>>>,
}

impl BrokerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Arc<BrokerManager>, BrokerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BrokerManager, BrokerError>>,
    {
        let mut slot = self.inner.lock().await;
        if let Some(manager) = slot.as_ref() {
            if manager.is_open() {
                return Ok(Arc::clone(manager));
            }
            warn!("Broker connection lost, re-establishing");
            manager.close().await;
        }

        let manager = Arc::new(init().await?);
        *slot = Some(Arc::clone(&manager));
        info!("Broker connection established");
        Ok(manager)
    }

    /// The current manager, if one has been established.
    pub async fn get(&self) -> Option<Arc<BrokerManager>> {
        self.inner.lock().await.clone()
    }

    /// Tear down the current manager. Returns false if there was none.
    pub async fn shutdown(&self) -> bool {
        let manager = self.inner.lock().await.take();
        match manager {
            Some(manager) => {
                manager.close().await;
                info!("Broker connection closed");
                true
            }
            None => false,
        }
    }
}

lazy_static::lazy_static! {
    /// The broker connection shared by every submit call in this process.
    pub static ref GLOBAL_BROKER: BrokerSlot = BrokerSlot::new();
}

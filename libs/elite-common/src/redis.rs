use crate::broker::{Broker, BrokerError, ResultRouter, Subscription};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Redis key semantics - shared by gateway and workers so the two never drift.

pub const QUEUE_NAME: &str = "elite:queue:jobs";
pub const RESULT_PREFIX: &str = "elite:result";
pub const CACHE_PREFIX: &str = "elite:cache";

/// Channel a job's result is published on
pub fn result_channel(job_id: &str) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

/// Pattern matching every result channel
pub fn result_pattern() -> String {
    format!("{}:*", RESULT_PREFIX)
}

/// Key holding a recently published result
pub fn cache_key(job_id: &str) -> String {
    format!("{}:{}", CACHE_PREFIX, job_id)
}

/// Push a serialized job onto the queue
/// Uses RPUSH so that BLPOP yields FIFO order
pub async fn push_job(conn: &mut ConnectionManager, payload: &str) -> RedisResult<()> {
    conn.rpush(QUEUE_NAME, payload).await
}

/// Pop the oldest job, blocking up to `timeout_seconds`
pub async fn pop_job(conn: &mut ConnectionManager, timeout_seconds: f64) -> RedisResult<Option<String>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_NAME, timeout_seconds).await?;
    Ok(result.map(|(_key, payload)| payload))
}

pub async fn publish_result(conn: &mut ConnectionManager, channel: &str, payload: &str) -> RedisResult<()> {
    let _receivers: i64 = conn.publish(channel, payload).await?;
    Ok(())
}

/// Store a result with a short TTL so a reconnecting client can fetch it
pub async fn store_result(
    conn: &mut ConnectionManager,
    job_id: &str,
    payload: &str,
    ttl_seconds: u64,
) -> RedisResult<()> {
    redis::cmd("SET")
        .arg(cache_key(job_id))
        .arg(payload)
        .arg("EX")
        .arg(ttl_seconds.max(1))
        .query_async(conn)
        .await
}

pub async fn get_result(conn: &mut ConnectionManager, job_id: &str) -> RedisResult<Option<String>> {
    conn.get(cache_key(job_id)).await
}

/// Redis-backed broker.
///
/// Queue operations and publishes share one multiplexed connection. When
/// opened with a subscriber, a second connection holds a single pattern
/// subscription over every result channel and hands each message to the
/// in-process [`ResultRouter`]; per-job subscriptions are registrations in that
/// router, so they exist before the job is pushed.
pub struct RedisBroker {
    conn: ConnectionManager,
    router: Option<Arc<ResultRouter>>,
    open: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RedisBroker {
    /// Queue and publish access only (what a worker needs).
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(redis_url = %redis_url, "Connected to Redis");

        Ok(Self {
            conn,
            router: None,
            open: Arc::new(AtomicBool::new(true)),
            listener: Mutex::new(None),
        })
    }

    /// Queue, publish and result subscription (what the gateway needs).
    pub async fn connect_with_subscriber(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;

        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub.psubscribe(result_pattern()).await?;
        info!(redis_url = %redis_url, pattern = %result_pattern(), "Connected to Redis with result subscriber");

        let router = Arc::new(ResultRouter::new());
        let open = Arc::new(AtomicBool::new(true));

        let listener = {
            let router = Arc::clone(&router);
            let open = Arc::clone(&open);
            tokio::spawn(async move {
                let mut messages = Box::pin(pubsub.into_on_message());
                while let Some(msg) = messages.next().await {
                    let channel = msg.get_channel_name().to_string();
                    match msg.get_payload::<String>() {
                        Ok(payload) => {
                            if !router.deliver(&channel, payload) {
                                debug!(channel = %channel, "Result arrived with no waiting caller");
                            }
                        }
                        Err(e) => warn!(channel = %channel, error = %e, "Unreadable result payload"),
                    }
                }
                error!("Result subscriber connection closed");
                open.store(false, Ordering::Release);
                router.close_all();
            })
        };

        Ok(Self {
            conn,
            router: Some(router),
            open,
            listener: Mutex::new(Some(listener)),
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::NotConnected);
        }
        match &self.router {
            Some(router) => router.subscribe(channel),
            None => Err(BrokerError::NoSubscriber),
        }
    }

    async fn push(&self, payload: String) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        push_job(&mut conn, &payload).await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::NotConnected);
        }
        let mut conn = self.conn.clone();
        Ok(pop_job(&mut conn, timeout.as_secs_f64()).await?)
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        publish_result(&mut conn, channel, &payload).await?;
        Ok(())
    }

    async fn cache_result(&self, job_id: &str, payload: &str, ttl: Duration) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        store_result(&mut conn, job_id, payload, ttl.as_secs()).await?;
        Ok(())
    }

    async fn cached_result(&self, job_id: &str) -> Result<Option<String>, BrokerError> {
        let mut conn = self.conn.clone();
        Ok(get_result(&mut conn, job_id).await?)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
        if let Some(router) = &self.router {
            router.close_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Job, Language, Mode, TestCase};

    #[test]
    fn test_key_naming() {
        assert_eq!(QUEUE_NAME, "elite:queue:jobs");
        assert_eq!(result_channel("abc"), "elite:result:abc");
        assert_eq!(cache_key("abc"), "elite:cache:abc");
        assert_eq!(result_pattern(), "elite:result:*");
    }

    #[test]
    fn test_result_channels_are_per_job() {
        assert_ne!(result_channel("a"), result_channel("b"));
        assert_eq!(result_channel("a"), result_channel("a"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_broker_error() {
        // Nothing listens on port 1.
        let result = RedisBroker::connect_with_subscriber("redis://127.0.0.1:1").await;
        assert!(matches!(result, Err(BrokerError::Redis(_))));
        let result = RedisBroker::connect("redis://127.0.0.1:1").await;
        assert!(matches!(result, Err(BrokerError::Redis(_))));
    }

    /// Requires a Redis server on REDIS_URL (default redis://127.0.0.1:6379)
    #[tokio::test]
    #[ignore]
    async fn test_redis_round_trip() {
        use crate::broker::BrokerManager;

        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let gateway = Arc::new(RedisBroker::connect_with_subscriber(&url).await.unwrap());
        let worker = RedisBroker::connect(&url).await.unwrap();
        let manager = BrokerManager::new(gateway.clone(), Duration::from_secs(10));

        let responder = tokio::spawn(async move {
            let payload = worker.pop(Duration::from_secs(5)).await.unwrap().unwrap();
            let job: Job = serde_json::from_str(&payload).unwrap();
            worker
                .publish(&result_channel(&job.job_id), format!("{{\"job_id\":\"{}\"}}", job.job_id))
                .await
                .unwrap();
        });

        let job = Job::new(Language::Python, "print(1)", vec![TestCase::new(vec![], "1")], 1000, Mode::Run);
        let raw = manager.submit(job).await.unwrap();
        responder.await.unwrap();
        assert!(raw.payload.contains(&raw.job_id));
        gateway.close().await;
    }
}

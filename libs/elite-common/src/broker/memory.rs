use super::{Broker, BrokerError, ResultRouter, Subscription};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// In-process broker with the same delivery semantics as the Redis backend:
/// FIFO queue, single delivery per entry, at-most-once result channels.
///
/// Used by tests and by single-process deployments.
pub struct MemoryBroker {
    queue: Mutex<VecDeque<String>>,
    available: Notify,
    router: Arc<ResultRouter>,
    cache: Mutex<HashMap<String, (String, Instant)>>,
    open: AtomicBool,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            router: Arc::new(ResultRouter::new()),
            cache: Mutex::new(HashMap::new()),
            open: AtomicBool::new(true),
        }
    }

    pub fn router(&self) -> &Arc<ResultRouter> {
        &self.router
    }

    /// Number of queued entries not yet popped.
    pub fn len(&self) -> usize {
        locked(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::NotConnected);
        }
        self.router.subscribe(channel)
    }

    async fn push(&self, payload: String) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::NotConnected);
        }
        locked(&self.queue).push_back(payload);
        self.available.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.is_open() {
                return Err(BrokerError::NotConnected);
            }
            if let Some(payload) = locked(&self.queue).pop_front() {
                return Ok(Some(payload));
            }
            // A push that lands between the check above and this wait leaves a
            // stored permit, so the wakeup is not lost.
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::NotConnected);
        }
        self.router.deliver(channel, payload);
        Ok(())
    }

    async fn cache_result(&self, job_id: &str, payload: &str, ttl: Duration) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::NotConnected);
        }
        let expires = Instant::now() + ttl;
        let mut cache = locked(&self.cache);
        cache.retain(|_, (_, at)| *at > Instant::now());
        cache.insert(job_id.to_string(), (payload.to_string(), expires));
        Ok(())
    }

    async fn cached_result(&self, job_id: &str) -> Result<Option<String>, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::NotConnected);
        }
        let cache = locked(&self.cache);
        Ok(cache
            .get(job_id)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(payload, _)| payload.clone()))
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.router.close_all();
        self.available.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let broker = MemoryBroker::new();
        broker.push("a".into()).await.unwrap();
        broker.push("b".into()).await.unwrap();

        assert_eq!(broker.pop(Duration::from_millis(10)).await.unwrap().as_deref(), Some("a"));
        assert_eq!(broker.pop(Duration::from_millis(10)).await.unwrap().as_deref(), Some("b"));
        assert_eq!(broker.pop(Duration::from_millis(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let broker = Arc::new(MemoryBroker::new());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.push("late".into()).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_each_entry_popped_once() {
        let broker = Arc::new(MemoryBroker::new());
        for i in 0..50 {
            broker.push(i.to_string()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(p) = broker.pop(Duration::from_millis(20)).await.unwrap() {
                    got.push(p);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_by_key(|p| p.parse::<u32>().unwrap());
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_pop() {
        let broker = Arc::new(MemoryBroker::new());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.pop(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close().await;
        assert!(matches!(waiter.await.unwrap(), Err(BrokerError::NotConnected)));
    }

    #[tokio::test]
    async fn test_result_cache_expires() {
        let broker = MemoryBroker::new();
        broker.cache_result("j1", "{}", Duration::from_millis(30)).await.unwrap();
        assert_eq!(broker.cached_result("j1").await.unwrap().as_deref(), Some("{}"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(broker.cached_result("j1").await.unwrap(), None);
    }
}

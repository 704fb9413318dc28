//! In-process routing of result messages to the caller waiting on them.

use super::BrokerError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;

struct Waiter {
    token: u64,
    tx: oneshot::Sender<String>,
}

/// Maps result channels to the single caller subscribed to each of them.
///
/// A channel holds at most one waiter, and a waiter receives at most one
/// message: delivery removes the entry, so duplicates are dropped.
#[derive(Default)]
pub struct ResultRouter {
    waiters: Mutex<HashMap<String, Waiter>>,
    next_token: AtomicU64,
}

impl ResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<String, Waiter>> {
        self.waiters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register interest in `channel`. The returned guard unsubscribes on drop.
    pub fn subscribe(self: &Arc<Self>, channel: &str) -> Result<Subscription, BrokerError> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut waiters = self.waiters();
        if waiters.contains_key(channel) {
            return Err(BrokerError::AlreadySubscribed(channel.to_string()));
        }
        waiters.insert(channel.to_string(), Waiter { token, tx });

        Ok(Subscription {
            channel: channel.to_string(),
            token,
            rx,
            router: Arc::clone(self),
        })
    }

    /// Hand `payload` to the subscriber of `channel`.
    /// Returns false when nobody is listening; the message is then discarded.
    pub fn deliver(&self, channel: &str, payload: String) -> bool {
        let waiter = self.waiters().remove(channel);
        match waiter {
            Some(waiter) => waiter.tx.send(payload).is_ok(),
            None => {
                debug!(channel = channel, "No subscriber for result, discarding");
                false
            }
        }
    }

    /// Drop every pending waiter; their `recv` calls fail with `ChannelClosed`.
    pub fn close_all(&self) {
        self.waiters().clear();
    }

    /// Number of channels currently subscribed.
    pub fn active(&self) -> usize {
        self.waiters().len()
    }

    fn unsubscribe(&self, channel: &str, token: u64) {
        let mut waiters = self.waiters();
        if waiters.get(channel).is_some_and(|w| w.token == token) {
            waiters.remove(channel);
        }
    }
}

/// Live subscription on one result channel.
pub struct Subscription {
    channel: String,
    token: u64,
    rx: oneshot::Receiver<String>,
    router: Arc<ResultRouter>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the single message published on this channel.
    pub async fn recv(&mut self) -> Result<String, BrokerError> {
        (&mut self.rx)
            .await
            .map_err(|_| BrokerError::ChannelClosed(self.channel.clone()))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.router.unsubscribe(&self.channel, self.token);
    }
}

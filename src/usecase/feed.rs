//! Live query feeds.
//!
//! A subscriber first receives the full ordered result set and then a fresh full
//! result set after every change to its key, until it is disposed. Snapshot
//! loads for a key are serialized and versioned, so a subscriber never sees an
//! older snapshot after a newer one.

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::message::Message;
use crate::domain::notification::Notification;
use crate::domain::request::ServiceRequest;

pub type Snapshot<T> = Arc<Vec<T>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("feed source failed: {0}")]
    Source(String),
    #[error("feed closed")]
    Closed,
}

#[derive(Clone)]
struct Delivery<T> {
    version: u64,
    result: Result<Snapshot<T>, FeedError>,
}

struct Channel<T> {
    tx: broadcast::Sender<Delivery<T>>,
    version: AsyncMutex<u64>,
}

type Channels<K, T> = Mutex<HashMap<K, Arc<Channel<T>>>>;

/// Removes `channel` from the map once at most `remaining` receivers are left on it.
fn release<K, T>(channels: &Channels<K, T>, key: &K, channel: &Weak<Channel<T>>, remaining: usize, feed: &'static str)
where
    K: Eq + Hash + Debug,
{
    let mut channels = channels.lock().unwrap_or_else(PoisonError::into_inner);
    let idle = channels
        .get(key)
        .is_some_and(|c| std::ptr::eq(Arc::as_ptr(c), channel.as_ptr()) && c.tx.receiver_count() <= remaining);
    if idle {
        channels.remove(key);
        tracing::debug!(feed, ?key, "removed idle feed channel");
    }
}

pub struct Feed<K, T> {
    name: &'static str,
    capacity: usize,
    channels: Arc<Channels<K, T>>,
}

impl<K, T> Feed<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn attach(&self, key: &K) -> (Arc<Channel<T>>, broadcast::Receiver<Delivery<T>>) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let channel = channels
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(feed = self.name, ?key, "creating feed channel");
                Arc::new(Channel {
                    tx: broadcast::channel(self.capacity).0,
                    version: AsyncMutex::new(0),
                })
            })
            .clone();
        let rx = channel.tx.subscribe();
        (channel, rx)
    }

    /// The channel for `key` if anyone is listening; idle channels are dropped here.
    fn active(&self, key: &K) -> Option<Arc<Channel<T>>> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        match channels.get(key) {
            Some(channel) if channel.tx.receiver_count() > 0 => Some(channel.clone()),
            Some(_) => {
                channels.remove(key);
                tracing::debug!(feed = self.name, ?key, "removed idle feed channel");
                None
            }
            None => None,
        }
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(key).map_or(0, |c| c.tx.receiver_count())
    }

    pub async fn subscribe<F, Fut, E>(&self, key: K, load: F) -> Result<Subscription<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let (channel, rx) = self.attach(&key);
        let version = channel.version.lock().await;

        let channels = Arc::downgrade(&self.channels);
        let weak_channel = Arc::downgrade(&channel);
        let feed = self.name;
        let release_key = key.clone();
        // Releases the channel on drop, including when `load` fails below.
        let mut subscription = Subscription {
            feed,
            initial: None,
            seen: *version,
            rx,
            release: Some(Box::new(move || {
                if let Some(channels) = channels.upgrade() {
                    release(&channels, &release_key, &weak_channel, 1, feed);
                }
            })),
        };

        let items = load().await?;

        metrics::counter!("feed_subscriptions_total", "feed" => self.name).increment(1);
        tracing::debug!(feed = self.name, ?key, version = *version, count = items.len(), "feed subscribed");

        subscription.initial = Some(Arc::new(items));
        Ok(subscription)
    }

    /// Reloads the result set for `key` and pushes it to every subscriber.
    /// Does nothing when nobody is subscribed.
    pub async fn refresh<F, Fut, E>(&self, key: &K, load: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: Display,
    {
        let Some(channel) = self.active(key) else {
            tracing::trace!(feed = self.name, ?key, "no subscribers, skipping refresh");
            return;
        };

        let mut version = channel.version.lock().await;
        let result = match load().await {
            Ok(items) => Ok(Arc::new(items)),
            Err(e) => {
                tracing::warn!(feed = self.name, ?key, error = %e, "failed to load feed snapshot");
                Err(FeedError::Source(e.to_string()))
            }
        };
        *version += 1;

        let delivered = channel
            .tx
            .send(Delivery {
                version: *version,
                result,
            })
            .unwrap_or(0);

        tracing::debug!(feed = self.name, ?key, version = *version, delivered, "feed refreshed");
    }
}

pub struct Subscription<T> {
    feed: &'static str,
    initial: Option<Snapshot<T>>,
    seen: u64,
    rx: broadcast::Receiver<Delivery<T>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Waits for the next snapshot. `FeedError::Closed` is final; source errors are not.
    pub async fn recv(&mut self) -> Result<Snapshot<T>, FeedError> {
        if let Some(initial) = self.initial.take() {
            return Ok(initial);
        }

        loop {
            match self.rx.recv().await {
                Ok(delivery) => {
                    if delivery.version <= self.seen {
                        continue;
                    }
                    self.seen = delivery.version;
                    return delivery.result;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(feed = self.feed, skipped, "feed subscriber lagged, skipping to latest snapshot");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(FeedError::Closed);
                }
            }
        }
    }

    pub fn dispose(self) {
        tracing::debug!(feed = self.feed, "subscription disposed");
    }

    /// Drives the subscription on a background task, invoking `on_change` for every
    /// snapshot and `on_error` for every failure until the returned [`Disposer`] is used.
    ///
    /// Callbacks must not dispose their own subscription.
    pub(crate) fn observe<C, E>(mut self, mut on_change: C, mut on_error: E) -> Disposer
    where
        C: FnMut(Snapshot<T>) + Send + 'static,
        E: FnMut(FeedError) + Send + 'static,
    {
        let active = Arc::new(Mutex::new(true));
        let gate = active.clone();
        let feed = self.feed;

        let handle = tokio::spawn(async move {
            loop {
                let delivery = self.recv().await;
                let alive = gate.lock().unwrap_or_else(PoisonError::into_inner);
                if !*alive {
                    break;
                }
                match delivery {
                    Ok(snapshot) => on_change(snapshot),
                    Err(FeedError::Closed) => {
                        on_error(FeedError::Closed);
                        break;
                    }
                    Err(e) => on_error(e),
                }
            }
        });

        Disposer {
            feed,
            active,
            handle: Some(handle),
        }
    }
}

/// Cancels an observed subscription. No callback runs once `dispose` has returned.
pub(crate) struct Disposer {
    feed: &'static str,
    active: Arc<Mutex<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Disposer {
    pub(crate) fn dispose(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            *self.active.lock().unwrap_or_else(PoisonError::into_inner) = false;
            handle.abort();
            tracing::debug!(feed = self.feed, "observer disposed");
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The three live feeds the application exposes.
pub struct Feeds {
    pub pending: Feed<(), ServiceRequest>,
    pub messages: Feed<Uuid, Message>,
    pub notifications: Feed<Uuid, Notification>,
}

impl Feeds {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Feed::new("pending_requests", capacity),
            messages: Feed::new("messages", capacity),
            notifications: Feed::new("notifications", capacity),
        }
    }
}

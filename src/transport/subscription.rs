use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

type DropHook = Box<dyn FnOnce() + Send + Sync>;

/// Receiving end of a stream subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    on_drop: Option<DropHook>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, on_drop: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            rx,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// A subscription that never yields, handed out when subscribing failed.
    pub fn closed() -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self { rx, on_drop: None }
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook();
        }
    }
}

struct Entry<T> {
    id: u64,
    tx: mpsc::UnboundedSender<T>,
}

struct Inner<K, T> {
    next_id: u64,
    subscribers: HashMap<K, Vec<Entry<T>>>,
}

/// Local fan-out of stream payloads keyed by channel.
pub struct Registry<K, T> {
    inner: Mutex<Inner<K, T>>,
}

impl<K, T> Registry<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                subscribers: HashMap::new(),
            }),
        })
    }

    /// Register a subscriber. The flag is true for the first subscriber of
    /// `key`; `on_last` runs once the last one for `key` is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        key: K,
        on_last: impl FnOnce(K) + Send + Sync + 'static,
    ) -> (Subscription<T>, bool) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (id, first) = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            let entries = inner.subscribers.entry(key.clone()).or_default();
            let first = entries.is_empty();
            entries.push(Entry { id, tx });
            (id, first)
        };

        let registry: Weak<Self> = Arc::downgrade(self);
        let subscription = Subscription::new(rx, move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if registry.remove(&key, id) {
                on_last(key);
            }
        });
        (subscription, first)
    }

    /// Deliver to every live subscriber of `key`, returning how many got it.
    pub fn publish(&self, key: &K, value: T) -> usize {
        let mut inner = self.inner.lock();
        let Some(entries) = inner.subscribers.get_mut(key) else {
            return 0;
        };
        entries.retain(|entry| !entry.tx.is_closed());
        for entry in entries.iter() {
            let _ = entry.tx.send(value.clone());
        }
        entries.len()
    }

    /// Returns true when this removed the last subscriber for `key`.
    fn remove(&self, key: &K, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let Some(entries) = inner.subscribers.get_mut(key) else {
            return false;
        };
        entries.retain(|entry| entry.id != id);
        if entries.is_empty() {
            inner.subscribers.remove(key);
            true
        } else {
            false
        }
    }

    /// Channels with at least one subscriber.
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().subscribers.keys().cloned().collect()
    }

    pub fn has_subscribers(&self, key: &K) -> bool {
        self.inner.lock().subscribers.contains_key(key)
    }
}

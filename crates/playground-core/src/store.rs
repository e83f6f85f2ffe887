//! Reactive store: named, independently subscribable cells
//!
//! Each [`Cell`] wraps a `tokio::sync::watch` channel and counts its live
//! [`Subscription`]s. A cell created with an idle TTL runs its teardown hooks
//! once it has had no subscribers for that long.

use crate::{PlaygroundError, Result};
use futures::stream::{self, BoxStream, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

type Teardown = Box<dyn FnOnce() + Send>;

struct CellInner<T> {
    name: String,
    tx: watch::Sender<T>,
    subscribers: AtomicUsize,
    generation: AtomicU64,
    idle_ttl: Option<Duration>,
    teardown: Mutex<Vec<Teardown>>,
}

impl<T> CellInner<T> {
    fn run_teardown_if_idle(&self, generation: u64) {
        if self.subscribers.load(Ordering::SeqCst) != 0
            || self.generation.load(Ordering::SeqCst) != generation
        {
            return;
        }
        let hooks: Vec<Teardown> = match self.teardown.lock() {
            Ok(mut hooks) => hooks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        if !hooks.is_empty() {
            debug!("Cell '{}' idle, releasing {} resources", self.name, hooks.len());
        }
        for hook in hooks {
            hook();
        }
    }
}

/// A single reactive value
pub struct Cell<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("name", &self.inner.name)
            .field("subscribers", &self.inner.subscribers.load(Ordering::SeqCst))
            .finish()
    }
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self::with_idle_ttl(name, value, None)
    }

    pub fn with_idle_ttl(name: impl Into<String>, value: T, idle_ttl: Option<Duration>) -> Self {
        let (tx, _) = watch::channel(value);
        Self {
            inner: Arc::new(CellInner {
                name: name.into(),
                tx,
                subscribers: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                idle_ttl,
                teardown: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn get(&self) -> T {
        self.inner.tx.borrow().clone()
    }

    /// Publish a new value to every subscriber
    pub fn set(&self, value: T) {
        self.inner.tx.send_replace(value);
    }

    /// Derive the next value from the current one and publish it
    pub fn update<F>(&self, f: F) -> T
    where
        F: FnOnce(&T) -> T,
    {
        self.inner.tx.send_modify(|current| *current = f(current));
        self.get()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.inner.subscribers.fetch_add(1, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        Subscription {
            rx: self.inner.tx.subscribe(),
            cell: self.inner.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.load(Ordering::SeqCst)
    }

    /// Register a hook that releases resources once the cell goes idle.
    /// Hooks run once; register again to cover the next idle period.
    pub fn on_idle(&self, hook: impl FnOnce() + Send + 'static) {
        match self.inner.teardown.lock() {
            Ok(mut hooks) => hooks.push(Box::new(hook)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(hook)),
        }
    }

    /// Handle that does not keep the cell alive, for use inside its own hooks
    pub fn downgrade(&self) -> WeakCell<T> {
        WeakCell {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

pub struct WeakCell<T> {
    inner: Weak<CellInner<T>>,
}

impl<T> Clone for WeakCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WeakCell<T> {
    pub fn upgrade(&self) -> Option<Cell<T>> {
        self.inner.upgrade().map(|inner| Cell { inner })
    }
}

/// Live handle on a cell's value; dropping it may start idle teardown
pub struct Subscription<T: Send + Sync + 'static> {
    rx: watch::Receiver<T>,
    cell: Arc<CellInner<T>>,
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for a value newer than the last one seen
    pub async fn changed(&mut self) -> Result<T> {
        self.rx
            .changed()
            .await
            .map_err(|_| PlaygroundError::Cancelled)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// The current value followed by every later one
    pub fn into_stream(mut self) -> BoxStream<'static, T> {
        let first = self.rx.borrow_and_update().clone();
        let rest = stream::unfold(self, |mut sub| async move {
            match sub.changed().await {
                Ok(value) => Some((value, sub)),
                Err(_) => None,
            }
        });
        stream::once(async move { first }).chain(rest).boxed()
    }
}

impl<T: Send + Sync + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        let remaining = self.cell.subscribers.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining != 0 {
            return;
        }
        let Some(ttl) = self.cell.idle_ttl else {
            return;
        };

        let generation = self.cell.generation.load(Ordering::SeqCst);
        let cell = self.cell.clone();
        // Without a runtime there is nothing to wait on.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(ttl).await;
                    cell.run_teardown_if_idle(generation);
                });
            }
            Err(_) => cell.run_teardown_if_idle(generation),
        }
    }
}

/// Owner of named cells, injected wherever reactive state is shared
#[derive(Clone, Default)]
pub struct Store {
    cells: Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
    idle_ttl: Option<Duration>,
}

impl Store {
    /// Cells created by this store go idle after `idle_ttl` without subscribers
    pub fn new(idle_ttl: Option<Duration>) -> Self {
        Self {
            cells: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
        }
    }

    /// Get the cell called `name`, creating it from `init` on first use
    pub fn cell<T, F>(&self, name: &str, init: F) -> Result<Cell<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get::<T>(name)? {
            return Ok(existing);
        }

        let mut cells = self.cells.write().unwrap_or_else(|e| e.into_inner());
        let entry = cells.entry(name.to_string()).or_insert_with(|| {
            debug!("Creating store cell '{}'", name);
            let cell: Arc<dyn Any + Send + Sync> =
                Arc::new(Cell::with_idle_ttl(name, init(), self.idle_ttl));
            cell
        });
        downcast(name, entry)
    }

    /// Look up an existing cell; a cell of another type is a defect
    pub fn get<T>(&self, name: &str) -> Result<Option<Cell<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cells = self.cells.read().unwrap_or_else(|e| e.into_inner());
        cells.get(name).map(|entry| downcast(name, entry)).transpose()
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut cells = self.cells.write().unwrap_or_else(|e| e.into_inner());
        cells.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let cells = self.cells.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = cells.keys().cloned().collect();
        names.sort();
        names
    }
}

fn downcast<T>(name: &str, entry: &Arc<dyn Any + Send + Sync>) -> Result<Cell<T>>
where
    T: Clone + Send + Sync + 'static,
{
    entry
        .downcast_ref::<Cell<T>>()
        .cloned()
        .ok_or_else(|| PlaygroundError::Defect(format!("store cell '{}' has another type", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_subscribers_observe_updates() {
        let store = Store::default();
        let cell = store.cell("counter", || 0u32).unwrap();
        let mut sub = cell.subscribe();

        cell.set(1);
        assert_eq!(sub.changed().await.unwrap(), 1);
        assert_eq!(cell.update(|v| v + 1), 2);
        assert_eq!(sub.changed().await.unwrap(), 2);

        let again = store.cell("counter", || 99u32).unwrap();
        assert_eq!(again.get(), 2);
        assert_eq!(again.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_starts_with_current_value() {
        let cell = Cell::new("name", "a".to_string());
        let mut stream = cell.subscribe().into_stream();
        assert_eq!(stream.next().await.as_deref(), Some("a"));
        cell.set("b".to_string());
        assert_eq!(stream.next().await.as_deref(), Some("b"));
    }

    #[test]
    fn test_type_mismatch_is_defect() {
        let store = Store::default();
        store.cell("value", || 1u8).unwrap();
        let err = store.cell("value", || "x".to_string()).unwrap_err();
        assert!(matches!(err, PlaygroundError::Defect(_)));
        assert_eq!(store.names(), vec!["value".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_teardown_after_ttl() {
        let store = Store::new(Some(Duration::from_secs(5)));
        let cell = store.cell("terminal", || ()).unwrap();
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        cell.on_idle(move || flag.store(true, Ordering::SeqCst));

        let sub = cell.subscribe();
        drop(sub);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!released.load(Ordering::SeqCst));

        // Resubscribing inside the window cancels the pending teardown
        let sub = cell.subscribe();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!released.load(Ordering::SeqCst));

        drop(sub);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_can_reset_its_own_cell() {
        let cell = Cell::with_idle_ttl("list", vec![1, 2], Some(Duration::from_secs(1)));
        let weak = cell.downgrade();
        cell.on_idle(move || {
            if let Some(cell) = weak.upgrade() {
                cell.set(Vec::new());
            }
        });

        drop(cell.subscribe());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cell.get().is_empty());

        let weak = cell.downgrade();
        drop(cell);
        assert!(weak.upgrade().is_none());
    }
}

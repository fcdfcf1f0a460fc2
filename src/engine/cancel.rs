use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use uuid::Uuid;

/// Owner side of a cancellation flag. Cancelling is sticky.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observer side, handed to a run.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Cancellation handles for in-flight runs, keyed by run id.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    handles: Mutex<HashMap<Uuid, CancelHandle>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid) -> CancelSignal {
        let handle = CancelHandle::new();
        let signal = handle.signal();
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        signal
    }

    pub fn cancel(&self, id: &Uuid) -> bool {
        if let Some(handle) = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
        {
            handle.cancel();
            return true;
        }
        false
    }

    pub fn cancel_all(&self) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let count = handles.len();
        for (_, handle) in handles.drain() {
            handle.cancel();
        }
        count
    }

    pub fn remove(&self, id: &Uuid) {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let handle = CancelHandle::new();
        let signal = handle.signal();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn never_stays_pending() {
        let signal = CancelSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(waited.is_err());
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn registry_cancels_once() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let signal = registry.register(id);
        assert!(registry.cancel(&id));
        assert!(signal.is_cancelled());
        assert!(!registry.cancel(&id));
    }

    #[test]
    fn remove_forgets_without_cancelling() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let signal = registry.register(id);
        registry.remove(&id);
        assert!(!registry.cancel(&id));
        assert!(!signal.is_cancelled());
    }
}

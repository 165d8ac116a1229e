use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

/// Wake-up channel of one scheduler.
///
/// `wait` parks the caller for at most the given duration and `notify` ends
/// the park early. A notification sent while nobody waits is kept (the
/// channel holds one) and consumed by the next `wait`.
#[derive(Clone)]
pub struct Signal {
    tx: mpsc::Sender<()>,
    rx: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Wake the waiter. Never blocks; a pending notification absorbs this one.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// Park for up to `timeout`. Returns true when woken by `notify`.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.rx.lock().await;
        matches!(tokio::time::timeout(timeout, rx.recv()).await, Ok(Some(())))
    }

    /// Drop a pending notification, if any.
    pub fn drain(&self) {
        if let Ok(mut rx) = self.rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

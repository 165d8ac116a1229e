use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::KvSnapshot;

/// Producer half of a watch, held by the store backend.
#[derive(Clone)]
pub struct WatchSender {
    tx: mpsc::Sender<KvSnapshot>,
    cancel: CancellationToken,
}

impl WatchSender {
    /// Deliver a snapshot. Returns false once the consumer is gone.
    pub async fn send(&self, snapshot: KvSnapshot) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(snapshot).await.is_ok()
    }

    /// Resolves when the consumer cancels or drops the stream.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Stream of snapshots for a watched prefix.
///
/// Dropping the stream cancels the subscription.
pub struct WatchStream {
    rx: mpsc::Receiver<KvSnapshot>,
    cancel: CancellationToken,
}

impl WatchStream {
    /// Create a connected sender/stream pair.
    pub fn channel(buffer: usize) -> (WatchSender, WatchStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        (
            WatchSender {
                tx,
                cancel: cancel.clone(),
            },
            WatchStream { rx, cancel },
        )
    }

    /// Wait for the next snapshot. `None` once cancelled or the producer ends.
    pub async fn next(&mut self) -> Option<KvSnapshot> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            snapshot = self.rx.recv() => snapshot,
        }
    }

    /// Stop the subscription.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this stream from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshots_flow_until_cancelled() {
        let (tx, mut stream) = WatchStream::channel(4);

        let mut snapshot = KvSnapshot::new();
        snapshot.insert("c/LEADER".to_string(), "a".to_string());
        assert!(tx.send(snapshot.clone()).await);
        assert_eq!(stream.next().await, Some(snapshot));

        stream.cancel();
        assert!(stream.next().await.is_none());
        assert!(tx.is_cancelled());
        assert!(!tx.send(KvSnapshot::new()).await);
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let (tx, stream) = WatchStream::channel(1);
        drop(stream);
        tx.cancelled().await;
        assert!(tx.is_cancelled());
    }
}

//! Caller-side cancellation of an in-flight stream.
//!
//! An [`AbortHandle`] and its [`AbortSignal`]s share one `watch` channel. The
//! driver races [`AbortSignal::aborted`] against every pull from the byte
//! source, so cancellation is observed at the next suspension point.

use std::sync::Arc;

use tokio::sync::watch;

/// Requests cancellation. Cloneable so a Ctrl-C handler and a UI can share it.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes cancellation.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: Option<watch::Receiver<bool>>,
}

#[must_use]
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (
        AbortHandle { tx: Arc::new(tx) },
        AbortSignal { rx: Some(rx) },
    )
}

impl AbortHandle {
    /// Idempotent; only the first call has any effect on the stream.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl AbortSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self { rx: None }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once abort has been requested.
    ///
    /// Stays pending forever if every handle is dropped without aborting.
    pub async fn aborted(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

use tokio::sync::watch;

/// Creates a linked cancellation handle and listener.
pub(crate) fn cancel_pair() -> (CancelHandle, CancelListener) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelListener { rx })
}

/// Owner side of a cancellation signal. Dropping it also cancels.
pub(crate) struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub(crate) fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Worker side of a cancellation signal, checked at iteration boundaries.
#[derive(Clone)]
pub(crate) struct CancelListener {
    rx: watch::Receiver<bool>,
}

impl CancelListener {
    pub(crate) fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once cancellation is requested or the handle is dropped.
    pub(crate) async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Signals worker completion when dropped, including on unwind.
pub(crate) struct CompletionGuard(watch::Sender<bool>);

impl CompletionGuard {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self(tx), rx)
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

use tokio::sync::watch;

/// Creates a linked pair: cancelling the handle wakes every clone of the token.
pub fn cancellation() -> (CancellationHandle, Cancellation) {
    let (sender, receiver) = watch::channel(false);
    (CancellationHandle { sender }, Cancellation { receiver: Some(receiver) })
}

#[derive(Debug)]
pub struct CancellationHandle {
    sender: watch::Sender<bool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false)
    }

    /// Resolves once cancellation fires. Never resolves for [`Cancellation::never`] or when
    /// the handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = match &self.receiver {
            Some(receiver) => receiver.clone(),
            None => return futures::future::pending().await,
        };

        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                return futures::future::pending().await;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One-shot flag that tasks can await.
///
/// Once raised it stays raised; every current and future waiter returns.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    raised: AtomicBool,
    notify: Notify,
}

impl Signal {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    #[inline]
    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    pub(crate) async fn wait(&self) {
        loop {
            // Registered before the check so a concurrent `raise` is not missed
            let notified = self.notify.notified();

            if self.is_raised() {
                return;
            }

            notified.await;
        }
    }
}

/// Waits on an optional signal; `None` never completes.
pub(crate) async fn wait_for(signal: Option<&Signal>) {
    match signal {
        Some(signal) => signal.wait().await,
        None => std::future::pending().await,
    }
}

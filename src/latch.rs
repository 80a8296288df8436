//! One-way closed flag with async wakeup.

use std::sync::Arc;

use tokio::sync::watch;

/// A flag that flips from unset to set exactly once and wakes every waiter.
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub(crate) struct Latch(Arc<watch::Sender<bool>>);

impl Latch {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    /// Sets the flag. Returns `false` if it was already set.
    pub(crate) fn fire(&self) -> bool {
        self.0.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub(crate) fn is_fired(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the flag is set. Cancel-safe.
    pub(crate) async fn wait(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once() {
        let latch = Latch::new();
        assert!(!latch.is_fired());
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.clone().is_fired());
    }

    #[tokio::test]
    async fn wakes_waiters() {
        let latch = Latch::new();
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };
        tokio::task::yield_now().await;
        latch.fire();
        waiter.await.unwrap();
        // already fired: returns immediately
        latch.wait().await;
    }
}

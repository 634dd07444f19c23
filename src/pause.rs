//! Suspend point released by an external resume signal.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::AgentError;

/// Something a `requireHuman` step can wait on.
#[async_trait]
pub trait HumanPause: Send + Sync {
    async fn pause(&self, reason: &str) -> Result<(), AgentError>;
}

type PauseNotifier = Arc<dyn Fn(&str) + Send + Sync>;

/// Single-slot pause continuation.
///
/// At most one pause may be outstanding; a second `pause` while one is
/// pending fails with [`AgentError::PauseAlreadyPending`]. There is no
/// timeout.
#[derive(Clone, Default)]
pub struct PauseBridge {
    slot: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    on_pause: Option<PauseNotifier>,
}

impl PauseBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the reason each time a pause begins.
    pub fn with_notifier(notify: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            slot: Arc::default(),
            on_pause: Some(Arc::new(notify)),
        }
    }

    /// Release the outstanding pause. Returns false when nothing was pending.
    pub fn resume(&self) -> bool {
        let pending = self.slot.lock().ok().and_then(|mut slot| slot.take());
        match pending {
            Some(tx) => {
                let _ = tx.send(());
                info!("human pause resumed");
                true
            }
            None => {
                debug!("resume with no pending pause");
                false
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl HumanPause for PauseBridge {
    async fn pause(&self, reason: &str) -> Result<(), AgentError> {
        let rx = {
            let mut slot = self
                .slot
                .lock()
                .map_err(|_| AgentError::PauseCancelled)?;
            if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(AgentError::PauseAlreadyPending);
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(tx);
            rx
        };

        info!(reason, "waiting for human");
        if let Some(notify) = &self.on_pause {
            notify(reason);
        }

        rx.await.map_err(|_| AgentError::PauseCancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn resume_releases_pending_pause() {
        let bridge = PauseBridge::new();
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.pause("captcha").await })
        };

        while !bridge.is_paused() {
            tokio::task::yield_now().await;
        }
        assert!(bridge.resume());
        assert_eq!(waiter.await.unwrap(), Ok(()));
        assert!(!bridge.is_paused());
    }

    #[tokio::test]
    async fn resume_without_pause_is_noop() {
        let bridge = PauseBridge::new();
        assert!(!bridge.resume());

        // a later pause is unaffected by the earlier stray resume
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.pause("later").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert!(bridge.resume());
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn second_pause_while_pending_fails() {
        let bridge = PauseBridge::new();
        let first = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.pause("one").await })
        };
        while !bridge.is_paused() {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            bridge.pause("two").await,
            Err(AgentError::PauseAlreadyPending)
        );

        bridge.resume();
        assert_eq!(first.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn notifier_sees_reason() {
        let seen = Arc::new(AtomicUsize::new(0));
        let bridge = {
            let seen = seen.clone();
            PauseBridge::with_notifier(move |reason| {
                assert_eq!(reason, "Failed: click");
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.pause("Failed: click").await })
        };
        while !bridge.is_paused() {
            tokio::task::yield_now().await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        bridge.resume();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn aborted_waiter_frees_the_slot() {
        let bridge = PauseBridge::new();
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.pause("stuck").await })
        };
        while !bridge.is_paused() {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        let _ = waiter.await;

        assert!(!bridge.is_paused());
        let again = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.pause("again").await })
        };
        while !bridge.is_paused() {
            tokio::task::yield_now().await;
        }
        bridge.resume();
        assert_eq!(again.await.unwrap(), Ok(()));
    }
}

//! Cooperative cancellation.
//!
//! A single [`AbortSignal`] covers every suspension point of a request:
//! store calls, governor waits, retry sleeps, and the transport fetch. An
//! aborted wait surfaces as [`Error::Aborted`], never wrapped in another
//! error kind.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::Error;

/// Sending half of a cancellation pair.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Cancels every signal cloned from this pair.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving half of a cancellation pair; clone freely.
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Creates a connected handle/signal pair.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

impl AbortSignal {
    /// Whether the handle has fired.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the handle fires. If the handle is dropped without
    /// firing, this future never resolves.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleeps for `duration`, racing the signal.
pub(crate) async fn sleep_abortable(
    duration: Duration,
    signal: Option<&AbortSignal>,
) -> Result<(), Error> {
    match signal {
        Some(signal) => {
            if signal.is_aborted() {
                return Err(Error::Aborted);
            }
            tokio::select! {
                _ = signal.aborted() => Err(Error::Aborted),
                _ = tokio::time::sleep(duration) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn abort_interrupts_a_sleep() {
        let (handle, signal) = abort_pair();
        let sleeper = tokio::spawn(async move {
            sleep_abortable(Duration::from_secs(30), Some(&signal)).await
        });
        tokio::task::yield_now().await;
        handle.abort();
        assert!(matches!(sleeper.await.unwrap(), Err(Error::Aborted)));
    }

    #[tokio::test]
    async fn already_aborted_fails_immediately() {
        let (handle, signal) = abort_pair();
        handle.abort();
        assert!(matches!(
            sleep_abortable(Duration::from_secs(30), Some(&signal)).await,
            Err(Error::Aborted)
        ));
    }

    #[tokio::test]
    async fn unsignalled_sleep_completes() {
        assert!(sleep_abortable(Duration::from_millis(1), None).await.is_ok());
    }
}

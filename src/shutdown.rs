//! Cooperative shutdown. Workers check the flag between units of work and
//! never abort one halfway.

use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// A handle that never fires.
    pub fn never() -> Self {
        let (_, shutdown) = channel();
        shutdown
    }

    /// Fires on the first Ctrl-C (SIGINT).
    pub fn on_ctrl_c() -> Self {
        let (trigger, shutdown) = channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, finishing the current unit of work");
                trigger.trigger();
            }
        });
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Pends forever if the trigger was
    /// dropped without firing.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleeps for `duration` unless shutdown comes first. Returns `false` on shutdown.
    pub async fn sleep(&mut self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_triggered(),
            _ = self.wait() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_wakes_waiters() {
        let (trigger, mut shutdown) = channel();
        assert!(!shutdown.is_triggered());

        let waiter = tokio::spawn(async move {
            shutdown.wait().await;
            shutdown.is_triggered()
        });
        trigger.trigger();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn sleep_is_cut_short() {
        let (trigger, mut shutdown) = channel();
        trigger.trigger();
        let completed = shutdown.sleep(Duration::from_secs(3600)).await;
        assert!(!completed);
    }

    #[tokio::test]
    async fn never_does_not_fire() {
        let mut shutdown = Shutdown::never();
        assert!(shutdown.sleep(Duration::from_millis(5)).await);
    }
}

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

/// Graceful shutdown coordinator
///
/// Hands out [`ShutdownSignal`]s to long-running tasks (scheduler timers,
/// worker loops) and flips them all at once.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Tell every signal holder to stop
    pub fn trigger(&self) {
        if !*self.sender.borrow() {
            info!("Shutdown requested");
        }
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait for Ctrl-C, then trigger shutdown
    pub async fn wait_for_ctrl_c(&self) -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on Ctrl-C");
        tokio::signal::ctrl_c().await?;
        self.trigger();
        Ok(())
    }
}

/// Cloneable view of the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once shutdown has been triggered
    pub async fn wait(&mut self) {
        // A closed channel means the coordinator is gone, which is a shutdown too
        let _ = self.receiver.wait_for(|triggered| *triggered).await;
    }
}

/// Run a shutdown step, giving up after `limit`
pub async fn with_grace_period<F, T>(step: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    match timeout(limit, future).await {
        Ok(value) => {
            info!(step = %step, "Shutdown step finished");
            Ok(value)
        }
        Err(_) => {
            warn!(step = %step, limit_ms = limit.as_millis() as u64, "Shutdown step timed out");
            Err(anyhow::anyhow!("Timeout waiting for {step}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_observes_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.signal();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move {
            signal.wait().await;
            signal.is_triggered()
        });
        coordinator.trigger();
        assert!(waiter.await.unwrap());
        assert!(coordinator.is_triggered());
    }

    #[tokio::test]
    async fn test_grace_period_times_out() {
        let result = with_grace_period(
            "slow step",
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert!(result.is_err());

        let value = with_grace_period("fast step", Duration::from_secs(1), async { 7 })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}

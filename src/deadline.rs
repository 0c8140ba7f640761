use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed per-operation deadline applied to every collaborator call.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    limit: Duration,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Deadline { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Runs `fut` until it finishes, the deadline expires, or `cancel` fires.
    /// Expiry and cancellation come back as ordinary errors.
    pub async fn run<T, F>(&self, op: &'static str, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled { op }),
            result = self.run_uncancellable(op, fut) => result,
        }
    }

    /// Like [`run`](Self::run), but only bounded by the deadline.
    pub async fn run_uncancellable<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                op,
                after: self.limit,
            }),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::new(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_result() {
        let deadline = Deadline::default();
        let cancel = CancellationToken::new();
        let value = deadline.run("op", &cancel, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let deadline = Deadline::new(Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let result: Result<()> = deadline
            .run("slow", &cancel, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout { op: "slow", .. })));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_call() {
        let deadline = Deadline::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = deadline
            .run("pending", &cancel, futures::future::pending())
            .await;
        assert!(matches!(result, Err(Error::Cancelled { op: "pending" })));
    }
}

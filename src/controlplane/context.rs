//! Request Context
//!
//! Cancellation and deadline carried by every controller request. Backend
//! calls are raced against both so an aborted request returns promptly.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellable context for one controller request
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RequestContext {
    /// Context with no deadline
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Context cancelled together with `parent`
    pub fn child_of(parent: &CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel: parent.child_token(),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one backend call under this context
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: operation.to_string(),
            });
        }

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled {
                operation: operation.to_string(),
            }),
            _ = deadline => Err(Error::DeadlineExceeded {
                operation: operation.to_string(),
            }),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = RequestContext::background();
        let out = ctx.run("noop", async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let ctx = RequestContext::background();
        ctx.cancel();
        let result = ctx.run("CreateDisk", async { 1 }).await;
        assert_matches!(result, Err(Error::Cancelled { operation }) if operation == "CreateDisk");
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_call() {
        let ctx = RequestContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = ctx.run("AttachDisk", std::future::pending::<()>()).await;
        assert_matches!(result, Err(Error::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        let result = ctx
            .run("ListDisks", tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert_matches!(result, Err(Error::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = CancellationToken::new();
        let ctx = RequestContext::child_of(&parent, None);
        assert!(!ctx.is_cancelled());
        parent.cancel();
        assert!(ctx.is_cancelled());
    }
}

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::types::SegmentError;

/// Cancellation and deadline signal threaded through every engine call of one operation.
///
/// Transactional operations race their work against this signal *inside* the transaction
/// closure, so an interruption surfaces as an `Err` and the transaction is rolled back before
/// the error reaches the caller.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Fails fast when the signal already fired, without touching storage.
    pub fn check(&self) -> Result<(), SegmentError> {
        if self.cancel.is_cancelled() {
            return Err(SegmentError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(SegmentError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Runs `work` until it completes or the signal fires, whichever comes first.
    pub async fn guard<T, F>(&self, work: F) -> Result<T, SegmentError>
    where
        F: Future<Output = Result<T, SegmentError>>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SegmentError::Cancelled),
            _ = deadline => Err(SegmentError::DeadlineExceeded),
            result = work => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_passes_through_completed_work() {
        let ctx = OpContext::default();
        let value = ctx
            .guard(async { Ok::<_, SegmentError>(42) })
            .await
            .expect("work should complete");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_pending_work() {
        let token = CancellationToken::new();
        let ctx = OpContext::new(token.clone());
        token.cancel();

        assert!(matches!(ctx.check(), Err(SegmentError::Cancelled)));
        let result = ctx
            .guard(std::future::pending::<Result<(), SegmentError>>())
            .await;
        assert!(matches!(result, Err(SegmentError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_pending_work() {
        let ctx = OpContext::default().with_timeout(Duration::from_millis(250));
        assert!(ctx.check().is_ok());

        let result = ctx
            .guard(std::future::pending::<Result<(), SegmentError>>())
            .await;
        assert!(matches!(result, Err(SegmentError::DeadlineExceeded)));
        assert!(matches!(ctx.check(), Err(SegmentError::DeadlineExceeded)));
    }
}

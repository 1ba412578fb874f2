use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::db::models::Segment;
use crate::db::ConnectionProvider;

use super::context::OpContext;
use super::types::{DiffOutcome, ErrorClass, MembershipDiff, SegmentError};
use super::{catalog, reader, updater};

/// Entry point for the four segment operations.
///
/// Holds no mutable state: each call checks out its own connection from the injected
/// provider, so one service value can be shared freely across tasks.
pub struct SegmentService<P> {
    provider: P,
    shutdown: CancellationToken,
    op_timeout: Option<Duration>,
}

impl<P> SegmentService<P>
where
    P: ConnectionProvider,
{
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            shutdown: CancellationToken::new(),
            op_timeout: None,
        }
    }

    /// Operations started or running after `token` fires fail with `Cancelled`.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.op_timeout = timeout;
        self
    }

    fn context(&self) -> OpContext {
        let ctx = OpContext::new(self.shutdown.child_token());
        match self.op_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    async fn connection(&self, ctx: &OpContext) -> Result<P::Handle, SegmentError> {
        ctx.check()?;
        ctx.guard(self.provider.connection()).await
    }

    pub async fn create_segment(&self, name: &str) -> Result<Segment, SegmentError> {
        let ctx = self.context();
        let result = async {
            let mut conn = self.connection(&ctx).await?;
            catalog::create_segment(&mut *conn, &ctx, name).await
        }
        .await;
        result.inspect_err(|err| log_failure("create_segment", err))
    }

    pub async fn delete_segment(&self, name: &str) -> Result<usize, SegmentError> {
        let ctx = self.context();
        let result = async {
            let mut conn = self.connection(&ctx).await?;
            catalog::delete_segment(&mut *conn, &ctx, name).await
        }
        .await;
        result.inspect_err(|err| log_failure("delete_segment", err))
    }

    pub async fn apply_diff(&self, diff: &MembershipDiff) -> Result<DiffOutcome, SegmentError> {
        let ctx = self.context();
        let result = async {
            let mut conn = self.connection(&ctx).await?;
            updater::apply_diff(&mut *conn, &ctx, diff).await
        }
        .await;
        result.inspect_err(|err| log_failure("apply_diff", err))
    }

    pub async fn list_segments(&self, user_id: &str) -> Result<Vec<Segment>, SegmentError> {
        let ctx = self.context();
        let result = async {
            let mut conn = self.connection(&ctx).await?;
            reader::list_segments(&mut *conn, &ctx, user_id).await
        }
        .await;
        result.inspect_err(|err| log_failure("list_segments", err))
    }
}

fn log_failure(operation: &'static str, err: &SegmentError) {
    match err.class() {
        ErrorClass::Validation => warn!(
            event = "segment_operation_rejected",
            operation,
            error_kind = err.kind(),
            error = %err,
            "segment operation rejected"
        ),
        ErrorClass::Infrastructure => error!(
            event = "segment_operation_failed",
            operation,
            error_kind = err.kind(),
            transient = err.is_transient(),
            error = %err,
            error_debug = ?err,
            "segment operation failed"
        ),
    }
}

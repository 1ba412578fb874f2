use std::collections::BTreeSet;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::PoolError;
use serde::Serialize;
use thiserror::Error;

/// Error type shared by every segment operation.
///
/// Variants split into two classes (see [`ErrorClass`]): validation failures that are always
/// reported verbatim, and infrastructure failures the caller may decide to retry.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment already exists: {0}")]
    AlreadyExists(String),

    #[error("segment not found: {0}")]
    NotFound(String),

    #[error("segments not found or not held: {}", .0.join(", "))]
    SegmentNotFound(Vec<String>),

    #[error("user {user_id} already holds segment {segment}")]
    AlreadyMember { user_id: String, segment: String },

    #[error("segments requested for both add and remove: {}", .0.join(", "))]
    ConflictingDiff(Vec<String>),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("segment lookup failed: {0}")]
    LookupFailed(#[source] DieselError),

    #[error("query failed: {0}")]
    QueryFailed(#[source] DieselError),

    #[error("failed to decode segment row: {0}")]
    ScanFailed(#[source] DieselError),

    #[error("transaction failed: {0}")]
    TransactionFailed(#[source] DieselError),

    #[error("failed to acquire database connection: {0}")]
    Connection(#[from] PoolError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

/// Begin/commit/rollback failures reach us through diesel's transaction combinator, which
/// converts them with `From`. Statement failures are mapped explicitly at each call site.
impl From<DieselError> for SegmentError {
    fn from(err: DieselError) -> Self {
        SegmentError::TransactionFailed(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Infrastructure,
}

impl SegmentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SegmentError::AlreadyExists(_)
            | SegmentError::NotFound(_)
            | SegmentError::SegmentNotFound(_)
            | SegmentError::AlreadyMember { .. }
            | SegmentError::ConflictingDiff(_)
            | SegmentError::InvalidInput(_) => ErrorClass::Validation,
            SegmentError::LookupFailed(_)
            | SegmentError::QueryFailed(_)
            | SegmentError::ScanFailed(_)
            | SegmentError::TransactionFailed(_)
            | SegmentError::Connection(_)
            | SegmentError::Cancelled
            | SegmentError::DeadlineExceeded => ErrorClass::Infrastructure,
        }
    }

    /// True when repeating the same call may succeed without any caller-side change.
    pub fn is_transient(&self) -> bool {
        match self {
            SegmentError::LookupFailed(err)
            | SegmentError::QueryFailed(err)
            | SegmentError::TransactionFailed(err) => is_transient_diesel_error(err),
            SegmentError::Connection(_) | SegmentError::DeadlineExceeded => true,
            _ => false,
        }
    }

    /// Short stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SegmentError::AlreadyExists(_) => "already_exists",
            SegmentError::NotFound(_) => "not_found",
            SegmentError::SegmentNotFound(_) => "segment_not_found",
            SegmentError::AlreadyMember { .. } => "already_member",
            SegmentError::ConflictingDiff(_) => "conflicting_diff",
            SegmentError::InvalidInput(_) => "invalid_input",
            SegmentError::LookupFailed(_) => "lookup_failed",
            SegmentError::QueryFailed(_) => "query_failed",
            SegmentError::ScanFailed(_) => "scan_failed",
            SegmentError::TransactionFailed(_) => "transaction_failed",
            SegmentError::Connection(_) => "connection",
            SegmentError::Cancelled => "cancelled",
            SegmentError::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

fn is_transient_diesel_error(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(
            DatabaseErrorKind::SerializationFailure
                | DatabaseErrorKind::ClosedConnection
                | DatabaseErrorKind::UnableToSendCommand,
            _
        ) | DieselError::RollbackTransaction
    )
}

pub(crate) fn is_unique_violation(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

/// Requested membership changes for one user.
///
/// Names are kept in sets, so repeating a name within one list has no extra effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub user_id: String,
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl MembershipDiff {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn from_parts<A, R>(user_id: impl Into<String>, to_add: A, to_remove: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            to_add: to_add.into_iter().map(Into::into).collect(),
            to_remove: to_remove.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add(mut self, name: impl Into<String>) -> Self {
        self.to_add.insert(name.into());
        self
    }

    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.to_remove.insert(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Checks the diff shape before any storage access.
    pub fn validate(&self) -> Result<(), SegmentError> {
        validate_user_id(&self.user_id)?;
        for name in self.to_add.iter().chain(self.to_remove.iter()) {
            validate_segment_name(name)?;
        }

        let overlap: Vec<String> = self
            .to_add
            .intersection(&self.to_remove)
            .cloned()
            .collect();
        if !overlap.is_empty() {
            return Err(SegmentError::ConflictingDiff(overlap));
        }

        Ok(())
    }
}

/// Row counts applied by one successful diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffOutcome {
    pub added: usize,
    pub removed: usize,
}

pub(crate) fn validate_segment_name(name: &str) -> Result<(), SegmentError> {
    if name.trim().is_empty() {
        return Err(SegmentError::InvalidInput(
            "segment name must not be blank".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_user_id(user_id: &str) -> Result<(), SegmentError> {
    if user_id.trim().is_empty() {
        return Err(SegmentError::InvalidInput(
            "user id must not be blank".to_string(),
        ));
    }
    Ok(())
}

use std::collections::HashSet;

use diesel::result::Error as DieselError;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use tracing::{debug, info};

use crate::db::models::Segment;

use super::context::OpContext;
use super::store::SegmentConnection;
use super::types::{is_unique_violation, DiffOutcome, MembershipDiff, SegmentError};

/// Applies `diff` for one user as a single all-or-nothing transaction.
///
/// Validation runs first (every add name must exist, every remove name must be held by the
/// user) and nothing is written unless all of it passes. Adding a segment the user already
/// holds trips the `(user_id, segment_id)` key and aborts the whole diff.
///
/// An empty diff succeeds without opening a transaction.
pub async fn apply_diff<C>(
    conn: &mut C,
    ctx: &OpContext,
    diff: &MembershipDiff,
) -> Result<DiffOutcome, SegmentError>
where
    C: SegmentConnection,
{
    diff.validate()?;
    if diff.is_empty() {
        debug!(event = "membership_diff_empty", user_id = %diff.user_id, "nothing to apply");
        return Ok(DiffOutcome::default());
    }
    ctx.check()?;

    let to_add: Vec<String> = diff.to_add.iter().cloned().collect();
    let to_remove: Vec<String> = diff.to_remove.iter().cloned().collect();
    let user_id = diff.user_id.as_str();
    let (to_add, to_remove) = (to_add.as_slice(), to_remove.as_slice());

    let outcome = conn
        .transaction::<_, SegmentError, _>(|conn| {
            async move {
                ctx.guard(apply_in_transaction(conn, user_id, to_add, to_remove))
                    .await
            }
            .scope_boxed()
        })
        .await?;

    info!(
        event = "membership_diff_applied",
        user_id = %user_id,
        added = outcome.added,
        removed = outcome.removed,
        "applied membership diff"
    );
    Ok(outcome)
}

async fn apply_in_transaction<C>(
    conn: &mut C,
    user_id: &str,
    to_add: &[String],
    to_remove: &[String],
) -> Result<DiffOutcome, SegmentError>
where
    C: SegmentConnection,
{
    let additions = if to_add.is_empty() {
        Vec::new()
    } else {
        let found = conn
            .resolve_segments(to_add)
            .await
            .map_err(SegmentError::QueryFailed)?;
        ensure_all_resolved(to_add, &found)?;
        found
    };

    let removals = if to_remove.is_empty() {
        Vec::new()
    } else {
        let held = conn
            .held_segments(user_id, to_remove)
            .await
            .map_err(SegmentError::QueryFailed)?;
        ensure_all_resolved(to_remove, &held)?;
        held
    };

    let mut added = 0;
    for segment in &additions {
        added += conn
            .insert_membership(user_id, segment.id)
            .await
            .map_err(|err| map_membership_insert_error(user_id, segment, err))?;
    }

    let removed = if removals.is_empty() {
        0
    } else {
        let segment_ids: Vec<i64> = removals.iter().map(|segment| segment.id).collect();
        conn.delete_memberships(user_id, &segment_ids)
            .await
            .map_err(SegmentError::QueryFailed)?
    };

    Ok(DiffOutcome { added, removed })
}

/// Fails with the requested names that have no matching row in `found`.
fn ensure_all_resolved(requested: &[String], found: &[Segment]) -> Result<(), SegmentError> {
    if found.len() >= requested.len() {
        return Ok(());
    }

    let found_names: HashSet<&str> = found.iter().map(|segment| segment.name.as_str()).collect();
    let missing: Vec<String> = requested
        .iter()
        .filter(|name| !found_names.contains(name.as_str()))
        .cloned()
        .collect();
    Err(SegmentError::SegmentNotFound(missing))
}

fn map_membership_insert_error(user_id: &str, segment: &Segment, err: DieselError) -> SegmentError {
    if is_unique_violation(&err) {
        SegmentError::AlreadyMember {
            user_id: user_id.to_string(),
            segment: segment.name.clone(),
        }
    } else {
        SegmentError::QueryFailed(err)
    }
}

use diesel::result::Error as DieselError;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use tracing::info;

use crate::db::models::Segment;

use super::context::OpContext;
use super::store::SegmentConnection;
use super::types::{is_unique_violation, validate_segment_name, SegmentError};

/// Creates a segment named `name` and returns it with its storage-assigned id.
///
/// The existence check and the insert share one transaction. A unique violation on insert
/// (a concurrent creator won the race) is reported the same way as a positive lookup.
pub async fn create_segment<C>(
    conn: &mut C,
    ctx: &OpContext,
    name: &str,
) -> Result<Segment, SegmentError>
where
    C: SegmentConnection,
{
    validate_segment_name(name)?;
    ctx.check()?;

    let segment = conn
        .transaction::<_, SegmentError, _>(|conn| {
            async move {
                ctx.guard(async {
                    match conn.find_segment_id(name).await {
                        Ok(_) => return Err(SegmentError::AlreadyExists(name.to_string())),
                        Err(DieselError::NotFound) => {}
                        Err(err) => return Err(SegmentError::LookupFailed(err)),
                    }

                    conn.insert_segment(name).await.map_err(|err| {
                        if is_unique_violation(&err) {
                            SegmentError::AlreadyExists(name.to_string())
                        } else {
                            SegmentError::QueryFailed(err)
                        }
                    })?;

                    let id = conn
                        .find_segment_id(name)
                        .await
                        .map_err(SegmentError::QueryFailed)?;

                    Ok(Segment {
                        id,
                        name: name.to_string(),
                    })
                })
                .await
            }
            .scope_boxed()
        })
        .await?;

    info!(
        event = "segment_created",
        segment_id = segment.id,
        segment = %segment.name,
        "created segment"
    );
    Ok(segment)
}

/// Deletes the segment named `name` together with every membership that references it.
///
/// Returns the number of membership rows removed by the cascade.
pub async fn delete_segment<C>(
    conn: &mut C,
    ctx: &OpContext,
    name: &str,
) -> Result<usize, SegmentError>
where
    C: SegmentConnection,
{
    validate_segment_name(name)?;
    ctx.check()?;

    let (segment_id, memberships_removed) = conn
        .transaction::<_, SegmentError, _>(|conn| {
            async move {
                ctx.guard(async {
                    let segment_id = match conn.find_segment_id(name).await {
                        Ok(id) => id,
                        Err(DieselError::NotFound) => {
                            return Err(SegmentError::NotFound(name.to_string()))
                        }
                        Err(err) => return Err(SegmentError::LookupFailed(err)),
                    };

                    // No ON DELETE CASCADE on the FK.
                    let removed = conn
                        .delete_segment_memberships(segment_id)
                        .await
                        .map_err(SegmentError::QueryFailed)?;
                    conn.delete_segment_row(segment_id)
                        .await
                        .map_err(SegmentError::QueryFailed)?;

                    Ok((segment_id, removed))
                })
                .await
            }
            .scope_boxed()
        })
        .await?;

    info!(
        event = "segment_deleted",
        segment_id,
        segment = %name,
        memberships_removed,
        "deleted segment"
    );
    Ok(memberships_removed)
}

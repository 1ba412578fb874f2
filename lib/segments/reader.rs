use diesel::result::Error as DieselError;
use tracing::debug;

use crate::db::models::Segment;

use super::context::OpContext;
use super::store::SegmentConnection;
use super::types::{validate_user_id, SegmentError};

/// Lists the segments `user_id` currently holds, ordered by segment id.
///
/// Single statement, no transaction. A user without memberships gets an empty vector.
pub async fn list_segments<C>(
    conn: &mut C,
    ctx: &OpContext,
    user_id: &str,
) -> Result<Vec<Segment>, SegmentError>
where
    C: SegmentConnection,
{
    validate_user_id(user_id)?;

    let segments = ctx
        .guard(async {
            conn.load_user_segments(user_id)
                .await
                .map_err(map_read_error)
        })
        .await?;

    debug!(
        event = "user_segments_listed",
        user_id = %user_id,
        count = segments.len(),
        "listed user segments"
    );
    Ok(segments)
}

fn map_read_error(err: DieselError) -> SegmentError {
    match err {
        DieselError::DeserializationError(_) => SegmentError::ScanFailed(err),
        other => SegmentError::QueryFailed(other),
    }
}

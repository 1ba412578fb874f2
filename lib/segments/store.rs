use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;

use crate::db::models::{NewMembership, NewSegment, Segment};
use crate::db::schema::{segments, user_segment};

/// Statement primitives the catalog, updater and reader are built from.
///
/// Every method is a single parameterized statement; transaction boundaries belong to the
/// callers. Lookups that can legitimately find nothing return `diesel::result::Error::NotFound`
/// so callers can branch "no rows" apart from real engine failures.
///
/// Implemented for the production Postgres connection and for the SQLite wrapper used by the
/// DB-backed tests. Name sets are bound as one parameter list (`= ANY($1)` on Postgres).
pub trait SegmentConnection: AsyncConnection + Send {
    fn find_segment_id<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, QueryResult<i64>>;

    fn insert_segment<'a>(&'a mut self, name: &'a str) -> BoxFuture<'a, QueryResult<usize>>;

    fn delete_segment_row(&mut self, segment_id: i64) -> BoxFuture<'_, QueryResult<usize>>;

    fn delete_segment_memberships(
        &mut self,
        segment_id: i64,
    ) -> BoxFuture<'_, QueryResult<usize>>;

    /// Segments whose name is in `names`; unknown names are simply absent from the result.
    fn resolve_segments<'a>(
        &'a mut self,
        names: &'a [String],
    ) -> BoxFuture<'a, QueryResult<Vec<Segment>>>;

    /// Segments whose name is in `names` *and* that `user_id` currently holds.
    fn held_segments<'a>(
        &'a mut self,
        user_id: &'a str,
        names: &'a [String],
    ) -> BoxFuture<'a, QueryResult<Vec<Segment>>>;

    fn insert_membership<'a>(
        &'a mut self,
        user_id: &'a str,
        segment_id: i64,
    ) -> BoxFuture<'a, QueryResult<usize>>;

    fn delete_memberships<'a>(
        &'a mut self,
        user_id: &'a str,
        segment_ids: &'a [i64],
    ) -> BoxFuture<'a, QueryResult<usize>>;

    fn load_user_segments<'a>(
        &'a mut self,
        user_id: &'a str,
    ) -> BoxFuture<'a, QueryResult<Vec<Segment>>>;
}

macro_rules! impl_segment_connection {
    ($conn:ty) => {
        impl SegmentConnection for $conn {
            fn find_segment_id<'a>(
                &'a mut self,
                name: &'a str,
            ) -> BoxFuture<'a, QueryResult<i64>> {
                Box::pin(async move {
                    segments::table
                        .filter(segments::seg_name.eq(name))
                        .select(segments::seg_id)
                        .first::<i64>(self)
                        .await
                })
            }

            fn insert_segment<'a>(
                &'a mut self,
                name: &'a str,
            ) -> BoxFuture<'a, QueryResult<usize>> {
                Box::pin(async move {
                    diesel::insert_into(segments::table)
                        .values(NewSegment { seg_name: name })
                        .execute(self)
                        .await
                })
            }

            fn delete_segment_row(&mut self, segment_id: i64) -> BoxFuture<'_, QueryResult<usize>> {
                Box::pin(async move {
                    diesel::delete(segments::table.filter(segments::seg_id.eq(segment_id)))
                        .execute(self)
                        .await
                })
            }

            fn delete_segment_memberships(
                &mut self,
                segment_id: i64,
            ) -> BoxFuture<'_, QueryResult<usize>> {
                Box::pin(async move {
                    diesel::delete(
                        user_segment::table.filter(user_segment::segment_id.eq(segment_id)),
                    )
                    .execute(self)
                    .await
                })
            }

            fn resolve_segments<'a>(
                &'a mut self,
                names: &'a [String],
            ) -> BoxFuture<'a, QueryResult<Vec<Segment>>> {
                Box::pin(async move {
                    segments::table
                        .filter(segments::seg_name.eq_any(names))
                        .select(Segment::as_select())
                        .load::<Segment>(self)
                        .await
                })
            }

            fn held_segments<'a>(
                &'a mut self,
                user_id: &'a str,
                names: &'a [String],
            ) -> BoxFuture<'a, QueryResult<Vec<Segment>>> {
                Box::pin(async move {
                    segments::table
                        .inner_join(user_segment::table)
                        .filter(user_segment::user_id.eq(user_id))
                        .filter(segments::seg_name.eq_any(names))
                        .select(Segment::as_select())
                        .load::<Segment>(self)
                        .await
                })
            }

            fn insert_membership<'a>(
                &'a mut self,
                user_id: &'a str,
                segment_id: i64,
            ) -> BoxFuture<'a, QueryResult<usize>> {
                Box::pin(async move {
                    diesel::insert_into(user_segment::table)
                        .values(NewMembership {
                            user_id,
                            segment_id,
                        })
                        .execute(self)
                        .await
                })
            }

            fn delete_memberships<'a>(
                &'a mut self,
                user_id: &'a str,
                segment_ids: &'a [i64],
            ) -> BoxFuture<'a, QueryResult<usize>> {
                Box::pin(async move {
                    diesel::delete(
                        user_segment::table
                            .filter(user_segment::user_id.eq(user_id))
                            .filter(user_segment::segment_id.eq_any(segment_ids)),
                    )
                    .execute(self)
                    .await
                })
            }

            fn load_user_segments<'a>(
                &'a mut self,
                user_id: &'a str,
            ) -> BoxFuture<'a, QueryResult<Vec<Segment>>> {
                Box::pin(async move {
                    segments::table
                        .inner_join(user_segment::table)
                        .filter(user_segment::user_id.eq(user_id))
                        .select(Segment::as_select())
                        .order(segments::seg_id.asc())
                        .load::<Segment>(self)
                        .await
                })
            }
        }
    };
}

impl_segment_connection!(AsyncPgConnection);
impl_segment_connection!(SyncConnectionWrapper<SqliteConnection>);

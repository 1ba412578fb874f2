use diesel::prelude::*;
use serde::Serialize;

use super::schema::{segments, user_segment};

/// A named segment as stored in `segments`.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize)]
#[diesel(table_name = segments)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct Segment {
    #[diesel(column_name = seg_id)]
    pub id: i64,
    #[diesel(column_name = seg_name)]
    pub name: String,
}

#[derive(Insertable)]
#[diesel(table_name = segments)]
pub struct NewSegment<'a> {
    pub seg_name: &'a str,
}

/// One `(user, segment)` ledger row.
#[derive(Debug, Insertable)]
#[diesel(table_name = user_segment)]
pub struct NewMembership<'a> {
    pub user_id: &'a str,
    pub segment_id: i64,
}

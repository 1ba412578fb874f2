//! Segment catalog and user membership ledger.
//!
//! - `catalog` creates and deletes named segments.
//! - `updater` applies one user's add/remove diff as a single all-or-nothing transaction.
//! - `reader` lists a user's current segments.
//!
//! Every operation is a free function over `&mut C where C: SegmentConnection`, so it runs the
//! same against the production Postgres pool and the in-memory SQLite test harness.
//! [`SegmentService`] binds them to an injected [`crate::db::ConnectionProvider`] and to a
//! shutdown token.
//!
//! Concurrency correctness rests entirely on the engine's transaction isolation (read committed
//! or stronger). There are no in-process locks; concurrent diffs for the *same* user are only as
//! linearizable as the configured isolation level makes them.

mod catalog;
mod context;
mod reader;
mod service;
mod store;
mod types;
mod updater;

pub use catalog::{create_segment, delete_segment};
pub use context::OpContext;
pub use reader::list_segments;
pub use service::SegmentService;
pub use store::SegmentConnection;
pub use types::{DiffOutcome, ErrorClass, MembershipDiff, SegmentError};
pub use updater::apply_diff;

pub use crate::db::models::Segment;

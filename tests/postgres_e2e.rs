#![cfg(feature = "pg-tests")]

use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::BigInt;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::AsyncPgConnection;
use segment_service_lib::db::{build_db_pool, migrations::run_postgres_migrations};
use segment_service_lib::segments::{MembershipDiff, Segment, SegmentError, SegmentService};
use serde_json::Value;
use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

/// Throwaway single-user cluster on a free local port; the data dir is removed on drop.
struct TempPostgres {
    data_dir: PathBuf,
    port: u16,
}

impl TempPostgres {
    fn start() -> Self {
        let data_dir =
            std::env::temp_dir().join(format!("segment_service_pg_{}", unique_suffix()));
        let port = free_tcp_port();

        pg_tool("initdb", |cmd| {
            cmd.arg("-D")
                .arg(&data_dir)
                .args(["-A", "trust", "-U", "postgres", "--no-instructions"])
        });
        // With `-l` the server's output goes to a file, so pg_ctl's pipes close once it returns.
        pg_tool("pg_ctl", |cmd| {
            cmd.arg("-D")
                .arg(&data_dir)
                .arg("-l")
                .arg(data_dir.join("server.log"))
                .arg("-o")
                .arg(format!(
                    "-F -p {port} -h 127.0.0.1 -k {}",
                    data_dir.display()
                ))
                .args(["-w", "start"])
        });

        Self { data_dir, port }
    }

    fn database_url(&self) -> String {
        format!("postgresql://postgres@127.0.0.1:{}/postgres", self.port)
    }
}

impl Drop for TempPostgres {
    fn drop(&mut self) {
        let _ = Command::new("pg_ctl")
            .arg("-D")
            .arg(&self.data_dir)
            .args(["-m", "immediate", "-w", "stop"])
            .output();
        let _ = fs::remove_dir_all(&self.data_dir);
    }
}

async fn migrated_service(pg: &TempPostgres) -> SegmentService<Pool<AsyncPgConnection>> {
    let database_url = pg.database_url();
    let applied = run_postgres_migrations(&database_url).expect("failed to run postgres migrations");
    assert_eq!(applied, 1);

    let pool = build_db_pool(&database_url, 8)
        .await
        .expect("failed to build db pool");
    SegmentService::new(pool)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn segment_lifecycle_against_postgres() {
    let pg = TempPostgres::start();
    let service = migrated_service(&pg).await;

    let voice = service
        .create_segment("AVITO_VOICE_MESSAGES")
        .await
        .expect("create voice");
    let vas = service
        .create_segment("AVITO_PERFORMANCE_VAS")
        .await
        .expect("create vas");
    assert!(voice.id < vas.id);

    let duplicate = service.create_segment("AVITO_VOICE_MESSAGES").await;
    assert!(matches!(duplicate, Err(SegmentError::AlreadyExists(ref name)) if name == "AVITO_VOICE_MESSAGES"));

    let outcome = service
        .apply_diff(
            &MembershipDiff::new("1000")
                .add("AVITO_PERFORMANCE_VAS")
                .add("AVITO_VOICE_MESSAGES"),
        )
        .await
        .expect("apply adds");
    assert_eq!((outcome.added, outcome.removed), (2, 0));
    assert_eq!(
        service.list_segments("1000").await.expect("list"),
        vec![voice.clone(), vas.clone()]
    );

    let err = service
        .apply_diff(
            &MembershipDiff::new("1000")
                .add("AVITO_DISCOUNT_30")
                .remove("AVITO_VOICE_MESSAGES"),
        )
        .await
        .expect_err("unknown add should abort the diff");
    assert!(matches!(err, SegmentError::SegmentNotFound(ref missing) if missing == &["AVITO_DISCOUNT_30".to_string()]));
    assert_eq!(service.list_segments("1000").await.expect("list").len(), 2);

    let err = service
        .apply_diff(&MembershipDiff::new("1000").add("AVITO_VOICE_MESSAGES"))
        .await
        .expect_err("duplicate add should abort the diff");
    assert!(matches!(err, SegmentError::AlreadyMember { .. }));

    let removed = service
        .delete_segment("AVITO_VOICE_MESSAGES")
        .await
        .expect("delete voice");
    assert_eq!(removed, 1);
    assert_eq!(
        service.list_segments("1000").await.expect("list"),
        vec![vas]
    );

    let err = service
        .delete_segment("AVITO_VOICE_MESSAGES")
        .await
        .expect_err("second delete should fail");
    assert!(matches!(err, SegmentError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_diffs_for_different_users_do_not_interfere() {
    let pg = TempPostgres::start();
    let service = Arc::new(migrated_service(&pg).await);

    for name in ["A1", "A2", "B1", "B2", "SHARED"] {
        service.create_segment(name).await.expect("create segment");
    }

    let mut handles = Vec::new();
    for (user_id, names) in [("alice", ["A1", "A2"]), ("bob", ["B1", "B2"])] {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let diff = MembershipDiff::from_parts(
                user_id,
                names.iter().map(|name| name.to_string()).chain(["SHARED".to_string()]),
                Vec::<String>::new(),
            );
            service.apply_diff(&diff).await
        }));
    }
    for handle in handles {
        let outcome = handle.await.expect("task panicked").expect("apply diff");
        assert_eq!(outcome.added, 3);
    }

    let names = |segments: Vec<Segment>| {
        segments
            .into_iter()
            .map(|segment| segment.name)
            .collect::<Vec<_>>()
    };
    assert_eq!(
        names(service.list_segments("alice").await.expect("list alice")),
        vec!["A1", "A2", "SHARED"]
    );
    assert_eq!(
        names(service.list_segments("bob").await.expect("list bob")),
        vec!["B1", "B2", "SHARED"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_duplicate_adds_for_one_user_commit_exactly_once() {
    let pg = TempPostgres::start();
    let service = Arc::new(migrated_service(&pg).await);
    service.create_segment("RACE").await.expect("create segment");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .apply_diff(&MembershipDiff::new("1000").add("RACE"))
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(outcome) => {
                assert_eq!(outcome.added, 1);
                committed += 1;
            }
            Err(SegmentError::AlreadyMember { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(committed, 1);

    let mut conn = PgConnection::establish(&pg.database_url()).expect("connect");
    let rows: CountRow = sql_query("SELECT COUNT(*) AS count FROM user_segment")
        .get_result(&mut conn)
        .expect("count memberships");
    assert_eq!(rows.count, 1);
}

#[test]
fn cli_binary_runs_commands_and_reports_exit_codes() {
    let pg = TempPostgres::start();
    let database_url = pg.database_url();

    let created = run_cli(&database_url, &["create", "AVITO_VOICE_MESSAGES"]);
    assert_eq!(created.status.code(), Some(0), "{}", stderr(&created));
    let segment: Value = serde_json::from_slice(&created.stdout).expect("create output is json");
    assert_eq!(segment["name"], "AVITO_VOICE_MESSAGES");

    let applied = run_cli(
        &database_url,
        &["apply", "1000", "--add", "AVITO_VOICE_MESSAGES"],
    );
    assert_eq!(applied.status.code(), Some(0), "{}", stderr(&applied));

    let rejected = run_cli(&database_url, &["apply", "1000", "--add", "AVITO_DISCOUNT_30"]);
    assert_eq!(rejected.status.code(), Some(1));
    assert!(stderr(&rejected).contains("AVITO_DISCOUNT_30"));

    let listed = run_cli(&database_url, &["list", "1000"]);
    assert_eq!(listed.status.code(), Some(0), "{}", stderr(&listed));
    let segments: Value = serde_json::from_slice(&listed.stdout).expect("list output is json");
    assert_eq!(segments, Value::Array(vec![segment]));

    let misconfigured = Command::new(env!("CARGO_BIN_EXE_segment_service"))
        .env_remove("DATABASE_URL")
        .args(["list", "1000"])
        .output()
        .expect("failed to run segment_service binary");
    assert_eq!(misconfigured.status.code(), Some(2));
}

fn run_cli(database_url: &str, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_segment_service"))
        .env("DATABASE_URL", database_url)
        .env("LOG_FORMAT", "text")
        .args(args)
        .output()
        .expect("failed to run segment_service binary")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn pg_tool(name: &str, configure: impl FnOnce(&mut Command) -> &mut Command) {
    let output = configure(&mut Command::new(name))
        .output()
        .unwrap_or_else(|err| panic!("failed to run `{name}`; install PostgreSQL CLI tools: {err}"));
    assert!(
        output.status.success(),
        "`{name}` failed (status {}):\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn free_tcp_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind temporary local port");
    listener
        .local_addr()
        .expect("failed to read local bind address")
        .port()
}

fn unique_suffix() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time went backwards")
        .as_nanos();
    format!("{}_{}", std::process::id(), now)
}

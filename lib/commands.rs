use crate::{
    cli::{Cli, Command},
    config::{parse_pool_size, parse_timeout_ms, Config, ConfigError},
    db::{build_db_pool, migrations::run_postgres_migrations, ConnectionProvider},
    logging::{format_error_report, init_logging},
    segments::{MembershipDiff, SegmentError, SegmentService},
};
use dotenv::dotenv;
use serde_json::{json, Value};
use std::env;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;

/// Resolves runtime config, letting CLI flags override the environment.
pub fn resolve_config<F>(cli: &Cli, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = Config::from_lookup(|key| match (key, &cli.database_url) {
        ("DATABASE_URL", Some(url)) => Some(url.clone()),
        _ => lookup(key),
    })?;

    if let Some(size) = cli.db_pool_size {
        config.db_pool_size = parse_pool_size(&size.to_string())?;
    }
    if let Some(ms) = cli.timeout_ms {
        config.operation_timeout = Some(parse_timeout_ms(&ms.to_string())?);
    }

    Ok(config)
}

/// Runs one command against the service and renders its result as JSON.
pub async fn execute<P>(service: &SegmentService<P>, command: Command) -> Result<Value, SegmentError>
where
    P: ConnectionProvider,
{
    match command {
        Command::Create { name } => {
            let segment = service.create_segment(&name).await?;
            Ok(json!(segment))
        }
        Command::Delete { name } => {
            let memberships_removed = service.delete_segment(&name).await?;
            Ok(json!({
                "deleted": name,
                "memberships_removed": memberships_removed,
            }))
        }
        Command::Apply {
            user_id,
            add,
            remove,
        } => {
            let diff = MembershipDiff::from_parts(user_id, add, remove);
            let outcome = service.apply_diff(&diff).await?;
            Ok(json!({
                "user_id": diff.user_id,
                "added": outcome.added,
                "removed": outcome.removed,
            }))
        }
        Command::List { user_id } => {
            let segments = service.list_segments(&user_id).await?;
            Ok(json!(segments))
        }
    }
}

/// Process entry point shared by the binary; returns the exit code.
pub async fn run(cli: Cli) -> i32 {
    dotenv().ok();

    let mode = cli.command.mode();
    let logging_context = init_logging("segment_service", mode, &cli.log_level);
    let run_span = tracing::info_span!(
        "segment_command",
        service = %logging_context.service,
        environment = %logging_context.environment,
        mode = %logging_context.mode,
        run_id = %logging_context.run_id,
    );

    run_inner(cli).instrument(run_span).await
}

async fn run_inner(cli: Cli) -> i32 {
    let config = match resolve_config(&cli, |key| env::var(key).ok()) {
        Ok(config) => config,
        Err(err) => {
            error!(event = "config_invalid", error = %err, "invalid configuration");
            eprintln!("{err}");
            return EXIT_CONFIG;
        }
    };

    let db_url = config.db_url.clone();
    match tokio::task::spawn_blocking(move || run_postgres_migrations(&db_url)).await {
        Ok(Ok(applied)) => {
            info!(event = "migrations_complete", applied, "database schema is up to date");
        }
        Ok(Err(err)) => {
            let report = format_error_report(&*err);
            error!(
                event = "migrations_failed",
                error = %err,
                error_report = %report,
                "failed to run database migrations"
            );
            eprintln!("{report}");
            return EXIT_FAILURE;
        }
        Err(err) => {
            error!(event = "migrations_failed", error = %err, "migration task panicked");
            eprintln!("migration task failed: {err}");
            return EXIT_FAILURE;
        }
    }

    let pool = match build_db_pool(&config.db_url, config.db_pool_size).await {
        Ok(pool) => pool,
        Err(err) => {
            let report = format_error_report(&err);
            error!(
                event = "db_pool_init_failed",
                error = %err,
                error_report = %report,
                "failed to build db pool"
            );
            eprintln!("{report}");
            return EXIT_FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let signal_handle = spawn_shutdown_listener(shutdown.clone());
    let service = SegmentService::new(pool)
        .with_shutdown_token(shutdown)
        .with_operation_timeout(config.operation_timeout);

    let code = match execute(&service, cli.command).await {
        Ok(output) => {
            println!("{output:#}");
            EXIT_OK
        }
        Err(err) => {
            let report = format_error_report(&err);
            eprintln!("{report}");
            EXIT_FAILURE
        }
    };

    signal_handle.abort();
    code
}

/// Cancels `token` on SIGTERM or SIGINT.
fn spawn_shutdown_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(err), _) | (_, Err(err)) => {
                    warn!(event = "signal_handler_unavailable", error = %err, "running without signal handling");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down.");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down.");
            }
        }

        token.cancel();
    })
}

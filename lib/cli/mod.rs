use crate::build_info;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Manage user segments and segment membership",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[arg(long = "database-url", global = true)]
    /// Overrides DATABASE_URL
    pub database_url: Option<String>,

    #[arg(long = "db-pool-size", global = true)]
    /// Overrides DB_POOL_SIZE
    pub db_pool_size: Option<usize>,

    #[arg(long = "timeout-ms", global = true)]
    /// Per-operation deadline in milliseconds; overrides OPERATION_TIMEOUT_MS
    pub timeout_ms: Option<u64>,

    #[arg(long = "log-level", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a new segment
    Create { name: String },

    /// Delete a segment and every membership referencing it
    Delete { name: String },

    /// Add and remove segments for one user in a single transaction
    Apply {
        user_id: String,

        #[arg(long = "add", value_name = "SEGMENT")]
        add: Vec<String>,

        #[arg(long = "remove", value_name = "SEGMENT")]
        remove: Vec<String>,
    },

    /// List the segments a user belongs to
    List { user_id: String },
}

impl Command {
    /// Name used as the `mode` logging field.
    pub fn mode(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Delete { .. } => "delete",
            Command::Apply { .. } => "apply",
            Command::List { .. } => "list",
        }
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use crate::build_info;
    use clap::{error::ErrorKind, Parser};

    #[test]
    fn version_short_circuits_other_flags() {
        let err = Cli::try_parse_from([
            "segment_service",
            "--version",
            "--this-flag-does-not-exist",
        ])
        .expect_err("expected clap to stop parsing after --version");

        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(build_info::VERSION_WITH_COMMIT));
    }

    #[test]
    fn apply_collects_repeated_add_and_remove_flags() {
        let cli = Cli::try_parse_from([
            "segment_service",
            "apply",
            "1000",
            "--add",
            "AVITO_VOICE_MESSAGES",
            "--add",
            "AVITO_DISCOUNT_50",
            "--remove",
            "AVITO_DISCOUNT_30",
            "--timeout-ms",
            "2000",
        ])
        .expect("apply args should parse");

        assert_eq!(cli.timeout_ms, Some(2000));
        assert_eq!(
            cli.command,
            Command::Apply {
                user_id: "1000".to_string(),
                add: vec![
                    "AVITO_VOICE_MESSAGES".to_string(),
                    "AVITO_DISCOUNT_50".to_string()
                ],
                remove: vec!["AVITO_DISCOUNT_30".to_string()],
            }
        );
        assert_eq!(cli.command.mode(), "apply");
    }

    #[test]
    fn subcommand_is_required() {
        let err = Cli::try_parse_from(["segment_service", "--log-level", "debug"])
            .expect_err("missing subcommand");
        assert_eq!(err.kind(), ErrorKind::MissingSubcommand);
    }
}

use crate::build_info;
use crate::commands::{ProcessArgs, RunArgs, SessionArgs, StatusArgs};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Full-reindex enqueueing worker",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start (or restart from scratch) a full enumeration of one entity type
    Init(SessionArgs),
    /// Stop tracking one entity type, discarding its enumeration progress
    Terminate(SessionArgs),
    /// Pause batch processing for one entity type, keeping its cursor
    Suspend(SessionArgs),
    /// Re-enable batch processing for one entity type
    Resume(SessionArgs),
    /// Run one batch step and exit
    Process(ProcessArgs),
    /// List tracked sessions and backlog depth
    Status(StatusArgs),
    /// Serve metrics and run batch steps on a fixed interval
    Run(RunArgs),
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use crate::build_info;
    use clap::{error::ErrorKind, Parser};

    #[test]
    fn version_short_circuits_other_flags() {
        let err = Cli::try_parse_from(["reindex_worker", "--version", "--this-flag-does-not-exist"])
            .expect_err("expected clap to stop parsing after --version");

        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(
            err.to_string().contains(build_info::VERSION_WITH_COMMIT),
            "version output should include semver+commit hash"
        );
    }

    #[test]
    fn session_subcommands_take_a_positional_entity_type() {
        let cli = Cli::try_parse_from(["reindex_worker", "init", "products"])
            .expect("failed to parse init subcommand");
        match cli.command {
            super::Command::Init(args) => assert_eq!(args.entity_type, "products"),
            other => panic!("unexpected command parsed: {other:?}"),
        }
    }
}

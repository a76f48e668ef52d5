use reindex_worker_lib::cli::{parse_args, Command};
use reindex_worker_lib::commands::{self, SessionAction};

use diesel::{pg::PgConnection, Connection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenv::dotenv;
use std::error::Error;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

fn run_initial_migrations(
    connection: &mut impl MigrationHarness<diesel::pg::Pg>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    connection.run_pending_migrations(MIGRATIONS)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = parse_args();

    let exit_code = match cli.command {
        Command::Init(args) => commands::run_session_command(args, SessionAction::Init).await,
        Command::Terminate(args) => {
            commands::run_session_command(args, SessionAction::Terminate).await
        }
        Command::Suspend(args) => commands::run_session_command(args, SessionAction::Suspend).await,
        Command::Resume(args) => commands::run_session_command(args, SessionAction::Resume).await,
        Command::Process(args) => commands::run_process_once(args).await,
        Command::Status(args) => commands::run_status(args).await,
        Command::Run(args) => {
            let db_url = match commands::resolve_database_url(&args.common) {
                Ok(value) => value,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(2);
                }
            };
            let mut conn = match PgConnection::establish(&db_url) {
                Ok(conn) => conn,
                Err(err) => {
                    eprintln!("failed to connect for migrations: {err}");
                    std::process::exit(1);
                }
            };
            if let Err(err) = run_initial_migrations(&mut conn) {
                eprintln!("failed to run migrations: {err}");
                std::process::exit(1);
            }

            commands::run_worker(args).await
        }
    };

    std::process::exit(exit_code);
}

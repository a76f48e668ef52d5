use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::build_db_pool;
use crate::enqueue_service::{DieselBacklogSink, DieselSessionStore, EnqueueingSessionManager};
use crate::entity_registry::EntityRegistry;
use crate::logging::{format_error_report, init_logging};
use crate::server::setup_server_with_addr;
use crate::state::AppState;

const DEFAULT_ENTITY_REGISTRY_PATH: &str = "entities.json";
const DB_POOL_MAX_SIZE: usize = 4;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct CommonArgs {
    #[arg(long = "database-url")]
    pub database_url: Option<String>,
    #[arg(long = "entity-registry")]
    /// Path to the JSON registry of enumerable entity types.
    pub entity_registry: Option<String>,
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, clap::Args)]
pub struct SessionArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    /// Entity type to operate on.
    pub entity_type: String,
}

#[derive(Debug, Clone, clap::Args)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[arg(long = "entity-type")]
    /// Entity type to process; omitted picks any active session.
    pub entity_type: Option<String>,
    #[arg(long = "batch-size", default_value_t = 500)]
    pub batch_size: usize,
}

#[derive(Debug, Clone, clap::Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[arg(long = "interval-ms", default_value_t = 1000)]
    pub interval_ms: u64,
    #[arg(long = "batch-size", default_value_t = 500)]
    pub batch_size: usize,
    #[arg(long = "metrics-bind", default_value = "0.0.0.0:3000")]
    pub metrics_bind: String,
}

/// The four admin operations share one command surface; the variant picks
/// which manager call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Init,
    Terminate,
    Suspend,
    Resume,
}

impl SessionAction {
    fn mode(self) -> &'static str {
        match self {
            SessionAction::Init => "init",
            SessionAction::Terminate => "terminate",
            SessionAction::Suspend => "suspend",
            SessionAction::Resume => "resume",
        }
    }
}

pub fn resolve_database_url(common: &CommonArgs) -> Result<String, String> {
    if let Some(value) = &common.database_url {
        return Ok(value.clone());
    }

    std::env::var("DATABASE_URL")
        .map_err(|_| "DATABASE_URL is required (env var or --database-url)".to_string())
}

pub fn resolve_registry_path(common: &CommonArgs) -> String {
    if let Some(value) = &common.entity_registry {
        return value.clone();
    }
    std::env::var("ENTITY_REGISTRY_PATH")
        .unwrap_or_else(|_| DEFAULT_ENTITY_REGISTRY_PATH.to_string())
}

pub fn validate_process_args(args: &ProcessArgs) -> Result<(), String> {
    if args.batch_size == 0 {
        return Err("--batch-size must be > 0".to_string());
    }
    Ok(())
}

pub fn validate_run_args(args: &RunArgs) -> Result<(), String> {
    if args.interval_ms == 0 {
        return Err("--interval-ms must be > 0".to_string());
    }
    if args.batch_size == 0 {
        return Err("--batch-size must be > 0".to_string());
    }
    args.metrics_bind.parse::<SocketAddr>().map_err(|err| {
        format!(
            "invalid --metrics-bind address `{}`: {err}",
            args.metrics_bind
        )
    })?;

    Ok(())
}

struct Runtime {
    pool: diesel_async::pooled_connection::deadpool::Pool<diesel_async::pg::AsyncPgConnection>,
    store: Arc<DieselSessionStore>,
    manager: EnqueueingSessionManager<Arc<DieselSessionStore>, DieselBacklogSink>,
}

fn build_runtime(common: &CommonArgs) -> Result<Runtime, String> {
    let db_url = resolve_database_url(common)?;
    let registry_path = resolve_registry_path(common);
    let registry = EntityRegistry::from_file(Path::new(&registry_path))
        .map_err(|err| format!("failed to load entity registry `{registry_path}`: {err}"))?;

    let pool = build_db_pool(&db_url, DB_POOL_MAX_SIZE)
        .map_err(|err| format!("failed to build db pool: {err}"))?;

    let store = Arc::new(DieselSessionStore::new(pool.clone(), registry));
    let sink = DieselBacklogSink::new(pool.clone());
    let manager = EnqueueingSessionManager::new(Arc::clone(&store), sink);

    Ok(Runtime {
        pool,
        store,
        manager,
    })
}

/// Runs one admin operation against the session store and exits.
pub async fn run_session_command(args: SessionArgs, action: SessionAction) -> i32 {
    dotenv().ok();
    let _logging_context = init_logging("reindex_worker", action.mode(), &args.common.log_level);

    let runtime = match build_runtime(&args.common) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let result = match action {
        SessionAction::Init => runtime.manager.init(&args.entity_type).await,
        SessionAction::Terminate => runtime.manager.terminate(&args.entity_type).await,
        SessionAction::Suspend => runtime.manager.suspend(&args.entity_type).await,
        SessionAction::Resume => runtime.manager.resume(&args.entity_type).await,
    };

    if let Err(err) = result {
        let error_report = format_error_report(&err);
        error!(
            event = "session_command_failed",
            command = action.mode(),
            entity_type = %args.entity_type,
            error = %err,
            error_report = %error_report,
            "session command failed"
        );
        eprintln!("{} failed: {err}", action.mode());
        return 1;
    }

    info!(
        event = "session_command_complete",
        command = action.mode(),
        entity_type = %args.entity_type,
        "session command complete"
    );
    0
}

/// Runs one batch step and exits.
pub async fn run_process_once(args: ProcessArgs) -> i32 {
    dotenv().ok();
    let _logging_context = init_logging("reindex_worker", "process", &args.common.log_level);

    if let Err(err) = validate_process_args(&args) {
        eprintln!("{err}");
        return 2;
    }

    let runtime = match build_runtime(&args.common) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let result = match args.entity_type.as_deref() {
        Some(entity_type) => runtime.manager.process(entity_type, args.batch_size).await,
        None => runtime.manager.process_next_active(args.batch_size).await,
    };

    match result {
        Ok(processed) => {
            println!("processed {processed} identifier(s)");
            0
        }
        Err(err) => {
            let error_report = format_error_report(&err);
            error!(
                event = "process_command_failed",
                error = %err,
                error_report = %error_report,
                "batch step failed"
            );
            eprintln!("process failed: {err}");
            1
        }
    }
}

/// Prints tracked sessions and the current backlog depth.
pub async fn run_status(args: StatusArgs) -> i32 {
    dotenv().ok();
    let _logging_context = init_logging("reindex_worker", "status", &args.common.log_level);

    let runtime = match build_runtime(&args.common) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let sessions = match runtime.store.list_sessions().await {
        Ok(value) => value,
        Err(err) => {
            eprintln!("status failed: {err}");
            return 1;
        }
    };
    let backlog_depth = match runtime.store.backlog_depth(None).await {
        Ok(value) => value,
        Err(err) => {
            eprintln!("status failed: {err}");
            return 1;
        }
    };

    if sessions.is_empty() {
        println!("no enqueueing sessions");
    } else {
        for session in &sessions {
            println!(
                "{}\t{}\tcursor={}",
                session.entity_type,
                session.status.as_db_str(),
                session.last_processed_value.as_deref().unwrap_or("-"),
            );
        }
    }
    println!("backlog depth: {backlog_depth}");
    0
}

/// Gracefully stops the worker loop when SIGTERM or SIGINT is received.
async fn handle_shutdown_signals(state: Arc<AppState>) {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to register SIGTERM signal handler");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to register SIGINT signal handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!(event = "shutdown_signal", signal = "SIGTERM", "shutting down");
        }
        _ = sigint.recv() => {
            info!(event = "shutdown_signal", signal = "SIGINT", "shutting down");
        }
    }

    state.shutdown_token.cancel();
}

/// Serves metrics and keeps firing batch steps until shutdown.
///
/// The loop is the recurring trigger the manager expects: a failed step is
/// only logged, because the unadvanced cursor makes the next tick re-fetch
/// the same page.
pub async fn run_worker(args: RunArgs) -> i32 {
    dotenv().ok();
    let logging_context = init_logging("reindex_worker", "run", &args.common.log_level);

    if let Err(err) = validate_run_args(&args) {
        eprintln!("{err}");
        return 2;
    }

    let runtime = match build_runtime(&args.common) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let metrics_addr = args
        .metrics_bind
        .parse::<SocketAddr>()
        .expect("metrics bind address validated earlier");
    let app_state = Arc::new(AppState::new(runtime.pool.clone(), CancellationToken::new()));
    let server_handle = match setup_server_with_addr(Arc::clone(&app_state), metrics_addr).await {
        Ok(handle) => handle,
        Err(err) => {
            let error_report = format_error_report(&err);
            error!(
                event = "metrics_server_start_failed",
                bind = %metrics_addr,
                error = %err,
                error_report = %error_report,
                "failed to start metrics endpoint"
            );
            eprintln!("failed to start metrics endpoint on {metrics_addr}: {err}");
            return 1;
        }
    };
    let shutdown_handle = tokio::spawn(handle_shutdown_signals(Arc::clone(&app_state)));

    info!(
        event = "worker_started",
        interval_ms = args.interval_ms,
        batch_size = args.batch_size,
        run_id = %logging_context.run_id,
        "worker trigger loop started"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = app_state.shutdown_token.cancelled() => break,
            _ = ticker.tick() => {
                match runtime.manager.process_next_active(args.batch_size).await {
                    Ok(0) => {}
                    Ok(processed) => {
                        info!(
                            event = "trigger_batch_complete",
                            processed,
                            "processed one enqueueing batch"
                        );
                    }
                    Err(err) => {
                        let error_report = format_error_report(&err);
                        error!(
                            event = "trigger_batch_failed",
                            error = %err,
                            error_report = %error_report,
                            "batch step failed; the next tick retries from the same cursor"
                        );
                    }
                }
            }
        }
    }

    shutdown_handle.abort();
    let _ = server_handle.await;
    info!(event = "worker_stopped", "worker trigger loop stopped");
    0
}

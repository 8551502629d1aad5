use crate::{
    cli::Cli,
    config::Config,
    db::build_db_pool,
    logging::{format_error_report, init_logging},
    notifier::PostmarkNotifier,
    sage_client::{HyperSageClient, SageCostClient},
    server::{register_metrics, setup_server_with_addr},
    state::AppState,
    sync_service::{AdjustmentProcessor, SyncService},
};
use dotenv::dotenv;
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code for invalid configuration.
const EXIT_CONFIG: i32 = 2;
/// Exit code for runtime failures.
const EXIT_FAILURE: i32 = 1;

fn report_fatal(event: &'static str, message: &str, err: &(dyn StdError + 'static)) {
    let error_report = format_error_report(err);
    error!(
        event,
        error = %err,
        error_debug = ?err,
        error_report = %error_report,
        "{message}"
    );
    eprintln!("{message}: {err}");
    eprintln!("{error_report}");
}

/// Cancels `shutdown` on SIGTERM or SIGINT.
async fn handle_shutdown_signals(shutdown: CancellationToken) {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(err), _) | (_, Err(err)) => {
            warn!(event = "signal_handler_failed", error = %err, "could not install signal handlers");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!(event = "shutdown_signal", signal = "SIGTERM", "shutting down after the current cycle"),
        _ = sigint.recv() => info!(event = "shutdown_signal", signal = "SIGINT", "shutting down after the current cycle"),
    }
    shutdown.cancel();
}

/// Runs the sync worker until shutdown (or for one cycle with `--once`) and returns the process
/// exit code.
pub async fn run_worker(cli: Cli) -> i32 {
    dotenv().ok();

    let mode = if cli.once { "once" } else { "loop" };
    let logging_context = init_logging("adjustment_sync", mode, &cli.log_level);
    let run_span = tracing::info_span!(
        "worker_run",
        service = %logging_context.service,
        environment = %logging_context.environment,
        mode = %logging_context.mode,
        run_id = %logging_context.run_id,
        build_version = %logging_context.build_version,
        build_commit = %logging_context.build_commit
    );
    let _run_guard = run_span.enter();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            report_fatal("config_invalid", "invalid configuration", &err);
            return EXIT_CONFIG;
        }
    };
    info!(
        event = "worker_starting",
        interval_secs = config.sync.interval.as_secs(),
        cost_lookup_enabled = config.sync.cost_lookup_enabled,
        max_consecutive_failures = config.sync.max_consecutive_failures,
        pause_on_alert = config.sync.pause_policy.pause_on_alert,
        "starting adjustment sync worker"
    );

    let pool = match build_db_pool(&config.database_url) {
        Ok(pool) => pool,
        Err(err) => {
            report_fatal("db_pool_build_failed", "failed to build db pool", &err);
            return EXIT_FAILURE;
        }
    };

    let submitter = match HyperSageClient::new(&config.hyper_sage) {
        Ok(client) => client,
        Err(err) => {
            report_fatal("http_client_build_failed", "failed to build HyperSage client", &err);
            return EXIT_FAILURE;
        }
    };
    let cost_lookup = match config.sage.as_ref().map(SageCostClient::new).transpose() {
        Ok(client) => client,
        Err(err) => {
            report_fatal("http_client_build_failed", "failed to build Sage client", &err);
            return EXIT_FAILURE;
        }
    };
    let notifier =
        match PostmarkNotifier::new(config.alert.clone(), config.sync.max_consecutive_failures) {
            Ok(notifier) => notifier,
            Err(err) => {
                report_fatal("http_client_build_failed", "failed to build Postmark client", &err);
                return EXIT_FAILURE;
            }
        };

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(pool.clone(), shutdown.clone()));
    let server_handle = if cli.no_server {
        register_metrics(&state).await;
        None
    } else {
        match setup_server_with_addr(Arc::clone(&state), config.metrics_addr).await {
            Ok(handle) => Some(handle),
            Err(err) => {
                let message = format!("failed to start metrics endpoint on {}", config.metrics_addr);
                report_fatal("metrics_server_start_failed", &message, &err);
                return EXIT_FAILURE;
            }
        }
    };
    tokio::spawn(handle_shutdown_signals(shutdown.clone()));

    let processor = AdjustmentProcessor::new(cost_lookup, submitter, config.sync.pause_policy);
    let mut service = SyncService::new(processor, notifier, &config.sync);

    let result = if cli.once {
        service.run_once(&pool).await.map(|outcome| {
            info!(
                event = "single_cycle_complete",
                outcome = outcome.disposition.as_str(),
                adjustment_id = outcome.adjustment_id,
                "ran one processing cycle"
            );
        })
    } else {
        service.run(pool, shutdown.clone()).await
    };

    shutdown.cancel();
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }

    match result {
        Ok(()) => {
            info!(event = "worker_stopped", "adjustment sync worker stopped");
            0
        }
        Err(err) => {
            report_fatal("sync_failed", "adjustment sync stopped on a storage error", &err);
            EXIT_FAILURE
        }
    }
}

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::executor::{Executor, LocalExecutor};
use crate::scheduler::{Clock, Scheduler, SystemClock};
use crate::server::{self, AppState};
use crate::store::postgres::{connect, PgJobStore, PgRunStore};
use crate::store::{JobStore, RunStore};
use crate::worker::Worker;

/// chronod - a distributed cron-style job scheduler
#[derive(Parser, Debug)]
#[command(
    name = "chronod",
    version,
    about = "chronod - a distributed cron-style job scheduler"
)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the REST API server
    Api,
    /// Run the scheduler loop
    Scheduler,
    /// Run the worker loop
    Worker,
    /// Run API, scheduler, and worker in one process
    All,
}

/// Connect to storage, install signal handling, and run the selected
/// component(s) until shutdown.
pub async fn dispatch(cli: &Cli, config: Config) -> anyhow::Result<()> {
    let pool = connect(&config.database_url).await?;
    let job_store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let run_store: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match cli.command {
        Commands::Api => {
            let state = Arc::new(AppState {
                job_store,
                run_store,
            });
            server::serve(state, config.api_port, cancel).await?;
        }
        Commands::Scheduler => {
            let scheduler = build_scheduler(&config, job_store, run_store);
            scheduler.run(cancel).await?;
        }
        Commands::Worker => {
            let worker = build_worker(&config, job_store, run_store);
            worker.run(cancel).await?;
        }
        Commands::All => {
            let state = Arc::new(AppState {
                job_store: Arc::clone(&job_store),
                run_store: Arc::clone(&run_store),
            });
            let scheduler =
                build_scheduler(&config, Arc::clone(&job_store), Arc::clone(&run_store));
            let worker = build_worker(&config, job_store, run_store);

            let api_cancel = cancel.clone();
            let scheduler_cancel = cancel.clone();
            let api_port = config.api_port;
            tokio::try_join!(
                async move { server::serve(state, api_port, api_cancel).await },
                async move { scheduler.run(scheduler_cancel).await },
                async move { worker.run(cancel).await },
            )?;
        }
    }
    Ok(())
}

fn build_scheduler(
    config: &Config,
    job_store: Arc<dyn JobStore>,
    run_store: Arc<dyn RunStore>,
) -> Scheduler {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Scheduler::new(job_store, run_store, clock, config.scheduler_interval)
}

fn build_worker(
    config: &Config,
    job_store: Arc<dyn JobStore>,
    run_store: Arc<dyn RunStore>,
) -> Worker {
    let executor: Arc<dyn Executor> = Arc::new(LocalExecutor::new(
        config.default_timeout,
        config.output_preview_len,
    ));
    let mut worker = Worker::new(
        Worker::default_id(),
        job_store,
        run_store,
        executor,
        config.worker_poll_interval,
        config.worker_concurrency,
    );
    worker.set_shutdown_grace(config.shutdown_grace);
    worker
}

/// Trip the root cancellation token on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received interrupt, shutting down"),
            _ = term.recv() => tracing::info!("received terminate, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received interrupt, shutting down");
    }
    cancel.cancel();
}

//! CLI command definitions and process wiring.
//!
//! The broker connection is created once per process here and injected
//! into every queue handle and worker pool.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::generation::{LlmProcessor, Processor};
use crate::llm::{LlmClient, LlmProvider};
use crate::scheduler::{
    Broker, QueueOptions, RedisBroker, TaskQueue, WorkerPool, WorkerPoolConfig, CONTEXT_QUEUE,
    GENERATE_QUEUE,
};

/// Queue-backed sentence and passage generation service for language learners.
#[derive(Parser)]
#[command(name = "lingoforge")]
#[command(about = "Generate example sentences and context passages through a job queue")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the HTTP API and the workers in a single process.
    Run(RunArgs),

    /// Run only the HTTP producer/status API.
    Serve(ServeArgs),

    /// Run only the queue workers.
    Work(WorkArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Address to bind the HTTP API to (overrides BIND_ADDR).
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Workers per queue (overrides GENERATE_WORKERS/CONTEXT_WORKERS).
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP API to (overrides BIND_ADDR).
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Parser, Debug)]
pub struct WorkArgs {
    /// Workers per queue (overrides GENERATE_WORKERS/CONTEXT_WORKERS).
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the selected command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::Serve(args) => serve(config, args).await,
        Commands::Work(args) => work(config, args).await,
    }
}

/// Connects the shared broker and builds the two queue handles over it.
async fn connect_queues(config: &AppConfig) -> anyhow::Result<(TaskQueue, TaskQueue)> {
    info!(redis_url = %config.redis_url, "connecting to broker");
    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&config.redis_url).await?);

    let generate = TaskQueue::new(GENERATE_QUEUE, broker.clone(), QueueOptions::default());
    let context = TaskQueue::new(CONTEXT_QUEUE, broker, QueueOptions::default());
    Ok((generate, context))
}

fn build_processor(config: &AppConfig) -> anyhow::Result<Arc<dyn Processor>> {
    let provider: Arc<dyn LlmProvider> = Arc::new(LlmClient::new(
        config.llm.api_base.clone(),
        config.llm.api_key.clone(),
    )?);
    Ok(Arc::new(LlmProcessor::new(
        provider,
        config.llm.model.clone(),
    )))
}

async fn start_pools(
    config: &AppConfig,
    generate: &TaskQueue,
    context: &TaskQueue,
    workers_override: Option<usize>,
) -> anyhow::Result<(WorkerPool, WorkerPool)> {
    let processor = build_processor(config)?;

    let generate_workers = workers_override.unwrap_or(config.generate_workers);
    let context_workers = workers_override.unwrap_or(config.context_workers);

    let mut generate_pool = WorkerPool::new(
        WorkerPoolConfig::new(generate_workers),
        generate.clone(),
        processor.clone(),
    );
    let mut context_pool = WorkerPool::new(
        WorkerPoolConfig::new(context_workers),
        context.clone(),
        processor,
    );

    generate_pool.start().await?;
    context_pool.start().await?;
    Ok((generate_pool, context_pool))
}

async fn run(config: AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let (generate, context) = connect_queues(&config).await?;
    let (mut generate_pool, mut context_pool) =
        start_pools(&config, &generate, &context, args.workers).await?;

    let state = Arc::new(AppState::new(generate, context));
    let bind = args.bind.unwrap_or(config.bind_addr);
    api::serve(state, bind).await?;

    generate_pool.shutdown().await?;
    context_pool.shutdown().await?;
    Ok(())
}

async fn serve(config: AppConfig, args: ServeArgs) -> anyhow::Result<()> {
    let (generate, context) = connect_queues(&config).await?;
    let state = Arc::new(AppState::new(generate, context));
    let bind = args.bind.unwrap_or(config.bind_addr);
    api::serve(state, bind).await?;
    Ok(())
}

async fn work(config: AppConfig, args: WorkArgs) -> anyhow::Result<()> {
    let (generate, context) = connect_queues(&config).await?;
    let (mut generate_pool, mut context_pool) =
        start_pools(&config, &generate, &context, args.workers).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    generate_pool.shutdown().await?;
    context_pool.shutdown().await?;
    Ok(())
}

mod auth;
mod cleanup;
mod cli;
mod config;
mod dataset;
mod download;
mod evaluation;
mod handlers;
mod knowledge;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, DatasetKind, DownloadArgs, EvaluatorKind, KbKind, RunArgs, ServeArgs};
use crate::config::Config;
use crate::dataset::{Dataset, HuggingFaceDocDataset, LocalDataset};
use crate::evaluation::{run_evaluation, Evaluator, RagasConfig, RagasEvaluator, RunConfig};
use crate::knowledge::{KnowledgeBase, LocalKnowledgeBase, RemoteKnowledgeBase};

const KB_HEALTH_ATTEMPTS: u32 = 5;

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,rag_eval=info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Run(args) => run_command(config, args).await,
        Commands::Serve(args) => serve_command(config, args).await,
        Commands::Download(args) => download_command(args).await,
    }
}

async fn run_command(config: Config, args: RunArgs) -> Result<()> {
    config.print_banner();
    let data_dir = args.data_dir.clone().unwrap_or_else(|| config.data_dir.clone());

    let kb: Box<dyn KnowledgeBase> = match args.kb {
        KbKind::Local => Box::new(
            LocalKnowledgeBase::from_config(&config).context("Failed to build local knowledge base")?,
        ),
        KbKind::Remote => {
            let url = args.kb_url.clone().unwrap_or_else(|| config.kb_service_url.clone());
            let remote = RemoteKnowledgeBase::new(url, config.http_timeout_secs)
                .context("Failed to build knowledge service client")?
                .with_auth_token(config.auth_token.clone());
            remote
                .wait_until_healthy(KB_HEALTH_ATTEMPTS)
                .await
                .with_context(|| format!("Knowledge service at {} is not healthy", remote.base_url()))?;
            Box::new(remote)
        }
    };

    let dataset: Box<dyn Dataset> = match args.dataset {
        DatasetKind::Huggingface => Box::new(HuggingFaceDocDataset::new(&data_dir)?),
        DatasetKind::Local => {
            let qa_file = args
                .qa_file
                .clone()
                .context("--qa-file is required with --dataset local")?;
            let docs_dir = args.docs_dir.clone().unwrap_or_else(|| data_dir.join("docs"));
            Box::new(LocalDataset::new(qa_file, docs_dir, &data_dir))
        }
    };

    let evaluator: Box<dyn Evaluator> = match args.evaluator {
        EvaluatorKind::Ragas => {
            let ragas = RagasConfig::new(
                config.ragas_service_url.clone(),
                config.eval_model_name.clone(),
                config.embedding_model.clone(),
            )
            .with_max_workers(args.workers)
            .with_timeout(args.timeout);
            Box::new(RagasEvaluator::new(ragas, config.http_timeout_secs)?)
        }
    };

    let run_config = RunConfig {
        retrieval_k: args.k,
        max_docs: args.max_docs,
        max_qa_items: args.max_qa,
        skip_load: args.skip_load(),
        force_reload: args.force_reload(),
        full_log: args.full_log,
        output: args.output.clone(),
        eval_mode: args.eval_mode,
        model_name: config.model_name.clone(),
        eval_model_name: config.eval_model_name.clone(),
        embedding_model: config.embedding_model.clone(),
    };

    let result = run_evaluation(kb.as_ref(), dataset.as_ref(), evaluator.as_ref(), &run_config).await?;
    println!("\n{result}");
    Ok(())
}

async fn serve_command(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(port) = args.port {
        config.port = port;
    }
    config.print_service_banner();

    let kb = LocalKnowledgeBase::from_config(&config).context("Failed to build local knowledge base")?;
    let state = handlers::AppState::new(Arc::new(kb), config.auth_token.clone());
    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, draining...");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn download_command(args: DownloadArgs) -> Result<()> {
    let downloader = download::Downloader::from_env()?;
    let opts = download::DownloadOptions {
        dataset: args.dataset,
        config: args.config,
        split: args.split,
        limit: args.limit,
        out_dir: args.out_dir,
        output: args.output,
        with_files: args.with_files,
        force: args.force,
    };
    let path = downloader.run(&opts).await?;
    println!("Wrote dataset JSON: {}", path.display());
    Ok(())
}

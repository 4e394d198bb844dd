use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

mod cli;

use cli::{Cli, Command};
use wbgrep_core::config::Config;
use wbgrep_core::indexer::Indexer;
use wbgrep_core::watcher;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(target: "wbgrep::panic", location = %location, payload = %payload, "PANIC: thread panicked");
        default_panic(info);
    }));

    let cli = Cli::parse();
    let root = dunce::canonicalize(&cli.root).unwrap_or(cli.root.clone());
    let config = Config::load(&root).with_context(|| format!("loading configuration for {}", root.display()))?;

    info!(
        root = %root.display(),
        data_dir = %config.data_dir.display(),
        ollama_base_url = %config.ollama.base_url,
        ollama_model = %config.ollama.model,
        "wbgrep starting"
    );

    match cli.command {
        Command::Index { force, clear } => run_index(root, config, force, clear).await,
        Command::Watch { force } => run_watch(root, config, force).await,
        Command::Query { text, limit, path_prefix } => run_query(root, config, text, limit, path_prefix).await,
        Command::Stats => run_stats(root, config),
    }
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::var("WBGREP_LOG_DIR").unwrap_or_else(|_| {
        dirs::data_local_dir()
            .map(|d| d.join("wbgrep").join("logs").to_string_lossy().to_string())
            .unwrap_or_else(|| ".wb-grep/logs".to_string())
    });
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "wbgrep.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Leak the guard: it must outlive the process for buffered log lines to
    // flush, and main() never returns early before process exit.
    Box::leak(Box::new(guard));

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wbgrep_core=info,wbgrep=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry().with(env_filter).with(stdout_layer).with(file_layer).init();
    Ok(())
}

async fn run_index(root: std::path::PathBuf, config: Config, force: bool, clear: bool) -> Result<()> {
    let indexer = Indexer::open(root, config)?;
    indexer.preflight().await.context("embedding backend preflight check failed")?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let stats = indexer
        .index_all(
            force,
            clear,
            Some(&|done, total, path| {
                bar.set_length(total as u64);
                bar.set_position(done as u64);
                bar.set_message(path.display().to_string());
            }),
        )
        .await?;
    bar.finish_and_clear();

    println!(
        "indexed {} file(s), skipped {}, failed {}, deleted {}, {} chunk(s) total",
        stats.indexed, stats.skipped, stats.failed, stats.deleted, stats.total_chunks
    );
    indexer.close()?;
    Ok(())
}

async fn run_watch(root: std::path::PathBuf, config: Config, force: bool) -> Result<()> {
    let indexer = Arc::new(Indexer::open(root, config.clone())?);
    indexer.preflight().await.context("embedding backend preflight check failed")?;

    // The initial full-tree index runs to completion before the watcher
    // registers, so changes that land during this pass are not captured.
    // Registering the watcher first and buffering events would close that
    // window but adds a buffering layer this tool doesn't have; documented
    // as a deliberate simplification in DESIGN.md.
    println!("performing initial index before watching...");
    let stats = indexer.index_all(force, false, None).await?;
    println!(
        "initial index complete: indexed {}, skipped {}, failed {}, {} chunk(s)",
        stats.indexed, stats.skipped, stats.failed, stats.total_chunks
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let shutdown_task = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    println!("watching {} for changes (Ctrl+C to stop)...", indexer.root().display());
    watcher::run(indexer.clone(), &config, shutdown_rx).await?;
    shutdown_task.abort();

    match Arc::try_unwrap(indexer) {
        Ok(indexer) => indexer.close()?,
        Err(indexer) => indexer.flush()?,
    }
    info!("watch stopped, journal flushed");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received terminate signal, shutting down"); },
    }
}

async fn run_query(
    root: std::path::PathBuf,
    config: Config,
    text: String,
    limit: usize,
    path_prefix: Option<String>,
) -> Result<()> {
    let indexer = Indexer::open(root, config.clone())?;
    indexer.preflight().await.context("embedding backend preflight check failed")?;
    let k = if limit == 0 { config.search.max_results } else { limit };
    let results = indexer.query(&text, k, path_prefix.as_deref()).await?;

    if results.is_empty() {
        println!("no results");
        indexer.close()?;
        return Ok(());
    }
    for (rank, hit) in results.iter().enumerate() {
        let display_path = std::path::Path::new(&hit.chunk.filepath)
            .strip_prefix(indexer.root())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| hit.chunk.filepath.clone());
        println!(
            "{}. {}:{}-{}  score={:.4}",
            rank + 1,
            display_path,
            hit.chunk.line_start,
            hit.chunk.line_end,
            hit.score
        );
        if config.search.show_content {
            println!("{}", hit.chunk.content);
        }
    }
    indexer.close()?;
    Ok(())
}

fn run_stats(root: std::path::PathBuf, config: Config) -> Result<()> {
    let indexer = Indexer::open(root, config)?;
    let stats = indexer.stats();
    println!("{} chunk(s) across {} file(s)", stats.chunk_count, stats.file_count);
    indexer.close()?;
    Ok(())
}

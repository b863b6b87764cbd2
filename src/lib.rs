// src/lib.rs

pub mod channel;
pub mod cli;
pub mod config;
pub mod errors;
pub mod ipc;
pub mod logging;
pub mod machine;
pub mod message;
pub mod queue;
pub mod sheet;
pub mod trigger;

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Map;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::channel::spawn_line_transport;
use crate::cli::{CliArgs, Command, RunArgs, SuperviseArgs, WorkerArgs};
use crate::config::{MachineConfig, build_machine, load_and_validate};
use crate::ipc::WorkerClient;
use crate::machine::{MachineHandle, MachineNotification, MachineRuntime};
use crate::message::Message;
use crate::queue::{QueueProducer, QueueStore, StoreHandle, spawn_store};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run(run_args) => run_machine(run_args).await,
        Command::Worker(worker_args) => run_worker(worker_args).await,
        Command::Supervise(supervise_args) => run_supervisor(supervise_args).await,
    }
}

/// Load a config and start its runtime next to a fresh queue store.
fn launch(
    cfg: &MachineConfig,
) -> Result<(MachineHandle, StoreHandle, tokio::task::JoinHandle<errors::Result<()>>)> {
    let core = build_machine(cfg)?;
    let store = spawn_store(QueueStore::new(cfg.queue.max_buffer_size));
    let (runtime, handle) = MachineRuntime::new(core, Some(store.clone()));
    let join = runtime.spawn();
    Ok((handle, store, join))
}

/// `streamsheets run`: one machine in-process.
///
/// This wires together:
/// - config loading
/// - queue store + machine runtime
/// - stdin → queue producer
/// - outbox → stdout
/// - Ctrl-C handling
pub async fn run_machine(args: RunArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config '{}'", args.config.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let (handle, store, join) = launch(&cfg)?;
    let notifications = handle.subscribe();
    tokio::spawn(print_notifications(notifications));

    // Ctrl-C → graceful shutdown.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = handle.shutdown().await;
        });
    }

    handle.start().await?;
    info!(machine = %cfg.machine.id, source = %args.source, "machine running; reading stdin");

    let producer = QueueProducer::new(store);
    let source = args.source.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let message = match Message::from_json_str(&line) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "stdin line is not JSON; skipping");
                    continue;
                }
            };
            match producer.publish(&source, &message).await {
                Ok(outcomes) => debug!(message = %message.id, consumers = outcomes.len(), "published"),
                Err(e) => {
                    error!(error = %e, "publishing failed; stopping stdin reader");
                    break;
                }
            }
        }
        debug!("stdin closed");
    });

    drop(handle);
    join.await.context("machine runtime task panicked")??;
    Ok(())
}

async fn print_notifications(mut rx: broadcast::Receiver<MachineNotification>) {
    loop {
        match rx.recv().await {
            Ok(MachineNotification::OutboxPut { message }) => match message.to_json_string() {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "could not encode outbox message"),
            },
            Ok(MachineNotification::Error { sheet, message }) => {
                error!(sheet = ?sheet, "machine error: {message}");
            }
            Ok(other) => debug!(notification = ?other, "machine notification"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "notification printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// `streamsheets worker`: one machine controlled over stdio.
pub async fn run_worker(args: WorkerArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config '{}'", args.config.display()))?;
    let (handle, _store, join) = launch(&cfg)?;

    let transport = spawn_line_transport(tokio::io::stdin(), tokio::io::stdout());
    ipc::serve(handle, transport.channel, transport.inbound).await?;

    join.await.context("machine runtime task panicked")??;
    Ok(())
}

/// `streamsheets supervise`: one worker process per config.
pub async fn run_supervisor(args: SuperviseArgs) -> Result<()> {
    let exe = std::env::current_exe().context("resolving own executable")?;

    let mut workers = Vec::with_capacity(args.configs.len());
    for path in &args.configs {
        let cfg = load_and_validate(path)
            .with_context(|| format!("loading config '{}'", path.display()))?;
        let timeout = Duration::from_millis(cfg.queue.request_timeout_ms);
        let worker = WorkerClient::spawn(&exe, path, timeout).await?;
        workers.push(worker);
    }

    for worker in &workers {
        match worker.request("start", Map::new()).await {
            Ok(result) => info!(worker = %worker.config().display(), %result, "worker started"),
            Err(e) => error!(worker = %worker.config().display(), error = %e, "start failed"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;
    info!("shutting down workers");

    for worker in workers {
        let name = worker.config().display().to_string();
        if let Err(e) = worker.shutdown().await {
            warn!(worker = %name, error = %e, "worker shutdown failed");
        }
    }
    Ok(())
}

/// Simple dry-run output: print machine settings and sheets.
pub fn print_dry_run(cfg: &MachineConfig) {
    println!("streamsheets dry-run");
    println!("  machine.id = {}", cfg.machine.id);
    println!("  machine.name = {}", cfg.display_name());
    println!("  machine.cycletime = {} ms", cfg.machine.cycletime);
    println!("  machine.cycle_regulated = {}", cfg.machine.cycle_regulated);
    println!("  queue.max_buffer_size = {}", cfg.queue.max_buffer_size);
    println!("  queue.request_timeout_ms = {}", cfg.queue.request_timeout_ms);
    println!();

    println!("sheets ({}):", cfg.sheet.len());
    for sheet in &cfg.sheet {
        println!("  - {} ({})", sheet.id, sheet.display_name());
        println!(
            "      trigger: {} ({:?})",
            sheet.trigger.kind, sheet.trigger.repeat
        );
        if let Some(interval) = sheet.trigger.interval {
            println!("      interval: {interval} {:?}", sheet.trigger.interval_unit);
        }
        println!("      processor: {:?}", sheet.processor);
        if let Some(path) = &sheet.loop_path {
            println!("      loop_path: {path}");
        }
        if let Some(max) = sheet.inbox_max_size {
            println!("      inbox_max_size: {max}");
        }
        if let Some(queue) = &sheet.queue {
            println!("      queue.source: {}", queue.source);
        }
    }

    debug!("dry-run complete (no execution)");
}

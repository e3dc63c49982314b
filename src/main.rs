//! Lanbeam CLI - discover peers on the local network and push files,
//! folders, or text straight to them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use lanbeam::config::Settings;
use lanbeam::discovery::PeerDiscovery;
use lanbeam::engine::{ShareEngine, TransferContext};
use lanbeam::events::{self, Event, TextKind};
use lanbeam::history::{HistoryEntry, HistoryStatus, TransferHistory};
use lanbeam::logger::{ConsoleLogger, Logger, NoopLogger};
use lanbeam::sender;
use lanbeam::session::{Direction, SessionId, SessionStatus, SessionStore};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Lanbeam - serverless LAN file, folder and text sharing"
)]
struct Args {
    /// Settings file (TOML); defaults apply when missing
    #[arg(long, global = true, default_value = "lanbeam.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the receiver: answer discovery probes and accept transfers
    Serve,
    /// Probe the subnet and list responding peers
    Discover {
        /// How long to collect responses (ms)
        #[arg(long, default_value_t = 2000)]
        wait_ms: u64,
    },
    /// Send files, or a single folder, to a peer
    Send {
        target: IpAddr,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Send a short text or URL payload to a peer
    Text { target: IpAddr, text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args.config)?;

    match args.cmd {
        Command::Serve => serve(settings).await,
        Command::Discover { wait_ms } => discover(settings, wait_ms).await,
        Command::Send { target, paths } => send(settings, target, paths).await,
        Command::Text { target, text } => send_text(settings, target, text).await,
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let logger: Arc<dyn Logger> = Arc::new(ConsoleLogger);
    let history = TransferHistory::new(&settings.save_dir);
    let (engine, mut events) = ShareEngine::start(settings, logger).await?;
    let store = engine.session_store();

    let printer = tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            match ev {
                Event::FilesReceived { count } => {
                    println!("transfer complete: {} file(s) saved", count);
                }
                Event::FolderReceived { root } => {
                    println!("transfer complete: folder '{}' saved", root);
                }
                Event::TextReceived { payload, kind } => match kind {
                    TextKind::Link => println!("link received: {}", payload),
                    TextKind::PlainText => println!("text received: {}", payload),
                },
                Event::SessionFinished { id, name, status } => {
                    if status == SessionStatus::Failed {
                        println!("transfer failed: {}", name);
                    }
                    if let Err(e) = record_history(&history, &store, id, &name, status) {
                        eprintln!("history write failed: {:#}", e);
                    }
                }
            }
        }
    });

    println!("receiving into {}", engine.settings().save_dir.display());
    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    engine.shutdown().await;
    printer.abort();
    Ok(())
}

async fn discover(settings: Settings, wait_ms: u64) -> Result<()> {
    let discovery = Arc::new(
        PeerDiscovery::bind(settings.discovery_port, &settings.display_name).await?,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = discovery.clone();
    let task = tokio::spawn(async move {
        runner.run(shutdown_rx, Arc::new(ConsoleLogger)).await;
    });

    discovery.probe().await?;
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;

    let peers = discovery.peers();
    if peers.is_empty() {
        println!("no peers responded");
    } else {
        for p in &peers {
            println!("{:<16} {}", p.address, p.host_name);
        }
    }
    let _ = shutdown_tx.send(true);
    let _ = task.await;
    Ok(())
}

fn record_history(
    history: &TransferHistory,
    store: &SessionStore,
    id: SessionId,
    name: &str,
    status: SessionStatus,
) -> Result<()> {
    let status = match status {
        SessionStatus::Complete => HistoryStatus::Complete,
        SessionStatus::Cancelled => HistoryStatus::Cancelled,
        SessionStatus::Failed => HistoryStatus::Failed,
        _ => return Ok(()),
    };
    let view = store.view(id);
    let (direction, bytes, error) = match &view {
        Some(v) => (
            match v.direction {
                Direction::Send => "send",
                Direction::Receive => "receive",
            },
            v.bytes_moved,
            v.error.clone(),
        ),
        None => ("unknown", 0, None),
    };
    history.add_entry(&HistoryEntry::now(
        id.to_string(),
        name.to_string(),
        direction.to_string(),
        status,
        bytes,
        error,
    ))
}

fn cli_context(settings: &Settings) -> (TransferContext, events::EventRx) {
    let (events_tx, events_rx) = events::channel();
    (
        TransferContext {
            store: SessionStore::new(),
            events: events_tx,
            logger: Arc::new(NoopLogger),
            save_dir: settings.save_dir.clone(),
        },
        events_rx,
    )
}

async fn send(settings: Settings, target: IpAddr, paths: Vec<PathBuf>) -> Result<()> {
    let addr = SocketAddr::new(target, settings.transfer_port);
    let (ctx, _events) = cli_context(&settings);

    let (done_tx, done_rx) = watch::channel(false);
    let render = tokio::spawn(render_progress(ctx.store.clone(), done_rx));

    let result = sender::send_paths(addr, &paths, &ctx).await;
    let _ = done_tx.send(true);
    let _ = render.await;
    result
}

async fn send_text(settings: Settings, target: IpAddr, text: String) -> Result<()> {
    let addr = SocketAddr::new(target, settings.transfer_port);
    let (ctx, _events) = cli_context(&settings);
    sender::send_text(addr, &text, &ctx).await?;
    println!("sent {} bytes of text to {}", text.len(), target);
    Ok(())
}

/// Poll the session store and mirror it into one progress bar per
/// session until the transfer task reports done.
async fn render_progress(store: SessionStore, mut done: watch::Receiver<bool>) {
    let mp = MultiProgress::new();
    let style = ProgressStyle::with_template(
        "{msg:30!} [{bar:40}] {percent:>3}% {bytes}/{total_bytes}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    let mut bars: HashMap<SessionId, ProgressBar> = HashMap::new();

    loop {
        for v in store.snapshot() {
            let bar = bars.entry(v.id).or_insert_with(|| {
                let b = mp.add(ProgressBar::new(v.total_bytes.max(1)));
                b.set_style(style.clone());
                b
            });
            if bar.is_finished() {
                continue;
            }
            bar.set_position(v.bytes_moved);
            match v.status {
                SessionStatus::Complete => bar.finish_with_message(format!("{} done", v.name)),
                SessionStatus::Cancelled => {
                    bar.abandon_with_message(format!("{} cancelled", v.name))
                }
                SessionStatus::Failed => bar.abandon_with_message(format!("{} failed", v.name)),
                _ => bar.set_message(format!("{} {:.2} MB/s", v.name, v.mb_per_sec)),
            }
        }
        if *done.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = done.changed() => {}
        }
    }
    // One last pass so terminal states are reflected
    for v in store.snapshot() {
        if let Some(bar) = bars.get(&v.id) {
            if !bar.is_finished() {
                bar.set_position(v.bytes_moved);
                bar.finish_with_message(v.name);
            }
        }
    }
}

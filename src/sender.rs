//! Outbound direction of the transfer protocol.
//!
//! One TCP connection per send: the complete manifest goes first so
//! the receiver can pre-create directories and knows every declared
//! size, then the file bytes follow in manifest order, 8 KiB at a
//! time, with progress recorded after every chunk.
//!
//! Cancelling one item aborts the whole connection. All items share a
//! single continuous byte stream, so skipping ahead after a partial
//! write would desynchronize every later entry on the receiving side;
//! closing the connection keeps the failure clean and observable.

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use walkdir::WalkDir;

use crate::engine::TransferContext;
use crate::events::Event;
use crate::protocol::CHUNK_SIZE;
use crate::session::{Direction, SessionId, SessionStatus};
use crate::throughput::ThroughputTracker;
use crate::wire::{self, ManifestEntry};

/// What a set of selected paths means on the wire.
#[derive(Debug, PartialEq, Eq)]
pub enum SendMode {
    Files,
    Folder,
}

/// Exactly one path naming a directory means Folder; everything else
/// is a flat Files batch.
pub fn classify_paths(paths: &[PathBuf]) -> SendMode {
    if paths.len() == 1 && paths[0].is_dir() {
        SendMode::Folder
    } else {
        SendMode::Files
    }
}

fn relative_wire_path(root: &Path, file: &Path) -> Result<String> {
    let rel = file
        .strip_prefix(root)
        .with_context(|| format!("{} not under {}", file.display(), root.display()))?;
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    Ok(joined)
}

/// Build the manifest for a flat file batch: (local path, wire entry).
fn files_manifest(paths: &[PathBuf]) -> Result<Vec<(PathBuf, ManifestEntry)>> {
    let mut out = Vec::with_capacity(paths.len());
    for p in paths {
        let meta = std::fs::metadata(p).with_context(|| format!("stat {}", p.display()))?;
        if !meta.is_file() {
            bail!("{} is not a regular file", p.display());
        }
        let name = p
            .file_name()
            .with_context(|| format!("{} has no file name", p.display()))?
            .to_string_lossy()
            .into_owned();
        out.push((
            p.clone(),
            ManifestEntry {
                name,
                size: meta.len() as i64,
            },
        ));
    }
    Ok(out)
}

/// Walk a directory tree and build the Folder manifest with
/// `/`-separated relative paths, in a deterministic order.
fn folder_manifest(root: &Path) -> Result<(String, Vec<(PathBuf, ManifestEntry)>)> {
    let root_name = root
        .file_name()
        .with_context(|| format!("{} has no directory name", root.display()))?
        .to_string_lossy()
        .into_owned();
    let mut out = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata()?.len() as i64;
        let name = relative_wire_path(root, entry.path())?;
        out.push((entry.path().to_path_buf(), ManifestEntry { name, size }));
    }
    Ok((root_name, out))
}

/// Connect to a peer's transfer port and send the given paths as one
/// Files or Folder envelope.
pub async fn send_paths(addr: SocketAddr, paths: &[PathBuf], ctx: &TransferContext) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect {}", addr))?;
    stream.set_nodelay(true).ok();
    let res = send_paths_over(&mut stream, paths, ctx).await;
    stream.shutdown().await.ok();
    res
}

/// Protocol body, split from the connect so tests can drive it over an
/// in-memory stream.
pub async fn send_paths_over<W: AsyncWrite + Unpin>(
    w: &mut W,
    paths: &[PathBuf],
    ctx: &TransferContext,
) -> Result<()> {
    let (header, items) = match classify_paths(paths) {
        SendMode::Folder => {
            let (root, items) = folder_manifest(&paths[0])?;
            let entries: Vec<ManifestEntry> = items.iter().map(|(_, e)| e.clone()).collect();
            (wire::encode_folder_header(&root, &entries), items)
        }
        SendMode::Files => {
            let items = files_manifest(paths)?;
            let entries: Vec<ManifestEntry> = items.iter().map(|(_, e)| e.clone()).collect();
            (wire::encode_files_header(&entries), items)
        }
    };

    w.write_all(&header).await.context("write envelope header")?;

    // Every item gets its session up front so the whole batch is
    // visible (and cancellable) as soon as the manifest is committed.
    let sessions: Vec<_> = items
        .iter()
        .map(|(_, e)| ctx.store.create(&e.name, Direction::Send, e.size as u64))
        .collect();

    for (idx, ((path, entry), (id, cancel))) in items.iter().zip(sessions.iter()).enumerate() {
        if cancel.load(Ordering::Relaxed) {
            abort_after_cancel(ctx, *id, entry, &sessions[idx + 1..], &items[idx + 1..]);
            return Ok(());
        }
        ctx.store.start(*id);

        let mut file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) => {
                // A vanished source file invalidates its declared size,
                // and with the manifest already written the stream
                // cannot be resynchronized. Abandon the connection.
                let msg = format!("open {}: {}", path.display(), e);
                finish(ctx, *id, &entry.name, SessionStatus::Failed, Some(&msg));
                fail_rest(ctx, &sessions[idx + 1..], &items[idx + 1..], "connection abandoned");
                bail!(msg);
            }
        };

        let declared = entry.size as u64;
        let mut tracker = ThroughputTracker::new(declared);
        let mut buf = vec![0u8; CHUNK_SIZE];
        // Never write past the declared size: a file that grew after
        // the manifest was sent would otherwise desynchronize the
        // stream for every later entry.
        while tracker.bytes_moved() < declared {
            if cancel.load(Ordering::Relaxed) {
                abort_after_cancel(ctx, *id, entry, &sessions[idx + 1..], &items[idx + 1..]);
                return Ok(());
            }
            let want = (declared - tracker.bytes_moved()).min(CHUNK_SIZE as u64) as usize;
            let n = file
                .read(&mut buf[..want])
                .await
                .with_context(|| format!("read {}", path.display()))?;
            if n == 0 {
                break;
            }
            if let Err(e) = w.write_all(&buf[..n]).await {
                let msg = format!("send {}: {}", entry.name, e);
                finish(ctx, *id, &entry.name, SessionStatus::Failed, Some(&msg));
                fail_rest(ctx, &sessions[idx + 1..], &items[idx + 1..], "connection abandoned");
                return Err(e).context("write file chunk");
            }
            let sample = tracker.record(n as u64);
            ctx.store.progress(*id, tracker.bytes_moved(), sample);
        }

        if tracker.bytes_moved() != declared {
            let msg = format!(
                "{}: file shrank mid-send ({} of {} bytes)",
                entry.name,
                tracker.bytes_moved(),
                declared
            );
            finish(ctx, *id, &entry.name, SessionStatus::Failed, Some(&msg));
            fail_rest(ctx, &sessions[idx + 1..], &items[idx + 1..], "connection abandoned");
            bail!(msg);
        }

        ctx.store.complete(*id);
        ctx.logger.sent(&entry.name, entry.size as u64);
        finish_event(ctx, *id, &entry.name, SessionStatus::Complete);
    }
    w.flush().await.context("flush connection")?;
    Ok(())
}

/// Send a short text or URL payload as a Text envelope.
pub async fn send_text(addr: SocketAddr, text: &str, ctx: &TransferContext) -> Result<()> {
    let (id, _cancel) = ctx
        .store
        .create(&preview(text), Direction::Send, text.len() as u64);
    ctx.store.start(id);
    let result: Result<()> = async {
        let mut stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect {}", addr))?;
        stream
            .write_all(&wire::encode_text(text))
            .await
            .context("write text envelope")?;
        stream.shutdown().await.ok();
        Ok(())
    }
    .await;
    match &result {
        Ok(()) => {
            let mut t = ThroughputTracker::new(text.len() as u64);
            let sample = t.record(text.len() as u64);
            ctx.store.progress(id, text.len() as u64, sample);
            ctx.store.complete(id);
            ctx.logger.sent("text", text.len() as u64);
            finish_event(ctx, id, &preview(text), SessionStatus::Complete);
        }
        Err(e) => finish(ctx, id, &preview(text), SessionStatus::Failed, Some(&e.to_string())),
    }
    result
}

/// First 50 characters, the way the transfer list labels a text item.
pub fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

fn abort_after_cancel(
    ctx: &TransferContext,
    id: SessionId,
    entry: &ManifestEntry,
    rest_sessions: &[(SessionId, std::sync::Arc<std::sync::atomic::AtomicBool>)],
    rest_items: &[(PathBuf, ManifestEntry)],
) {
    ctx.store.mark_cancelled(id);
    ctx.logger.cancelled(&entry.name);
    finish_event(ctx, id, &entry.name, SessionStatus::Cancelled);
    // Items that never started ride the same connection; they go down
    // with it.
    for ((rid, _), (_, rentry)) in rest_sessions.iter().zip(rest_items) {
        ctx.store.mark_cancelled(*rid);
        finish_event(ctx, *rid, &rentry.name, SessionStatus::Cancelled);
    }
}

fn fail_rest(
    ctx: &TransferContext,
    rest_sessions: &[(SessionId, std::sync::Arc<std::sync::atomic::AtomicBool>)],
    rest_items: &[(PathBuf, ManifestEntry)],
    reason: &str,
) {
    for ((rid, _), (_, rentry)) in rest_sessions.iter().zip(rest_items) {
        finish(ctx, *rid, &rentry.name, SessionStatus::Failed, Some(reason));
    }
}

fn finish(
    ctx: &TransferContext,
    id: SessionId,
    name: &str,
    status: SessionStatus,
    error: Option<&str>,
) {
    match status {
        SessionStatus::Failed => {
            let msg = error.unwrap_or("unknown");
            ctx.store.fail(id, msg);
            ctx.logger.error("send", msg);
        }
        SessionStatus::Cancelled => ctx.store.mark_cancelled(id),
        _ => {}
    }
    finish_event(ctx, id, name, status);
}

fn finish_event(ctx: &TransferContext, id: SessionId, name: &str, status: SessionStatus) {
    let _ = ctx.events.send(Event::SessionFinished {
        id,
        name: name.to_string(),
        status,
    });
}

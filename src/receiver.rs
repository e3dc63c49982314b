//! Inbound direction of the transfer protocol.
//!
//! Reads one envelope per accepted connection. Filesystem trouble for
//! a single entry fails only that entry's session: the declared bytes
//! are drained from the stream so later entries still parse. Network
//! trouble abandons the connection, since nothing after a short read
//! can be trusted.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use url::Url;

use crate::engine::TransferContext;
use crate::events::{Event, TextKind};
use crate::protocol::CHUNK_SIZE;
use crate::sanitize::{sanitize_relative_path, sanitize_segment};
use crate::session::{Direction, SessionId, SessionStatus};
use crate::throughput::ThroughputTracker;
use crate::wire::{self, Envelope, ManifestEntry};

/// Decide how a received text payload should be presented. Only an
/// absolute http/https URL counts as a link.
pub fn classify_text(payload: &str) -> TextKind {
    match Url::parse(payload) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => TextKind::Link,
        _ => TextKind::PlainText,
    }
}

/// Handle one accepted connection end to end.
pub async fn handle_connection(stream: TcpStream, ctx: &TransferContext) -> Result<()> {
    stream.set_nodelay(true).ok();
    let mut reader = BufReader::new(stream);
    let res = receive_over(&mut reader, ctx).await;
    reader.into_inner().shutdown().await.ok();
    res
}

/// Protocol body over any byte stream (tests drive this directly).
pub async fn receive_over<R: AsyncRead + Unpin>(r: &mut R, ctx: &TransferContext) -> Result<()> {
    match wire::read_envelope(r).await.context("decode envelope")? {
        Envelope::Files(entries) => {
            let count = entries.len();
            let dests: Vec<Result<PathBuf>> = entries
                .iter()
                .map(|e| prepare_file_dest(ctx, &e.name))
                .collect();
            receive_batch(r, &entries, dests, ctx).await?;
            let _ = ctx.events.send(Event::FilesReceived { count });
            ctx.logger.info(&format!("{} file(s) received", count));
            Ok(())
        }
        Envelope::Folder { root, entries } => {
            let root_name = sanitize_segment(&root);
            let root_dir = ctx.save_dir.join(&root_name);
            std::fs::create_dir_all(&root_dir)
                .with_context(|| format!("create {}", root_dir.display()))?;
            let dests: Vec<Result<PathBuf>> = entries
                .iter()
                .map(|e| prepare_folder_dest(&root_dir, &e.name))
                .collect();
            receive_batch(r, &entries, dests, ctx).await?;
            let _ = ctx.events.send(Event::FolderReceived {
                root: root_name.clone(),
            });
            ctx.logger.info(&format!("folder '{}' received", root_name));
            Ok(())
        }
        Envelope::Text(payload) => {
            let kind = classify_text(&payload);
            let name = crate::sender::preview(&payload);
            let (id, _cancel) = ctx
                .store
                .create(&name, Direction::Receive, payload.len() as u64);
            ctx.store.start(id);
            let mut tracker = ThroughputTracker::new(payload.len() as u64);
            let sample = tracker.record(payload.len() as u64);
            ctx.store.progress(id, payload.len() as u64, sample);
            ctx.store.complete(id);
            ctx.logger.received("text", payload.len() as u64);
            let _ = ctx.events.send(Event::SessionFinished {
                id,
                name,
                status: SessionStatus::Complete,
            });
            let _ = ctx.events.send(Event::TextReceived { payload, kind });
            Ok(())
        }
    }
}

fn prepare_file_dest(ctx: &TransferContext, name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(&ctx.save_dir)
        .with_context(|| format!("create {}", ctx.save_dir.display()))?;
    Ok(ctx.save_dir.join(sanitize_segment(name)))
}

fn prepare_folder_dest(root_dir: &std::path::Path, rel: &str) -> Result<PathBuf> {
    let rel = sanitize_relative_path(rel)?;
    let dest = root_dir.join(rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(dest)
}

/// Stream every manifest entry, in order, into its destination.
async fn receive_batch<R: AsyncRead + Unpin>(
    r: &mut R,
    entries: &[ManifestEntry],
    dests: Vec<Result<PathBuf>>,
    ctx: &TransferContext,
) -> Result<()> {
    let sessions: Vec<_> = entries
        .iter()
        .map(|e| ctx.store.create(&e.name, Direction::Receive, e.size as u64))
        .collect();

    for (idx, ((entry, dest), (id, cancel))) in
        entries.iter().zip(dests).zip(sessions.iter()).enumerate()
    {
        if let Err(e) = receive_entry(r, entry, dest, *id, cancel, ctx).await {
            // Network failure: nothing further on this stream parses.
            for ((rid, _), rentry) in sessions[idx + 1..].iter().zip(&entries[idx + 1..]) {
                ctx.store.fail(*rid, "connection abandoned");
                finish_event(ctx, *rid, &rentry.name, SessionStatus::Failed);
            }
            return Err(e);
        }
    }
    Ok(())
}

async fn receive_entry<R: AsyncRead + Unpin>(
    r: &mut R,
    entry: &ManifestEntry,
    dest: Result<PathBuf>,
    id: SessionId,
    cancel: &Arc<AtomicBool>,
    ctx: &TransferContext,
) -> Result<()> {
    let size = entry.size as u64;
    ctx.store.start(id);

    if cancel.load(Ordering::Relaxed) {
        drain(r, size).await.context("drain cancelled entry")?;
        ctx.store.mark_cancelled(id);
        ctx.logger.cancelled(&entry.name);
        finish_event(ctx, id, &entry.name, SessionStatus::Cancelled);
        return Ok(());
    }

    let dest = match dest {
        Ok(d) => d,
        Err(e) => {
            return fail_and_drain(r, entry, size, id, ctx, &e.to_string()).await;
        }
    };
    let mut file = match tokio::fs::File::create(&dest).await {
        Ok(f) => f,
        Err(e) => {
            let msg = format!("create {}: {}", dest.display(), e);
            return fail_and_drain(r, entry, size, id, ctx, &msg).await;
        }
    };

    let mut tracker = ThroughputTracker::new(size);
    let mut buf = vec![0u8; CHUNK_SIZE];
    while tracker.bytes_moved() < size {
        let remaining = size - tracker.bytes_moved();
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = r
            .read(&mut buf[..want])
            .await
            .with_context(|| format!("receive {}", entry.name))?;
        if n == 0 {
            let msg = format!(
                "{}: connection closed {} bytes short",
                entry.name,
                size - tracker.bytes_moved()
            );
            ctx.store.fail(id, &msg);
            ctx.logger.error("receive", &msg);
            finish_event(ctx, id, &entry.name, SessionStatus::Failed);
            anyhow::bail!(msg);
        }

        if cancel.load(Ordering::Relaxed) {
            // Keep the stream aligned: the peer still sends the
            // declared bytes, we just stop keeping them.
            drop(file);
            let _ = tokio::fs::remove_file(&dest).await;
            drain(r, size - tracker.bytes_moved() - n as u64)
                .await
                .context("drain cancelled entry")?;
            ctx.store.mark_cancelled(id);
            ctx.logger.cancelled(&entry.name);
            finish_event(ctx, id, &entry.name, SessionStatus::Cancelled);
            return Ok(());
        }

        if let Err(e) = file.write_all(&buf[..n]).await {
            let msg = format!("write {}: {}", dest.display(), e);
            ctx.store.fail(id, &msg);
            ctx.logger.error("receive", &msg);
            finish_event(ctx, id, &entry.name, SessionStatus::Failed);
            drain(r, size - tracker.bytes_moved() - n as u64)
                .await
                .context("drain failed entry")?;
            return Ok(());
        }
        let sample = tracker.record(n as u64);
        ctx.store.progress(id, tracker.bytes_moved(), sample);
    }

    file.flush().await.ok();
    ctx.store.complete(id);
    ctx.logger.received(&entry.name, size);
    finish_event(ctx, id, &entry.name, SessionStatus::Complete);
    Ok(())
}

async fn fail_and_drain<R: AsyncRead + Unpin>(
    r: &mut R,
    entry: &ManifestEntry,
    size: u64,
    id: SessionId,
    ctx: &TransferContext,
    msg: &str,
) -> Result<()> {
    ctx.store.fail(id, msg);
    ctx.logger.error("receive", msg);
    finish_event(ctx, id, &entry.name, SessionStatus::Failed);
    drain(r, size).await.context("drain failed entry")?;
    Ok(())
}

/// Read and discard exactly `count` bytes.
async fn drain<R: AsyncRead + Unpin>(r: &mut R, mut count: u64) -> Result<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    while count > 0 {
        let want = count.min(CHUNK_SIZE as u64) as usize;
        let n = r.read(&mut buf[..want]).await.context("drain bytes")?;
        if n == 0 {
            anyhow::bail!("connection closed with {} bytes left to drain", count);
        }
        count -= n as u64;
    }
    Ok(())
}

fn finish_event(ctx: &TransferContext, id: SessionId, name: &str, status: SessionStatus) {
    let _ = ctx.events.send(Event::SessionFinished {
        id,
        name: name.to_string(),
        status,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_classification() {
        assert_eq!(classify_text("https://example.com"), TextKind::Link);
        assert_eq!(classify_text("http://10.0.0.5:8080/x"), TextKind::Link);
        assert_eq!(classify_text("hello world"), TextKind::PlainText);
        assert_eq!(classify_text("ftp://example.com"), TextKind::PlainText);
        assert_eq!(classify_text("example.com/no-scheme"), TextKind::PlainText);
        assert_eq!(classify_text(""), TextKind::PlainText);
    }

    #[tokio::test]
    async fn drain_discards_exact_count() {
        let data = vec![7u8; 10_000];
        let mut r = &data[..];
        drain(&mut r, 9_000).await.unwrap();
        assert_eq!(r.len(), 1_000);
    }

    #[tokio::test]
    async fn drain_fails_on_short_stream() {
        let data = vec![7u8; 100];
        let mut r = &data[..];
        assert!(drain(&mut r, 200).await.is_err());
    }
}

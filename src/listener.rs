//! TCP accept loop with bounded-concurrency admission.
//!
//! A counting semaphore caps concurrent inbound handlers: one permit
//! is acquired before each accept and travels into the spawned handler
//! task, which releases it when it finishes. When the cap is reached
//! the loop simply stops accepting, so excess connections queue in the
//! kernel backlog instead of being rejected.

use anyhow::{Context, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};

use crate::engine::TransferContext;
use crate::receiver;

pub struct TransferListener {
    listener: TcpListener,
    limiter: Arc<Semaphore>,
    ctx: TransferContext,
}

impl TransferListener {
    /// Bind the transfer port. `port` 0 picks an ephemeral port (tests).
    pub async fn bind(port: u16, capacity: usize, ctx: TransferContext) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .with_context(|| format!("bind transfer port {}", port))?;
        Ok(Self {
            listener,
            limiter: Arc::new(Semaphore::new(capacity)),
            ctx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("transfer local addr")
    }

    /// Free admission slots right now (capacity minus active handlers).
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Accept until shutdown. In-flight handlers are not aborted; they
    /// wind down through per-session cancellation.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let permit = tokio::select! {
                p = self.limiter.clone().acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };
            let (stream, peer) = tokio::select! {
                res = self.listener.accept() => match res {
                    Ok(pair) => pair,
                    Err(e) => {
                        if *shutdown.borrow() {
                            break;
                        }
                        self.ctx.logger.error("accept", &e.to_string());
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = receiver::handle_connection(stream, &ctx).await {
                    ctx.logger
                        .error("connection", &format!("{}: {:#}", peer, e));
                }
                drop(permit);
            });
        }
    }
}

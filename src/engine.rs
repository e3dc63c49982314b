//! Engine wiring: owns the long-running discovery and listener tasks
//! and exposes the operations a presentation layer consumes.

use anyhow::Result;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::discovery::{Peer, PeerDiscovery};
use crate::events::{self, EventRx, EventTx};
use crate::listener::TransferListener;
use crate::logger::Logger;
use crate::sender;
use crate::session::{SessionId, SessionStore, SessionView};

/// Everything a transfer task needs: the observable session store,
/// the notification channel, the log sink, and where received content
/// lands.
#[derive(Clone)]
pub struct TransferContext {
    pub store: SessionStore,
    pub events: EventTx,
    pub logger: Arc<dyn Logger>,
    pub save_dir: PathBuf,
}

/// The running engine. Dropping it does not stop the background
/// tasks; call [`ShareEngine::shutdown`].
pub struct ShareEngine {
    settings: Settings,
    ctx: TransferContext,
    discovery: Arc<PeerDiscovery>,
    transfer_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ShareEngine {
    /// Bind both sockets and start the discovery listen loop and the
    /// transfer accept loop. Returns the engine plus the notification
    /// stream.
    pub async fn start(settings: Settings, logger: Arc<dyn Logger>) -> Result<(Self, EventRx)> {
        let (events_tx, events_rx) = events::channel();
        let ctx = TransferContext {
            store: SessionStore::new(),
            events: events_tx,
            logger: logger.clone(),
            save_dir: settings.save_dir.clone(),
        };

        let discovery =
            Arc::new(PeerDiscovery::bind(settings.discovery_port, &settings.display_name).await?);
        let listener = TransferListener::bind(
            settings.transfer_port,
            settings.max_concurrent_transfers,
            ctx.clone(),
        )
        .await?;
        let transfer_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let disc = discovery.clone();
        let disc_shutdown = shutdown_rx.clone();
        let disc_logger = logger.clone();
        tasks.push(tokio::spawn(async move {
            disc.run(disc_shutdown, disc_logger).await;
        }));

        let listen_shutdown = shutdown_rx;
        tasks.push(tokio::spawn(async move {
            listener.run(listen_shutdown).await;
        }));

        logger.info(&format!(
            "listening on {} (discovery port {})",
            transfer_addr,
            discovery.port()
        ));

        Ok((
            Self {
                settings,
                ctx,
                discovery,
                transfer_addr,
                shutdown_tx,
                tasks,
            },
            events_rx,
        ))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Port the transfer listener actually bound (differs from the
    /// configured one when it was 0).
    pub fn transfer_addr(&self) -> SocketAddr {
        self.transfer_addr
    }

    /// Broadcast a discovery probe; responses fill [`Self::peers`].
    pub async fn probe(&self) -> Result<()> {
        self.discovery.probe().await
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.discovery.peers()
    }

    pub fn sessions(&self) -> Vec<SessionView> {
        self.ctx.store.snapshot()
    }

    /// Handle to the shared session store, for observers that outlive
    /// a borrow of the engine.
    pub fn session_store(&self) -> SessionStore {
        self.ctx.store.clone()
    }

    /// Request cancellation of one session. Returns false if it is
    /// already terminal or unknown.
    pub fn cancel(&self, id: SessionId) -> bool {
        self.ctx.store.request_cancel(id)
    }

    /// Drop finished sessions from the visible list.
    pub fn clear_finished(&self) {
        self.ctx.store.clear_finished()
    }

    /// Send files or one folder to a peer, as a background task.
    pub fn begin_send(&self, target: IpAddr, paths: Vec<PathBuf>) -> JoinHandle<Result<()>> {
        let addr = SocketAddr::new(target, self.settings.transfer_port);
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let res = sender::send_paths(addr, &paths, &ctx).await;
            if let Err(e) = &res {
                ctx.logger.error("send", &format!("{:#}", e));
            }
            res
        })
    }

    /// Send a text or URL payload to a peer, as a background task.
    pub fn begin_send_text(&self, target: IpAddr, text: String) -> JoinHandle<Result<()>> {
        let addr = SocketAddr::new(target, self.settings.transfer_port);
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let res = sender::send_text(addr, &text, &ctx).await;
            if let Err(e) = &res {
                ctx.logger.error("send-text", &format!("{:#}", e));
            }
            res
        })
    }

    /// Signal both listen loops to stop and wait for them. In-flight
    /// transfer handlers are left to finish on their own.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for t in self.tasks {
            let _ = t.await;
        }
    }
}

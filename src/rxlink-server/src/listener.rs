// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Line-protocol TCP listener for rxlink-server.
//!
//! Accepts control connections and runs one [`ControlSession`] task per
//! client.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, warn};

use crate::session::{ControlSession, SessionContext};

/// Pause after a failed accept; fd exhaustion clears only once sessions end.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of control connections.
pub trait Accept: Send {
    fn accept(&mut self) -> impl Future<Output = std::io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&mut self) -> impl Future<Output = std::io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

pub struct ControlServer<A = TcpListener> {
    acceptor: A,
    ctx: Arc<SessionContext>,
}

impl ControlServer {
    pub async fn bind(addr: SocketAddr, ctx: Arc<SessionContext>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self::new(listener, ctx))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }
}

impl<A: Accept> ControlServer<A> {
    pub fn new(acceptor: A, ctx: Arc<SessionContext>) -> Self {
        Self { acceptor, ctx }
    }

    /// Accept clients until shutdown is signalled. Accept errors are logged
    /// and retried.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        loop {
            tokio::select! {
                accepted = self.acceptor.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    let session = ControlSession::new(Arc::clone(&self.ctx), peer);
                    info!("[{}] Client connected: {}", session.id(), peer);

                    let session_shutdown_rx = shutdown_rx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session.run(socket, session_shutdown_rx).await {
                            error!("Client {} error: {:?}", peer, e);
                        }
                    });
                }
                changed = shutdown_rx.changed() => {
                    match changed {
                        Ok(()) if *shutdown_rx.borrow() => break,
                        Ok(()) => {}
                        Err(_) => break,
                    }
                }
            }
        }
        info!("Listener stopped");
        Ok(())
    }
}

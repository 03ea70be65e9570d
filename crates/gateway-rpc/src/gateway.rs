use std::{
    net::SocketAddr,
    sync::Arc,
};

use futures::future::join_all;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::server::RpcServer;

/// Set of assembled servers bound to their listeners.
#[derive(Debug, Default)]
pub struct Gateway {
    servers: Vec<(Arc<RpcServer>, TcpListener)>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, server: RpcServer, listener: TcpListener) {
        self.servers.push((Arc::new(server), listener));
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Server names and the addresses they listen on.
    pub fn local_addrs(&self) -> Vec<(&'static str, SocketAddr)> {
        self.servers
            .iter()
            .filter_map(|(server, listener)| {
                listener
                    .local_addr()
                    .ok()
                    .map(|addr| (server.name(), addr))
            })
            .collect()
    }

    /// Runs every server until `cancel_token` is cancelled.
    pub async fn run(self, cancel_token: CancellationToken) {
        let servers = self
            .servers
            .into_iter()
            .map(|(server, listener)| server.serve(listener, cancel_token.clone()));
        join_all(servers).await;
        tracing::info!("All RPC servers stopped");
    }
}

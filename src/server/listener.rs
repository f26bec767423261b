use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::http::connection::Connection;

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.listen_addr))?;
    info!("Listening on {}", cfg.server.listen_addr);

    let gateway = Arc::new(Gateway::from_config(cfg));
    for route in gateway.router().routes() {
        info!(
            route = route.kind.name(),
            prefix = %route.prefix,
            upstream = %route.upstream,
            "Route registered"
        );
    }

    serve(listener, gateway).await
}

/// Accept connections on an already bound listener until an accept fails.
pub async fn serve(listener: TcpListener, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, peer, gateway);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}

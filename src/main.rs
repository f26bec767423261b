use agent_gateway::config::Config;
use agent_gateway::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    tracing::info!(
        backend = %cfg.upstreams.backend_host,
        agents = %cfg.upstreams.agents_proxy,
        timeout_secs = cfg.forwarding.timeout_secs,
        "Configuration loaded"
    );

    tokio::select! {
        res = server::listener::run(&cfg) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

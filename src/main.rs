use anyhow::Context;
use clap::Parser;
use relayboard::{config::Config, connection::handler::Proxy, relay::registry::SessionRegistry, server::Server};
use tokio::{runtime, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_level);

    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("[runtime] build")?;

    rt.block_on(app(config))
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn app(config: Config) -> anyhow::Result<()> {
    let registry = SessionRegistry::new(config.policy())
        .with_capacity(config.max_sessions())
        .with_write_timeout(config.write_timeout());

    let handler = Proxy::new(registry)
        .with_limits(config.max_line_length(), config.read_timeout());

    let server = Server::new(handler, config.certificate());
    let (addr, task) = match server.bind(config.addr.as_str()).await {
        Ok(v) => v,
        Err(e) => {
            error!(addr = %config.addr, "[server] bind: {}", e);
            return Err(e).with_context(|| format!("cannot listen on {}", config.addr));
        }
    };

    info!(addr = %addr, policy = ?config.policy(), "[server] relay ready");

    tokio::select! {
        joined = task => {
            joined.context("[server] accept task")?.context("[server] accept loop")?;
        }
        _ = signal::ctrl_c() => {
            info!("[server] shutdown");
        }
    }
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use telemetry_relay::{
    cli::{Cli, Command, ServeArgs},
    config::RelayConfig,
    mock,
    server::{RelayServer, ViewerServer},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Mock(args) => mock::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind relay to {}", args.listen))?;
    let relay = RelayServer::new(listener, RelayConfig::from(&args));
    let addr = relay.local_addr()?;
    info!("relay listening on {}", addr);

    let Some(root) = args.static_dir else {
        return run_relay(relay).await;
    };

    let listener = TcpListener::bind(args.static_listen)
        .await
        .with_context(|| format!("failed to bind viewer server to {}", args.static_listen))?;
    let viewer = ViewerServer::new(listener, root)?;
    info!("viewer available at http://{}", viewer.local_addr()?);

    tokio::try_join!(run_relay(relay), viewer.run_until_ctrl_c())?;
    Ok(())
}

async fn run_relay(relay: RelayServer) -> Result<()> {
    if let Err(err) = relay.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

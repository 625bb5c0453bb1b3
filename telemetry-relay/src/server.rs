use std::{future::Future, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{config::RelayConfig, connection, hub::Hub};

/// WebSocket relay bound to a listener. Every upgraded socket on `/ws` is
/// handed to [`connection::serve`] with a shared [`Hub`].
pub struct RelayServer {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl RelayServer {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            hub: Arc::new(Hub::new(config)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let RelayServer { listener, hub } = self;
        let app = router(hub).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("relay shutting down");
            })
            .await
            .context("relay server failed")
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(ctrl_c()).await
    }
}

pub fn router(hub: Arc<Hub>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(hub)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::serve(socket, Some(peer), hub))
}

/// Plain HTTP server for the viewer page, on its own port.
pub struct ViewerServer {
    listener: TcpListener,
    root: PathBuf,
}

impl ViewerServer {
    pub fn new(listener: TcpListener, root: PathBuf) -> Result<Self> {
        anyhow::ensure!(
            root.is_dir(),
            "static directory {} does not exist",
            root.display()
        );
        Ok(Self { listener, root })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = Router::new()
            .fallback_service(ServeDir::new(&self.root))
            .layer(TraceLayer::new_for_http());

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("viewer server failed")
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(ctrl_c()).await
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}

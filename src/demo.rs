//! Demo-only HTTP trigger surface.
//!
//! `GET /trigger/seizure` and `GET /trigger/faint` inject the matching demo
//! window into the classification input, exactly as if the headset had
//! produced it. Not meant for production deployments.

use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Router,
};
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::classify::{DEMO_FAINT, DEMO_SEIZURE};

/// Default port of the demo interface.
pub const DEFAULT_DEMO_PORT: u16 = 3000;

/// Build the trigger router; windows are sent on `triggers`.
pub fn router(triggers: mpsc::Sender<Vec<i8>>) -> Router {
    Router::new()
        .route("/trigger/:kind", get(trigger))
        .with_state(triggers)
}

async fn trigger(
    State(triggers): State<mpsc::Sender<Vec<i8>>>,
    Path(kind): Path<String>,
) -> (StatusCode, String) {
    let window = match kind.as_str() {
        "seizure" => DEMO_SEIZURE.to_vec(),
        "faint" => DEMO_FAINT.to_vec(),
        _ => return (StatusCode::NOT_FOUND, format!("unknown trigger {kind}\n")),
    };
    if triggers.send(window).await.is_err() {
        warn!("demo trigger {kind}: pipeline is not listening");
        return (StatusCode::SERVICE_UNAVAILABLE, "pipeline stopped\n".into());
    }
    (StatusCode::OK, format!("triggered {kind}\n"))
}

/// Serve the demo interface until `shutdown` fires.
pub async fn serve(
    port: u16,
    triggers: mpsc::Sender<Vec<i8>>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("demo http interface listening on {}", listener.local_addr()?);
    axum::serve(listener, router(triggers))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

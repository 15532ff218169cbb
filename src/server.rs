use std::{net::SocketAddr, sync::Arc};

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, get_service},
    Extension, Router,
};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{config::Config, error::Error, gateway::Gateway, serial::Connector, websocket};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 3000;

async fn run(
    config: Config,
    connector: Arc<dyn Connector>,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    config.validate()?;

    let gateway = Gateway::new(connector, &config.channels);

    let mut app = Router::new()
        .route("/client", get(websocket::ws_handler))
        .route("/config", get(show_config))
        .route("/version", get(show_version));

    if let Some(static_dir) = &config.static_dir {
        info!(?static_dir, "Serving static files");

        app = app.fallback(get_service(ServeDir::new(static_dir)).handle_error(
            |e: std::io::Error| async move {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Unhandled internal error: {e}"),
                )
            },
        ));
    }

    let app = app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            // Each websocket needs to be able to reach the gateway
            .layer(Extension(gateway))
            // The config should be known to the web server
            .layer(Extension(config)),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Io(format!("Could not bind to {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody wanted to know the allocated port");
        }
    }

    info!("listening on {}", addr);

    server.await.map_err(|e| Error::Io(e.to_string()))
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(
    config: Config,
    connector: Arc<dyn Connector>,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error> {
    run(config, connector, None, Some(allocated_port)).await
}

/// Start the server on the given port.
pub async fn run_on_port(
    config: Config,
    connector: Arc<dyn Connector>,
    port: u16,
) -> Result<(), Error> {
    run(config, connector, Some(port), None).await
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    config.serialize_pretty()
}

async fn show_version() -> impl IntoResponse {
    format!("Serial Bridge v{}\n", env!("CARGO_PKG_VERSION"))
}

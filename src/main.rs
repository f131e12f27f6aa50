use std::net::SocketAddr;
use std::time::Duration;

use aqrar_exam_backend::{
    config::{get_config, init_config},
    database::pool::{create_pool, run_migrations},
    routes, AppState,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=info")),
        )
        .init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    run_migrations(&pool).await?;

    let app_state = AppState::new(pool)?;

    {
        let outbox = app_state.outbox_service.clone();
        let idle = Duration::from_millis(config.outbox_poll_ms);
        tokio::spawn(async move {
            loop {
                match outbox.run_once().await {
                    Ok(true) => {}
                    Ok(false) => tokio::time::sleep(idle).await,
                    Err(e) => {
                        tracing::error!(error = ?e, "outbox worker error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    let app = routes::router(app_state, config.public_rps, config.admin_rps)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

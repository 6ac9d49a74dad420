use std::sync::Arc;

use foodcache_core::{FoodCache, Settings};
use foodcache_web::{AppState, router, shutdown};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load()?;
    tracing::debug!(?settings, "resolved settings");
    if settings.service_api_key.is_none() {
        tracing::warn!("CACHE_SERVICE_API_KEY is not set; refresh and bulk routes are open");
    }

    let addr = settings.bind_addr;
    let cache = FoodCache::from_settings(settings)?;
    let app = router(Arc::new(AppState::new(cache)));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

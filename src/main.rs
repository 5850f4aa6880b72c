use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{trace::TraceLayer, cors::{Any, CorsLayer}};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod course_key;
mod db;
mod eligibility;
mod error;
mod ledger;
#[cfg(test)]
mod memory;
mod models;
mod pg;
mod provider;
mod routes;
mod signature;

use crate::{
    api::CreditApi, config::Config, ledger::Ledger, pg::PgStore, provider::ProviderDirectory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "credit_gateway=info,axum=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let pool = db::connect(&config.database_url, config.max_connections).await?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let api = CreditApi::new(
        ProviderDirectory::new(store.clone(), config.secret_keys.clone()),
        store.clone(),
        store.clone(),
        Ledger::new(store),
    );
    let state = routes::AppState { api, timestamp_expiration: config.timestamp_expiration };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;
    Ok(())
}

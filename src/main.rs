use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{http::Method, Extension};
use campus_event_hub::{auth::AuthKeys, config::Config, connect_to_db, sweeper, AppContext};
use envconfig::Envconfig;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("campus_event_hub=info,tower_http=info")),
        )
        .init();

    let config = Config::init_from_env().context("invalid configuration")?;
    let keys = AuthKeys::from_base64_secret(&config.jwt_secret)
        .context("JWT_SECRET must be valid base64")?;

    let ctx = Arc::new(AppContext::from_config(&config)?);
    if let Some(mailer) = &ctx.mailer {
        if let Err(e) = mailer.sanity_check().await {
            tracing::warn!(error = %e, "email sanity check failed, notices will not be delivered");
        }
    }

    let pool = connect_to_db(&config.db_url)?;
    sweeper::spawn(
        pool.clone(),
        ctx.clone(),
        Duration::from_secs(config.sweep_interval_secs.max(1)),
    );

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_origin(Any);
    let app = campus_event_hub::app(&config.static_dir)
        .layer(Extension(pool))
        .layer(Extension(ctx))
        .layer(Extension(Arc::new(keys)))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

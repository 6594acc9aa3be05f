use std::io;

use axum::{
    http::StatusCode,
    routing::{get, get_service},
    Json, Router,
};
use deadpool::managed::Pool;
use diesel_async::{pooled_connection::AsyncDieselConnectionManager, AsyncPgConnection};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::services::ServeDir;

pub mod api;
pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod leaderboard;
pub mod models;
pub mod payments;
pub mod rules;
pub mod schema;
pub mod sweeper;
pub mod vision;
pub mod waitlist;

#[cfg(test)]
pub(crate) mod test_support;

use config::Config;
use email::Mailer;
use payments::Razorpay;
use rules::Policy;
use vision::Ollama;

pub type DbPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

pub fn connect_to_db(db_url: &str) -> anyhow::Result<DbPool> {
    let db_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    Pool::builder(db_config)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build database pool: {e}"))
}

/// Everything handlers share besides the pool and the auth keys.
pub struct AppContext {
    pub policy: Policy,
    pub mailer: Option<Mailer>,
    pub payments: Option<Razorpay>,
    pub vision: Ollama,
    /// Serialises seat allocation so capacity checks and writes cannot interleave.
    pub desk: Mutex<()>,
}

impl AppContext {
    pub fn new(policy: Policy, vision: Ollama) -> AppContext {
        AppContext {
            policy,
            mailer: None,
            payments: None,
            vision,
            desk: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<AppContext> {
        let vision = Ollama::new(&config.ollama_host, &config.ollama_model)?;
        let mut ctx = AppContext::new(config.policy()?, vision);

        match config.razorpay_credentials() {
            Some((id, secret)) => {
                ctx.payments = Some(Razorpay::new(&config.razorpay_base_url, id, secret)?)
            }
            None => tracing::warn!("razorpay keys not set, paid registrations will be refused"),
        }

        match config.email_credentials() {
            Some((user, password)) => {
                ctx.mailer = Some(Mailer::new(&config.smtp_relay, user, password)?)
            }
            None => tracing::warn!("email credentials not set, notices will not be sent"),
        }

        Ok(ctx)
    }
}

pub fn app(static_dir: &str) -> Router {
    let serve = get_service(ServeDir::new(static_dir)).handle_error(handle_error);
    Router::new()
        .route("/", get(index))
        .nest("/api", api::app())
        .nest("/assets", serve)
}

async fn index() -> Json<Value> {
    Json(json!({ "response": "Hello world" }))
}

async fn handle_error(_: io::Error) -> error::AppError {
    error::AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch asset")
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

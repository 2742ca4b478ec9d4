//! Demo host for the pay router

use std::sync::Arc;

use anyhow::Context;
use axum::{response::Html, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paymount_api::{pay_router, AppState, Config, RequireSubscription};
use paymount_billing::{BillingConfig, BillingService, PgBillingStore};
use paymount_shared::{create_pool, run_migrations};

async fn premium_api(RequireSubscription(access): RequireSubscription) -> Json<Value> {
    Json(json!({
        "user_id": access.user_id,
        "subscription_id": access.subscription.processor_subscription_id,
        "status": access.subscription.status,
    }))
}

async fn premium_page(RequireSubscription(access): RequireSubscription) -> Html<String> {
    Html(format!(
        "<html><body><h1>Premium</h1><p>Welcome, user {}.</p></body></html>",
        access.user_id
    ))
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "paymount_api=debug,paymount_billing=debug,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_json);

    let billing_config = BillingConfig::from_env();
    if billing_config.is_dev_mode() {
        tracing::warn!("STRIPE_SECRET_KEY not set; billing running in DEV mode");
    }

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let billing = BillingService::new(billing_config, Arc::new(PgBillingStore::new(pool)));
    let state = AppState::new(billing, config.app_name.clone());

    let app = Router::new()
        .route("/api/premium", get(premium_api))
        .route("/premium", get(premium_page))
        .with_state(state.clone())
        .merge(pay_router(state));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;

    tracing::info!(address = %config.bind_address, "Paymount listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

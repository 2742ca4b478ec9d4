//! Pay routes

pub mod billing;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::state::AppState;

/// Paths the pay router mounts besides the configurable ones
pub const CHECKOUT_PATH: &str = "/pay/checkout";
pub const PORTAL_PATH: &str = "/pay/portal";
pub const CONFIG_PATH: &str = "/pay/config";
pub const PORTAL_DEV_PATH: &str = "/pay/portal-dev";

/// Create the pay router, ready to merge into a host application
pub fn pay_router(state: AppState) -> Router {
    let pay = state.billing.config().pay.clone();

    let mut router = Router::new()
        .route(CHECKOUT_PATH, post(billing::create_checkout))
        .route(PORTAL_PATH, post(billing::create_portal_session))
        .route(CONFIG_PATH, get(billing::public_config))
        .route(&pay.webhook_path, post(billing::webhook))
        .route(&pay.success_path, get(billing::success_page))
        .route(&pay.cancel_path, get(billing::cancel_page));

    if state.billing.config().is_dev_mode() {
        router = router.route(PORTAL_DEV_PATH, get(billing::portal_dev_page));
    }

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

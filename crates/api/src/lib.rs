#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Paymount API Library
//!
//! axum integration for the billing add-on: the pay router, the
//! subscription gate extractor and error mapping.

pub mod config;
pub mod error;
pub mod gate;
pub mod pages;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use gate::{resolve_user_id, GateRejection, RequireSubscription, UserId};
pub use pages::{BuiltinPages, PageRenderer};
pub use routes::pay_router;
pub use state::AppState;

//! Subscription gate for host routes
//!
//! Add [`RequireSubscription`] to a handler's arguments and the handler only
//! runs for users holding a qualifying subscription.

use std::collections::HashMap;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, OriginalUri, Query},
    http::{header, request::Parts, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use paymount_billing::{BillingError, GrantedAccess, UserIdSource};
use serde_json::json;

use crate::{error::ApiError, state::AppState};

/// Where denied browser requests are sent
pub const CHECKOUT_REDIRECT: &str = "/pay/checkout";

/// A user id the host has already authenticated. Insert it into request
/// extensions (e.g. from auth middleware) and it takes precedence over every
/// configured [`UserIdSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i64);

fn query_value(parts: &Parts, name: &str) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri).ok()?;
    params.get(name).cloned()
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}

fn source_value(parts: &Parts, source: &UserIdSource) -> Option<String> {
    match source {
        UserIdSource::Query(name) => query_value(parts, name),
        UserIdSource::Header(name) => header_value(parts, name),
        UserIdSource::Cookie(name) => cookie_value(parts, name),
    }
}

/// Resolve the requesting user.
///
/// The first source carrying a non-empty value decides: it is parsed as an
/// integer and, if malformed, the user is unresolved. Later sources are not
/// consulted.
pub fn resolve_user_id(parts: &Parts, sources: &[UserIdSource]) -> Option<i64> {
    if let Some(UserId(id)) = parts.extensions.get::<UserId>() {
        return Some(*id);
    }

    let raw = sources
        .iter()
        .filter_map(|source| source_value(parts, source))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())?;

    match raw.parse::<i64>() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::debug!(value = %raw, "Ignoring malformed user id");
            None
        }
    }
}

fn is_api_path(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    !prefix.is_empty()
        && (path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/')))
}

/// Extractor that admits only subscribed users
#[derive(Debug, Clone)]
pub struct RequireSubscription(pub GrantedAccess);

/// Why [`RequireSubscription`] refused a request
#[derive(Debug)]
pub enum GateRejection {
    /// No qualifying subscription; rendered as JSON for API paths
    PaymentRequired { api: bool },
    Failed(ApiError),
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::PaymentRequired { api: true } => (
                StatusCode::FORBIDDEN,
                Json(json!({ "detail": "Subscription required" })),
            )
                .into_response(),
            GateRejection::PaymentRequired { api: false } => (
                StatusCode::FORBIDDEN,
                Html(format!(
                    "<html><body><script>window.location.href=\"{CHECKOUT_REDIRECT}\";</script><p>Redirecting to checkout...</p></body></html>"
                )),
            )
                .into_response(),
            GateRejection::Failed(err) => err.into_response(),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequireSubscription
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let config = state.billing.config();

        let user_id = resolve_user_id(parts, &config.pay.identity_sources);

        match state.billing.access.authorize(user_id).await {
            Ok(access) => Ok(RequireSubscription(access)),
            Err(BillingError::PaymentRequired) => {
                let path = parts
                    .extensions
                    .get::<OriginalUri>()
                    .map(|uri| uri.0.path().to_string())
                    .unwrap_or_else(|| parts.uri.path().to_string());
                Err(GateRejection::PaymentRequired {
                    api: is_api_path(&path, &config.pay.api_prefix),
                })
            }
            Err(err) => Err(GateRejection::Failed(err.into())),
        }
    }
}

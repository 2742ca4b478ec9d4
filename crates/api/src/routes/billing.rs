//! Pay routes: checkout, portal, webhook and return pages

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Html,
    Json,
};
use paymount_billing::CheckoutRequest;
use paymount_shared::CheckoutMode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Header carrying the processor signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// A user id sent either as a JSON number or a numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserIdField {
    Number(i64),
    Text(String),
}

impl UserIdField {
    /// `Ok(None)` for an empty string
    fn resolve(&self) -> ApiResult<Option<i64>> {
        match self {
            UserIdField::Number(id) => Ok(Some(*id)),
            UserIdField::Text(raw) if raw.trim().is_empty() => Ok(None),
            UserIdField::Text(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ApiError::Validation("user_id must be an integer".to_string())),
        }
    }
}

fn resolve_user_id(field: &Option<UserIdField>) -> ApiResult<Option<i64>> {
    match field {
        Some(field) => field.resolve(),
        None => Ok(None),
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body)
        .map_err(|e| ApiError::Validation(format!("invalid JSON body: {}", e)))
}

/// Request to create a checkout session
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub user_id: Option<UserIdField>,
    pub email: Option<String>,
    pub price_id: Option<String>,
    /// `payment` or `subscription`
    pub mode: Option<String>,
    /// Extra metadata forwarded to the processor; non-string values are stringified
    pub metadata: Option<HashMap<String, Value>>,
}

/// Response carrying a redirect URL
#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

/// Create a checkout session
pub async fn create_checkout(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<Json<UrlResponse>> {
    let req: CreateCheckoutRequest = parse_body(&body)?;

    let mode = match req.mode.as_deref().map(str::trim) {
        None | Some("") => CheckoutMode::default(),
        Some(raw) => raw
            .parse::<CheckoutMode>()
            .map_err(|_| ApiError::Validation(format!("invalid mode: {}", raw)))?,
    };

    let metadata = req.metadata.map(|metadata| {
        metadata
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect()
    });

    let url = state
        .billing
        .checkout
        .create_checkout(CheckoutRequest {
            user_id: resolve_user_id(&req.user_id)?,
            email: req.email,
            price_id: req.price_id,
            mode,
            metadata,
        })
        .await?;

    Ok(Json(UrlResponse { url }))
}

/// Request to create a portal session
#[derive(Debug, Deserialize)]
pub struct CreatePortalRequest {
    pub user_id: Option<UserIdField>,
    pub return_url: Option<String>,
}

/// Create a billing portal session
pub async fn create_portal_session(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<Json<UrlResponse>> {
    let req: CreatePortalRequest = parse_body(&body)?;

    let user_id = resolve_user_id(&req.user_id)?
        .ok_or_else(|| ApiError::Validation("user_id is required".to_string()))?;

    let url = state
        .billing
        .portal
        .create_portal(user_id, req.return_url.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound("No billing customer for this user".to_string()))?;

    Ok(Json(UrlResponse { url }))
}

/// Webhook acknowledgement
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}

/// Handle Stripe webhook events
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<WebhookResponse>> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.billing.webhooks.handle(&body, signature).await?;

    tracing::debug!(outcome = ?outcome, "Stripe webhook processed");

    Ok(Json(WebhookResponse { received: true }))
}

/// Client-side processor configuration
#[derive(Debug, Serialize)]
pub struct PublicConfigResponse {
    pub publishable_key: String,
}

pub async fn public_config(State(state): State<AppState>) -> Json<PublicConfigResponse> {
    Json(PublicConfigResponse {
        publishable_key: state
            .billing
            .config()
            .publishable_key()
            .unwrap_or_default()
            .to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    pub session_id: Option<String>,
}

pub async fn success_page(
    State(state): State<AppState>,
    Query(query): Query<SuccessQuery>,
) -> Html<String> {
    Html(
        state
            .pages
            .success(&state.app_name, query.session_id.as_deref()),
    )
}

pub async fn cancel_page(State(state): State<AppState>) -> Html<String> {
    Html(state.pages.cancel(&state.app_name))
}

#[derive(Debug, Deserialize)]
pub struct PortalDevQuery {
    pub customer: Option<String>,
}

/// Dev-mode stand-in for the processor portal
pub async fn portal_dev_page(
    State(state): State<AppState>,
    Query(query): Query<PortalDevQuery>,
) -> Html<String> {
    Html(
        state
            .pages
            .portal_dev(&state.app_name, query.customer.as_deref().unwrap_or("")),
    )
}

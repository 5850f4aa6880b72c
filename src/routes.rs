use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use http::StatusCode;
use serde_json::{json, Map, Value};

use crate::{
    api::CreditApi,
    course_key::CourseKey,
    error::CreditError,
    models::*,
    signature,
};

#[derive(Clone)]
pub struct AppState {
    pub api: CreditApi,
    pub timestamp_expiration: i64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/credit/v1/providers", get(list_providers))
        .route("/api/credit/v1/providers/:provider_id/request", post(create_request))
        .route("/api/credit/v1/providers/:provider_id/callback", post(provider_callback))
        .route("/api/credit/v1/requests/:username", get(requests_for_user))
        .route("/api/credit/v1/requests/:username/:course_key", get(request_status))
        .with_state(state)
}

async fn list_providers(
    State(st): State<AppState>,
) -> Result<Json<Vec<ProviderSummary>>, (StatusCode, String)> {
    let providers = st.api.get_credit_providers().await.map_err(credit_err)?;
    Ok(Json(providers))
}

async fn create_request(
    State(st): State<AppState>,
    Path(provider_id): Path<String>,
    Json(req): Json<CreateCreditRequestReq>,
) -> Result<Json<RequestDescriptor>, (StatusCode, String)> {
    let descriptor = st
        .api
        .create_credit_request(&req.course_key, &provider_id, &req.username)
        .await
        .map_err(credit_err)?;
    Ok(Json(descriptor))
}

// Authenticates the provider, then hands the decision to the ledger.
async fn provider_callback(
    State(st): State<AppState>,
    Path(provider_id): Path<String>,
    Json(req): Json<CreditCallbackReq>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let secret = st.api.provider_secret(&provider_id).await.map_err(credit_err)?;

    let mut signed = Map::new();
    signed.insert("request_uuid".into(), Value::from(req.request_uuid.clone()));
    signed.insert("status".into(), Value::from(req.status.clone()));
    signed.insert("timestamp".into(), Value::from(req.timestamp));
    if !signature::verify(&signed, &secret, &req.signature) {
        tracing::warn!(
            provider_id = %provider_id,
            request_uuid = %req.request_uuid,
            "callback signature did not verify"
        );
        return Err(e403("invalid signature"));
    }

    if !timestamp_is_fresh(Utc::now().timestamp(), req.timestamp, st.timestamp_expiration) {
        tracing::warn!(
            provider_id = %provider_id,
            request_uuid = %req.request_uuid,
            timestamp = req.timestamp,
            "callback timestamp outside the accepted window"
        );
        return Err(e403("timestamp expired"));
    }

    st.api
        .update_credit_request_status(&req.request_uuid, &provider_id, &req.status)
        .await
        .map_err(credit_err)?;
    Ok(Json(json!({ "ok": true })))
}

async fn requests_for_user(
    State(st): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<CreditRequestSummary>>, (StatusCode, String)> {
    let requests = st.api.get_credit_requests_for_user(&username).await.map_err(credit_err)?;
    Ok(Json(requests))
}

async fn request_status(
    State(st): State<AppState>,
    Path((username, course_key)): Path<(String, String)>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let course_key: CourseKey = course_key.parse().map_err(credit_err)?;
    let status = st
        .api
        .get_credit_request_status(&username, &course_key)
        .await
        .map_err(credit_err)?;
    // no request renders as an empty object
    let body = match status {
        Some(summary) => serde_json::to_value(summary).map_err(e500)?,
        None => json!({}),
    };
    Ok(Json(body))
}

// --- helpers ---

/// Past or future, the timestamp must lie within `expiration` seconds of `now`.
fn timestamp_is_fresh(now: i64, timestamp: i64, expiration: i64) -> bool {
    match now.checked_sub(timestamp) {
        Some(age) => age.checked_abs().is_some_and(|age| age <= expiration),
        None => false,
    }
}

fn credit_err(e: CreditError) -> (StatusCode, String) {
    let code = match &e {
        CreditError::NotEligible => StatusCode::FORBIDDEN,
        CreditError::ProviderNotConfigured(_) => StatusCode::BAD_REQUEST,
        CreditError::RequestAlreadyCompleted => StatusCode::CONFLICT,
        CreditError::RequestNotFound(_) => StatusCode::NOT_FOUND,
        CreditError::InvalidStatus(_) | CreditError::InvalidCourseKey(_) => {
            StatusCode::BAD_REQUEST
        }
        CreditError::Storage(_) => return e500(&e),
    };
    (code, e.to_string())
}

fn e403<T: Into<String>>(msg: T) -> (StatusCode, String) {
    (StatusCode::FORBIDDEN, msg.into())
}

fn e500<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    tracing::error!(error=%e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

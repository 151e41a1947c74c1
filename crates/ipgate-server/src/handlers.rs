use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tracing::{debug, error};

use crate::{error::ApiError, notify::Alert, AppState};

// ── Validated JSON ────────────────────────────────────────────────────────────

pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// `Json<T>` that rejects malformed bodies and failed validation with 400.
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| {
                debug!(error = %e.body_text(), "rejected request body");
                ApiError::BadRequest(format!("Invalid request body: {}", e.body_text()))
            })?;
        body.validate().map_err(|msg| {
            debug!(%msg, "request body failed validation");
            ApiError::BadRequest(msg)
        })?;
        Ok(Self(body))
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len == 0 || len > max {
        return Err(format!("{field} must be 1–{max} characters"));
    }
    Ok(())
}

// ── Allowlist ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IpRequest {
    pub ip: String,
}

impl Validate for IpRequest {
    fn validate(&self) -> Result<(), String> {
        check_len("ip", &self.ip, 255)
    }
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub old_ip: String,
    pub new_ip: String,
}

impl Validate for EditRequest {
    fn validate(&self) -> Result<(), String> {
        check_len("old_ip", &self.old_ip, 255)?;
        check_len("new_ip", &self.new_ip, 255)
    }
}

pub async fn create_ip(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<IpRequest>,
) -> Result<Response, ApiError> {
    let entry = state
        .service
        .create(&body.ip)
        .await
        .map_err(|e| ApiError::from_allowlist(e, "Failed to add IP"))?;

    Ok(Json(json!({
        "message": "IP added successfully",
        "ip": entry,
    }))
    .into_response())
}

pub async fn list_ips(State(state): State<AppState>) -> Response {
    let entries = state.service.list().await;
    debug!(count = entries.len(), "audit: allowlist.list");
    Json(json!({ "allowed_ips": entries })).into_response()
}

pub async fn edit_ip(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<EditRequest>,
) -> Result<Response, ApiError> {
    let entries = state
        .service
        .edit(&body.old_ip, &body.new_ip)
        .await
        .map_err(|e| ApiError::from_allowlist(e, "Failed to edit IP"))?;

    Ok(Json(json!({
        "success": true,
        "message": "IP updated successfully",
        "allowed_ips": entries,
    }))
    .into_response())
}

pub async fn delete_ip(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<IpRequest>,
) -> Result<Response, ApiError> {
    state
        .service
        .delete(&body.ip)
        .await
        .map_err(|e| ApiError::from_allowlist(e, "Failed to delete IP"))?;

    Ok(Json(json!({
        "success": true,
        "message": "IP deleted",
    }))
    .into_response())
}

// ── Notifications ─────────────────────────────────────────────────────────────

impl Validate for Alert {
    fn validate(&self) -> Result<(), String> {
        check_len("nome_empresa", &self.nome_empresa, 200)?;
        check_len("client_name", &self.client_name, 255)?;
        check_len("number_client", &self.number_client, 255)?;
        check_len("msg", &self.msg, 2000)?;
        if let Some(url) = &self.url_opa {
            check_len("url_opa", url, 255)?;
        }
        Ok(())
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    ValidatedJson(alert): ValidatedJson<Alert>,
) -> Result<Response, ApiError> {
    if let Err(e) = state.notifier.send(&alert).await {
        error!(error = %e, company = %alert.nome_empresa, "error sending message");
        return Err(ApiError::Internal("Error sending message"));
    }

    Ok(Json(json!({ "message": "Message sent successfully" })).into_response())
}

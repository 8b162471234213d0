//! Device registration handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use passforge_core::freshness::format_update_tag;
use passforge_core::{DeviceRegistration, PassCredentials, RegistrationOutcome};
use serde::{Deserialize, Serialize};

use crate::auth::{authorize, authorize_registration, PassAuthToken};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub push_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialsQuery {
    pub passes_updated_since: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialsResponse {
    pub serial_numbers: Vec<String>,
    pub last_updated: String,
}

const MAX_PUSH_TOKEN_LEN: usize = 200;

/// Push tokens end up in the gateway URL path, so only plain alphanumerics
/// are accepted.
fn is_valid_push_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_PUSH_TOKEN_LEN
        && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// `POST /v1/devices/{device}/registrations/{passType}/{serial}`
///
/// 201 for a new registration, 200 when the device was already registered
/// (the push token is refreshed). 404 when the serial number is unknown.
pub async fn register(
    State(state): State<AppState>,
    Path((device, pass_type, serial)): Path<(String, String, String)>,
    PassAuthToken(token): PassAuthToken,
    Json(req): Json<RegisterRequest>,
) -> Result<StatusCode, ApiError> {
    if req.push_token.trim().is_empty() {
        return Err(ApiError::BadRequest("pushToken is required".to_string()));
    }
    if !is_valid_push_token(&req.push_token) {
        return Err(ApiError::BadRequest("pushToken is malformed".to_string()));
    }

    let outcome = state
        .blocking(move |state| {
            authorize_registration(&state, PassCredentials::new(&serial, &token, &pass_type))?;
            let outcome = state.registry.register(
                state.deadline(),
                &DeviceRegistration {
                    device_id: device.clone(),
                    push_token: req.push_token,
                    serial_number: serial.clone(),
                    type_identifier: pass_type,
                },
            )?;
            tracing::info!(device = %device, serial = %serial, ?outcome, "Device registration");
            Ok(outcome)
        })
        .await?;

    Ok(match outcome {
        RegistrationOutcome::Created => StatusCode::CREATED,
        RegistrationOutcome::AlreadyRegistered => StatusCode::OK,
    })
}

/// `DELETE /v1/devices/{device}/registrations/{passType}/{serial}`
pub async fn unregister(
    State(state): State<AppState>,
    Path((device, pass_type, serial)): Path<(String, String, String)>,
    PassAuthToken(token): PassAuthToken,
) -> Result<StatusCode, ApiError> {
    state
        .blocking(move |state| {
            authorize(&state, PassCredentials::new(&serial, &token, &pass_type))?;
            let removed =
                state
                    .registry
                    .unregister(state.deadline(), &device, &serial, &pass_type)?;
            if !removed {
                return Err(ApiError::NotFound);
            }
            tracing::info!(device = %device, serial = %serial, "Device unregistered");
            Ok(StatusCode::OK)
        })
        .await
}

/// `GET /v1/devices/{device}/registrations/{passType}?passesUpdatedSince=tag`
pub async fn list_serials(
    State(state): State<AppState>,
    Path((device, pass_type)): Path<(String, String)>,
    Query(query): Query<SerialsQuery>,
) -> Result<Response, ApiError> {
    let since = query.passes_updated_since.unwrap_or_default();
    let updated = state
        .blocking(move |state| {
            Ok(state
                .registry
                .find_serials(state.deadline(), &device, &pass_type, &since)?)
        })
        .await?;

    let Some(last_updated) = updated.last_updated else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    Ok(Json(SerialsResponse {
        serial_numbers: updated.serial_numbers,
        last_updated: format_update_tag(last_updated),
    })
    .into_response())
}

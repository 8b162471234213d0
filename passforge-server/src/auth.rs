//! Pass authentication: `Authorization: <scheme> <authenticationToken>`.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use passforge_core::PassCredentials;

use crate::error::ApiError;
use crate::state::AppState;

/// Token presented by a device. Rejects with 401 when the header is
/// missing or uses another scheme.
#[derive(Debug, Clone)]
pub struct PassAuthToken(pub String);

impl FromRequestParts<AppState> for PassAuthToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        parse_authorization(header, &state.auth_scheme)
            .map(|token| Self(token.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}

fn parse_authorization<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    let (presented, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (presented.eq_ignore_ascii_case(scheme) && !token.is_empty()).then_some(token)
}

/// Check the three credentials against the registry. Any mismatch,
/// including an unknown serial number, is 401.
pub fn authorize(state: &AppState, credentials: PassCredentials<'_>) -> Result<(), ApiError> {
    if state.registry.find_pass(state.deadline(), credentials)? {
        return Ok(());
    }
    reject(credentials);
    Err(ApiError::Unauthorized)
}

/// Like [`authorize`], but an unknown serial number is 404 so devices can
/// tell a retired pass from a bad token.
pub fn authorize_registration(
    state: &AppState,
    credentials: PassCredentials<'_>,
) -> Result<(), ApiError> {
    if state.registry.find_pass(state.deadline(), credentials)? {
        return Ok(());
    }
    match state
        .registry
        .get_pass(state.deadline(), credentials.serial_number)?
    {
        None => Err(ApiError::NotFound),
        Some(_) => {
            reject(credentials);
            Err(ApiError::Unauthorized)
        }
    }
}

fn reject(credentials: PassCredentials<'_>) {
    tracing::debug!(
        serial = credentials.serial_number,
        pass_type = credentials.type_identifier,
        "Rejected pass credentials"
    );
}

//! Latest bundle download.

use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use passforge_core::blob::{bundle_key, PASS_BUCKET};
use passforge_core::bundle::BUNDLE_CONTENT_TYPE;
use passforge_core::freshness::{format_http_date, is_modified_since, parse_http_date};
use passforge_core::{PassCredentials, RegistryError};

use crate::auth::PassAuthToken;
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /v1/passes/{passType}/{serial}`
///
/// 304 when `If-Modified-Since` is not older than the pass, otherwise the
/// bundle with `Last-Modified`.
pub async fn latest(
    State(state): State<AppState>,
    Path((pass_type, serial)): Path<(String, String)>,
    PassAuthToken(token): PassAuthToken,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let marker = headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    state
        .blocking(move |state| {
            let deadline = state.deadline();
            let credentials = PassCredentials::new(&serial, &token, &pass_type);
            let updated_at = match state.registry.latest_timestamp(deadline, credentials) {
                Ok(ts) => ts,
                Err(RegistryError::NotFound(_)) => return Err(ApiError::Unauthorized),
                Err(e) => return Err(e.into()),
            };
            let last_modified = format_http_date(updated_at);

            if let Some(marker) = marker {
                if !is_modified_since(updated_at, marker) {
                    return Ok((
                        StatusCode::NOT_MODIFIED,
                        [(LAST_MODIFIED, last_modified)],
                    )
                        .into_response());
                }
            }

            let bundle = state.blobs.get(deadline, PASS_BUCKET, &bundle_key(&serial))?;
            tracing::debug!(serial = %serial, size = bundle.len(), "Serving bundle");
            Ok((
                StatusCode::OK,
                [
                    (CONTENT_TYPE, BUNDLE_CONTENT_TYPE.to_string()),
                    (LAST_MODIFIED, last_modified),
                ],
                bundle,
            )
                .into_response())
        })
        .await
}

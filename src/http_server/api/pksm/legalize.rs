use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use http::HeaderMap;
use serde_json::Value;

use crate::database::content_hash;
use crate::ServiceState;

use super::super::{collect_files, header_str};
use super::PksmError;

/// Ask the oracle for a best-effort repair of an illegal record. Already
/// legal records pass through untouched; unfixable ones come back with
/// `legalized: false` and no payload.
pub async fn handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, PksmError> {
    let generation = header_str(&headers, "generation")
        .ok_or_else(|| PksmError::BadRequest("missing generation header".into()))?
        .to_string();
    let version = header_str(&headers, "version").map(str::to_string);

    let files = collect_files(multipart).await.map_err(PksmError::Multipart)?;
    let bytes = files
        .get("pkmn")
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| PksmError::BadRequest("no file uploaded".into()))?;

    let digest = content_hash(&base64::engine::general_purpose::STANDARD.encode(bytes));
    let cache_key = format!(
        "legalize:{digest}:{generation}:{}",
        version.as_deref().unwrap_or("")
    );
    if let Some(cached) = state.cache().get_download(&cache_key) {
        return Ok(Json(cached.as_ref().clone()).into_response());
    }

    let record = state
        .oracle()
        .parse(bytes, &generation)
        .await?
        .ok_or_else(|| PksmError::BadRequest("not a pokemon!".into()))?;

    let response = if state.oracle().analyze_legality(&record).await? {
        serde_json::json!({
            "legal": true,
            "legalized": false,
            "base_64": Value::Null,
        })
    } else {
        match state.oracle().auto_fix(&record, version.as_deref()).await? {
            Some(fixed) => {
                let legal = state.oracle().analyze_legality(&fixed).await?;
                serde_json::json!({
                    "legal": legal,
                    "legalized": true,
                    "base_64": base64::engine::general_purpose::STANDARD.encode(&fixed.bytes),
                })
            }
            None => serde_json::json!({
                "legal": false,
                "legalized": false,
                "base_64": Value::Null,
            }),
        }
    };

    state
        .cache()
        .put_download(cache_key, Arc::new(response.clone()));
    Ok(Json(response).into_response())
}

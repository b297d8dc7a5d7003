use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use http::HeaderMap;

use crate::database::content_hash;
use crate::ServiceState;

use super::super::{collect_files, header_str};
use super::PksmError;

pub async fn handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, PksmError> {
    let generation = header_str(&headers, "generation")
        .ok_or_else(|| PksmError::BadRequest("missing generation header".into()))?
        .to_string();
    let files = collect_files(multipart).await.map_err(PksmError::Multipart)?;
    let bytes = files
        .get("pkmn")
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| PksmError::BadRequest("no file uploaded".into()))?;

    let digest = content_hash(&base64::engine::general_purpose::STANDARD.encode(bytes));
    let cache_key = format!("legality:{digest}:{generation}");
    if let Some(cached) = state.cache().get_download(&cache_key) {
        return Ok(Json(cached.as_ref().clone()).into_response());
    }

    let record = state
        .oracle()
        .parse(bytes, &generation)
        .await?
        .ok_or_else(|| PksmError::BadRequest("not a pokemon!".into()))?;
    let legal = state.oracle().analyze_legality(&record).await?;

    let response = serde_json::json!({
        "legal": legal,
        "generation": record.generation,
    });
    state
        .cache()
        .put_download(cache_key, Arc::new(response.clone()));
    Ok(Json(response).into_response())
}

use std::collections::HashMap;

use axum::extract::{Multipart, Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use http::HeaderMap;

use crate::cache::ResponseCache;
use crate::codes;
use crate::database::{content_hash, is_unique_violation, EntityKind};
use crate::oracle::{OracleError, ParsedRecord};
use crate::search::{generation_alias, generation_value};
use crate::ServiceState;

use super::super::{collect_files, header_str};

const MIN_BUNDLE_MEMBERS: usize = 2;
const MAX_BUNDLE_MEMBERS: usize = 6;

pub async fn handler(
    State(state): State<ServiceState>,
    Path(entity_type): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, UploadError> {
    let kind = EntityKind::parse(&entity_type).ok_or(UploadError::InvalidEntityType)?;
    let files = collect_files(multipart).await.map_err(UploadError::Multipart)?;

    match kind {
        EntityKind::Pokemon => upload_pokemon(state, headers, files).await,
        EntityKind::Bundle => upload_bundle(state, headers, files).await,
    }
}

fn code_response(code: String) -> Response {
    Json(serde_json::json!({"code": code})).into_response()
}

async fn upload_pokemon(
    state: ServiceState,
    headers: HeaderMap,
    files: HashMap<String, Vec<u8>>,
) -> Result<Response, UploadError> {
    let generation = header_str(&headers, "generation")
        .ok_or_else(|| UploadError::BadRequest("missing generation header".into()))?
        .to_string();
    let bytes = files
        .get("pkmn")
        .ok_or_else(|| UploadError::BadRequest("pkmn file is missing".into()))?;

    let record = state
        .oracle()
        .parse(bytes, &generation)
        .await?
        .ok_or_else(|| UploadError::BadRequest("not a pokemon".into()))?;

    let base64 = base64::engine::general_purpose::STANDARD.encode(&record.bytes);
    let hash = content_hash(&base64);
    let dedup_key = ResponseCache::dedup_key(EntityKind::Pokemon, &hash);

    if let Some(code) = state.cache().get_code(&dedup_key) {
        tracing::debug!(hash, "upload code served from cache");
        return Ok(code_response(code));
    }
    if let Some((_, code)) = state.database().lookup_pokemon(&hash).await? {
        state.cache().put_code(dedup_key, code.clone());
        return Ok(code_response(code));
    }

    let legal = state.oracle().analyze_legality(&record).await?;
    let (_, code, inserted) = lookup_or_insert_pokemon(&state, &base64, legal, &generation).await?;
    if inserted {
        state.cache().invalidate_search(EntityKind::Pokemon);
        tracing::info!(code, "pokemon uploaded");
    }
    state.cache().put_code(dedup_key, code.clone());
    Ok(code_response(code))
}

async fn lookup_or_insert_pokemon(
    state: &ServiceState,
    base64: &str,
    legal: bool,
    generation: &str,
) -> Result<(i64, String, bool), UploadError> {
    lookup_or_insert_pokemon_with(state, base64, legal, generation, || {
        codes::generate_unique(state.database(), EntityKind::Pokemon)
    })
    .await
}

/// Dedup-aware insert. The pre-insert lookup is only a fast path; unique
/// violations from concurrent uploads of the same payload (or a download
/// code race) send us back around the loop to re-check.
async fn lookup_or_insert_pokemon_with<F, Fut>(
    state: &ServiceState,
    base64: &str,
    legal: bool,
    generation: &str,
    mut next_code: F,
) -> Result<(i64, String, bool), UploadError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, sqlx::Error>>,
{
    let hash = content_hash(base64);
    loop {
        if let Some((id, code)) = state.database().lookup_pokemon(&hash).await? {
            return Ok((id, code, false));
        }
        let code = next_code().await?;
        match state
            .database()
            .insert_pokemon(base64, legal, &code, generation)
            .await
        {
            Ok(id) => return Ok((id, code, true)),
            Err(err) if is_unique_violation(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

async fn upload_bundle(
    state: ServiceState,
    headers: HeaderMap,
    files: HashMap<String, Vec<u8>>,
) -> Result<Response, UploadError> {
    let count = header_str(&headers, "count")
        .ok_or_else(|| UploadError::BadRequest("missing count header".into()))?;
    let count: usize = count
        .parse()
        .map_err(|_| UploadError::BadRequest("count is not an integer".into()))?;
    if !(MIN_BUNDLE_MEMBERS..=MAX_BUNDLE_MEMBERS).contains(&count) {
        return Err(UploadError::BadRequest(
            "count must be between 2 and 6".into(),
        ));
    }

    let generations = header_str(&headers, "generations")
        .ok_or_else(|| UploadError::BadRequest("missing generations header".into()))?;
    let generations: Vec<String> = generations.split(',').map(str::to_string).collect();
    if generations.len() != count {
        return Err(UploadError::BadRequest(
            "number of generations does not match".into(),
        ));
    }

    // Parse every member before touching any state: an unreadable file
    // aborts the whole upload with nothing persisted.
    let mut members: Vec<(ParsedRecord, String)> = Vec::with_capacity(count);
    for i in 1..=count {
        let name = format!("pkmn{i}");
        let bytes = files
            .get(&name)
            .ok_or_else(|| UploadError::BadRequest(format!("{name} file is missing")))?;
        let record = state
            .oracle()
            .parse(bytes, &generations[i - 1])
            .await?
            .ok_or_else(|| UploadError::BadRequest(format!("{name} is not a pokemon")))?;
        members.push((record, generations[i - 1].clone()));
    }

    // Legality up front as well; the bundle is legal only if every member is
    let mut legality = Vec::with_capacity(count);
    for (record, _) in &members {
        legality.push(state.oracle().analyze_legality(record).await?);
    }
    let bundle_legal = legality.iter().all(|legal| *legal);

    // min/max over the effective generation tags: the client's tag when it
    // carries a numeric value, otherwise the oracle-reported generation.
    // Aliases are normalized to their numeric tags so the stored bounds
    // line up with what the search filter translation produces.
    let mut min: Option<(f64, String)> = None;
    let mut max: Option<(f64, String)> = None;
    for (record, tag) in &members {
        let effective = if generation_value(tag).is_some() {
            generation_alias(tag).unwrap_or(tag).to_string()
        } else {
            record.generation.clone()
        };
        let value = generation_value(&effective).unwrap_or(0.0);
        if min.as_ref().map_or(true, |(v, _)| value < *v) {
            min = Some((value, effective.clone()));
        }
        if max.as_ref().map_or(true, |(v, _)| value > *v) {
            max = Some((value, effective));
        }
    }
    // count >= 2, so both bounds exist
    let min_gen = min.map(|(_, tag)| tag).unwrap_or_default();
    let max_gen = max.map(|(_, tag)| tag).unwrap_or_default();

    let mut ids = Vec::with_capacity(count);
    let mut hashes = Vec::with_capacity(count);
    let mut any_inserted = false;
    for ((record, tag), legal) in members.iter().zip(legality.iter()) {
        let base64 = base64::engine::general_purpose::STANDARD.encode(&record.bytes);
        let hash = content_hash(&base64);
        let (id, code, inserted) = lookup_or_insert_pokemon(&state, &base64, *legal, tag).await?;
        if inserted {
            any_inserted = true;
            state
                .cache()
                .put_code(ResponseCache::dedup_key(EntityKind::Pokemon, &hash), code);
        }
        hashes.push(hash);
        ids.push(id);
    }
    if any_inserted {
        state.cache().invalidate_search(EntityKind::Pokemon);
    }

    // Member hashes in upload order identify the bundle for the dedup cache
    let bundle_digest = content_hash(&hashes.join(","));
    let bundle_key = ResponseCache::dedup_key(EntityKind::Bundle, &bundle_digest);
    if let Some(code) = state.cache().get_code(&bundle_key) {
        tracing::debug!("bundle code served from cache");
        return Ok(code_response(code));
    }

    if let Some(code) = state.database().find_bundle_by_member_set(&ids).await? {
        state.cache().put_code(bundle_key, code.clone());
        return Ok(code_response(code));
    }

    let code = loop {
        let code = codes::generate_unique(state.database(), EntityKind::Bundle).await?;
        match state
            .database()
            .insert_bundle(bundle_legal, &code, &min_gen, &max_gen, &ids)
            .await
        {
            Ok(_) => break code,
            // another upload claimed this code in the window; redraw
            Err(err) if is_unique_violation(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    };
    state.cache().invalidate_search(EntityKind::Bundle);
    state.cache().put_code(bundle_key, code.clone());
    tracing::info!(code, "bundle uploaded");
    Ok(code_response(code))
}


#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid entity type")]
    InvalidEntityType,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("multipart error: {0}")]
    Multipart(String),
    #[error("oracle failure: {0}")]
    Oracle(#[from] OracleError),
    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        match self {
            UploadError::InvalidEntityType => (
                http::StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "invalid entity type"})),
            )
                .into_response(),
            UploadError::BadRequest(msg) | UploadError::Multipart(msg) => (
                http::StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": msg})),
            )
                .into_response(),
            UploadError::Oracle(err) => {
                tracing::error!("oracle failure during upload: {err}");
                (
                    http::StatusCode::BAD_GATEWAY,
                    Json(serde_json::json!({"error": "record oracle is unavailable"})),
                )
                    .into_response()
            }
            UploadError::Database(err) => {
                tracing::error!("database failure during upload: {err}");
                (
                    http::StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

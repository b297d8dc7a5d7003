use std::collections::HashMap;

use axum::extract::Multipart;
use axum::Router;
use http::HeaderMap;

pub mod admin;
pub mod gpss;
pub mod pksm;

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .nest("/gpss", gpss::router(state.clone()))
        .nest("/admin", admin::router(state.clone()))
        .nest("/pksm", pksm::router(state.clone()))
        .with_state(state)
}

/// Drain a multipart form into field name -> raw bytes.
pub(crate) async fn collect_files(
    mut multipart: Multipart,
) -> Result<HashMap<String, Vec<u8>>, String> {
    let mut files = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("malformed multipart body: {e}"))?
    {
        let name = field.name().unwrap_or("").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| format!("error reading field {name}: {e}"))?;
        files.insert(name, bytes.to_vec());
    }
    Ok(files)
}

/// Header value as a string, `None` when absent or not valid UTF-8.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

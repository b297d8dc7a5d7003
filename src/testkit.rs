//! Test helpers shared by the unit tests and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cache::{CacheConfig, ResponseCache};
use crate::database::Database;
use crate::oracle::{Oracle, OracleError, ParsedRecord};
use crate::state::State;

/// Scriptable in-process oracle. By default every payload parses, is legal,
/// and fixes to itself; individual payloads can be marked otherwise.
#[derive(Default)]
pub struct MockOracle {
    unparseable: Mutex<HashSet<Vec<u8>>>,
    illegal: Mutex<HashSet<Vec<u8>>>,
    unfixable: Mutex<HashSet<Vec<u8>>>,
    failing: Mutex<HashSet<Vec<u8>>>,
    generations: Mutex<HashMap<Vec<u8>, String>>,
    fixes: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MockOracle {
    pub fn mark_unparseable(&self, bytes: &[u8]) {
        self.unparseable.lock().unwrap().insert(bytes.to_vec());
    }

    pub fn mark_illegal(&self, bytes: &[u8]) {
        self.illegal.lock().unwrap().insert(bytes.to_vec());
    }

    pub fn mark_unfixable(&self, bytes: &[u8]) {
        self.unfixable.lock().unwrap().insert(bytes.to_vec());
    }

    /// Every call touching these bytes returns a transport-style error.
    pub fn fail_on(&self, bytes: &[u8]) {
        self.failing.lock().unwrap().insert(bytes.to_vec());
    }

    /// Report this generation instead of echoing the caller's hint.
    pub fn override_generation(&self, bytes: &[u8], generation: &str) {
        self.generations
            .lock()
            .unwrap()
            .insert(bytes.to_vec(), generation.to_string());
    }

    /// Script the repaired payload `auto_fix` should hand back.
    pub fn script_fix(&self, from: &[u8], to: &[u8]) {
        self.fixes
            .lock()
            .unwrap()
            .insert(from.to_vec(), to.to_vec());
    }

    fn check_failing(&self, bytes: &[u8]) -> Result<(), OracleError> {
        if self.failing.lock().unwrap().contains(bytes) {
            return Err(OracleError::Malformed("scripted oracle failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn parse(
        &self,
        bytes: &[u8],
        generation_hint: &str,
    ) -> Result<Option<ParsedRecord>, OracleError> {
        self.check_failing(bytes)?;
        if self.unparseable.lock().unwrap().contains(bytes) {
            return Ok(None);
        }
        let generation = self
            .generations
            .lock()
            .unwrap()
            .get(bytes)
            .cloned()
            .unwrap_or_else(|| generation_hint.to_string());
        Ok(Some(ParsedRecord {
            bytes: bytes.to_vec(),
            generation,
        }))
    }

    async fn analyze_legality(&self, record: &ParsedRecord) -> Result<bool, OracleError> {
        self.check_failing(&record.bytes)?;
        Ok(!self.illegal.lock().unwrap().contains(&record.bytes))
    }

    async fn auto_fix(
        &self,
        record: &ParsedRecord,
        _version_hint: Option<&str>,
    ) -> Result<Option<ParsedRecord>, OracleError> {
        self.check_failing(&record.bytes)?;
        if self.unfixable.lock().unwrap().contains(&record.bytes) {
            return Ok(None);
        }
        let bytes = self
            .fixes
            .lock()
            .unwrap()
            .get(&record.bytes)
            .cloned()
            .unwrap_or_else(|| record.bytes.clone());
        Ok(Some(ParsedRecord {
            bytes,
            generation: record.generation.clone(),
        }))
    }
}

pub const MULTIPART_BOUNDARY: &str = "gpss-test-boundary";

/// Content-Type header value matching [`multipart_body`].
pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}")
}

/// Hand-rolled multipart encoding of `(field name, bytes)` pairs, for
/// driving upload handlers through `tower::ServiceExt::oneshot`.
pub fn multipart_body(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, bytes) in parts {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; \
                 name=\"{name}\"; filename=\"{name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

/// Fully in-memory [`State`] around the given oracle.
pub async fn mock_state(oracle: Arc<dyn Oracle>) -> State {
    let database = Database::in_memory().await.expect("in-memory database");
    let cache = Arc::new(ResponseCache::new(&CacheConfig {
        memory_budget: Some(8 * 1024 * 1024),
        ..CacheConfig::default()
    }));
    State::new(database, cache, oracle)
}

//! Boundary to the external parsing/legality oracle.
//!
//! The oracle owns the binary record format: it decides whether payload
//! bytes are a recognizable record, judges legality, and can attempt a
//! best-effort repair. This core never inspects payloads beyond hashing
//! and storing them; everything format-aware goes through [`Oracle`].

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

/// A record the oracle recognized. Carries the canonical payload bytes and
/// the oracle-reported generation tag.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub bytes: Vec<u8>,
    pub generation: String,
}

#[async_trait]
pub trait Oracle: Send + Sync + 'static {
    /// `None` when the bytes are not a recognizable record under the hint.
    async fn parse(
        &self,
        bytes: &[u8],
        generation_hint: &str,
    ) -> Result<Option<ParsedRecord>, OracleError>;

    async fn analyze_legality(&self, record: &ParsedRecord) -> Result<bool, OracleError>;

    /// Best-effort repair toward a legal record; `None` when infeasible.
    async fn auto_fix(
        &self,
        record: &ParsedRecord,
        version_hint: Option<&str>,
    ) -> Result<Option<ParsedRecord>, OracleError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("oracle returned a malformed response: {0}")]
    Malformed(String),
}

/// HTTP client for an oracle process running out of tree.
pub struct HttpOracle {
    client: reqwest::Client,
    base: Url,
}

#[derive(Debug, Deserialize)]
struct ParseReply {
    parsed: bool,
    generation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegalityReply {
    legal: bool,
}

#[derive(Debug, Deserialize)]
struct AutoFixReply {
    fixed: bool,
    #[serde(default)]
    bytes_base64: Option<String>,
    #[serde(default)]
    generation: Option<String>,
}

impl HttpOracle {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, OracleError> {
        self.base
            .join(path)
            .map_err(|e| OracleError::Malformed(format!("bad oracle endpoint {path}: {e}")))
    }

    fn record_form(bytes: &[u8]) -> reqwest::multipart::Form {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name("pkmn");
        reqwest::multipart::Form::new().part("pkmn", part)
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn parse(
        &self,
        bytes: &[u8],
        generation_hint: &str,
    ) -> Result<Option<ParsedRecord>, OracleError> {
        let reply: ParseReply = self
            .client
            .post(self.endpoint("parse")?)
            .header("generation", generation_hint)
            .multipart(Self::record_form(bytes))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !reply.parsed {
            return Ok(None);
        }
        let generation = reply
            .generation
            .ok_or_else(|| OracleError::Malformed("parsed record without generation".into()))?;
        Ok(Some(ParsedRecord {
            bytes: bytes.to_vec(),
            generation,
        }))
    }

    async fn analyze_legality(&self, record: &ParsedRecord) -> Result<bool, OracleError> {
        let reply: LegalityReply = self
            .client
            .post(self.endpoint("legality")?)
            .header("generation", &record.generation)
            .multipart(Self::record_form(&record.bytes))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(reply.legal)
    }

    async fn auto_fix(
        &self,
        record: &ParsedRecord,
        version_hint: Option<&str>,
    ) -> Result<Option<ParsedRecord>, OracleError> {
        let mut request = self
            .client
            .post(self.endpoint("legalize")?)
            .header("generation", &record.generation)
            .multipart(Self::record_form(&record.bytes));
        if let Some(version) = version_hint {
            request = request.header("version", version);
        }
        let reply: AutoFixReply = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !reply.fixed {
            return Ok(None);
        }
        let encoded = reply
            .bytes_base64
            .ok_or_else(|| OracleError::Malformed("fixed record without payload".into()))?;
        let bytes = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| OracleError::Malformed(format!("fixed payload not base64: {e}")))?
        };
        Ok(Some(ParsedRecord {
            bytes,
            generation: reply.generation.unwrap_or_else(|| record.generation.clone()),
        }))
    }
}

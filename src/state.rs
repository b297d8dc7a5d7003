use std::sync::Arc;

use url::Url;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::database::{Database, DatabaseSetupError};
use crate::oracle::Oracle;

/// Shared handles threaded through the HTTP handlers and background tasks.
#[derive(Clone)]
pub struct State {
    database: Database,
    cache: Arc<ResponseCache>,
    oracle: Arc<dyn Oracle>,
}

impl State {
    pub fn new(database: Database, cache: Arc<ResponseCache>, oracle: Arc<dyn Oracle>) -> Self {
        Self {
            database,
            cache,
            oracle,
        }
    }

    pub async fn from_config(
        config: &Config,
        oracle: Arc<dyn Oracle>,
    ) -> Result<Self, StateSetupError> {
        let database = match &config.sqlite_path {
            Some(path) => {
                let url = sqlite_url(path).map_err(StateSetupError::BadDatabasePath)?;
                Database::connect(&url).await?
            }
            None => {
                tracing::warn!("no database path configured, using an in-memory database");
                Database::in_memory().await?
            }
        };

        let cache = Arc::new(ResponseCache::new(&config.cache));
        Ok(Self::new(database, cache, oracle))
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn oracle(&self) -> &Arc<dyn Oracle> {
        &self.oracle
    }
}

/// The `sqlite:{path}` form keeps the whole path (relative or absolute) in
/// the URL's path component; `sqlite://{path}` would swallow the first
/// segment of a relative path as the authority.
fn sqlite_url(path: &std::path::Path) -> Result<Url, url::ParseError> {
    Url::parse(&format!("sqlite:{}", path.display()))
}

impl AsRef<Database> for State {
    fn as_ref(&self) -> &Database {
        &self.database
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("configured database path does not form a valid URL: {0}")]
    BadDatabasePath(url::ParseError),

    #[error("failed to setup the database: {0}")]
    DatabaseUnavailable(#[from] DatabaseSetupError),
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn sqlite_urls_keep_the_configured_path() {
        let url = sqlite_url(Path::new("data.db")).unwrap();
        assert_eq!(url.as_str(), "sqlite:data.db");

        let url = sqlite_url(Path::new("/var/lib/gpss/records.db")).unwrap();
        assert_eq!(url.as_str(), "sqlite:/var/lib/gpss/records.db");
    }
}

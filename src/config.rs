use std::net::SocketAddr;
use std::path::PathBuf;

use url::Url;

use crate::cache::CacheConfig;
use crate::reconciler::ReconcilerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    // http server configuration
    /// address for the API server to listen on.
    ///  if not set then 0.0.0.0:8080 will be used
    pub listen_addr: Option<SocketAddr>,

    // data store configuration
    /// a path to a sqlite database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,

    /// base URL of the external parsing/legality oracle
    pub oracle_url: Url,

    // background components
    pub cache: CacheConfig,
    pub reconciler: ReconcilerConfig,

    // misc
    pub log_level: tracing::Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: None,
            sqlite_path: None,
            // the oracle is a separate process; this is its conventional
            // local port
            oracle_url: Url::parse("http://localhost:9911")
                .expect("static oracle URL parses"),
            cache: CacheConfig::default(),
            reconciler: ReconcilerConfig::default(),
            log_level: tracing::Level::INFO,
        }
    }
}

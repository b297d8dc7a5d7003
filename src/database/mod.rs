mod bundle;
mod filter;
mod pokemon;

use std::ops::Deref;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use bundle::{Bundle, GpssBundle, GpssBundlePokemon};
pub use filter::{Search, Sort, SortField};
pub use pokemon::{GpssPokemon, Pokemon};

/// The two stored record families. `parse` accepts the wire aliases the
/// clients send (`bundles` and `bundle` both mean bundles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Pokemon,
    Bundle,
}

impl EntityKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pokemon" => Some(Self::Pokemon),
            "bundle" | "bundles" => Some(Self::Bundle),
            _ => None,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Pokemon => "pokemons",
            Self::Bundle => "bundles",
        }
    }

    /// Canonical namespace used in cache keys.
    pub fn cache_ns(&self) -> &'static str {
        match self {
            Self::Pokemon => "pokemon",
            Self::Bundle => "bundle",
        }
    }
}

/// Lowercase hex SHA-256 digest of the canonical (base64) payload text.
pub fn content_hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// True when an insert failed because a unique constraint already holds
/// the value. Callers treat this as "already exists", not as a failure.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation
    )
}

#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

impl Database {
    pub async fn connect(database_url: &url::Url) -> Result<Self, DatabaseSetupError> {
        if database_url.scheme() != "sqlite" {
            return Err(DatabaseSetupError::UnknownDbType(
                database_url.scheme().to_string(),
            ));
        }

        let options = SqliteConnectOptions::from_str(database_url.as_str())
            .map_err(DatabaseSetupError::Unavailable)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DatabaseSetupError::Unavailable)?;

        let db = Self(pool);
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database, used by tests and when no path is configured.
    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(DatabaseSetupError::Unavailable)?;

        // A single connection keeps every session on the same in-memory db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(DatabaseSetupError::Unavailable)?;

        let db = Self(pool);
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), DatabaseSetupError> {
        sqlx::migrate!("./migrations")
            .run(&self.0)
            .await
            .map_err(DatabaseSetupError::MigrationFailed)
    }

    /// Existence pre-check used by the download code registry. The unique
    /// index on `download_code` remains the authoritative guard.
    pub async fn code_exists(&self, kind: EntityKind, code: &str) -> Result<bool, sqlx::Error> {
        let query = format!(
            "SELECT 1 FROM {} WHERE download_code = ?",
            kind.table()
        );
        let row = sqlx::query(&query)
            .bind(code)
            .fetch_optional(&self.0)
            .await?;
        Ok(row.is_some())
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(sqlx::Error),

    #[error("requested database type was not recognized: {0}")]
    UnknownDbType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_apply_to_fresh_database() {
        let db = Database::in_memory().await.expect("setup");
        assert!(!db.code_exists(EntityKind::Pokemon, "0000000000").await.unwrap());
        assert!(!db.code_exists(EntityKind::Bundle, "0000000000").await.unwrap());
    }

    #[test]
    fn content_hash_is_stable_lowercase_hex() {
        let h = content_hash("hello");
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(h, h.to_lowercase());
        assert_ne!(content_hash("hello"), content_hash("hello!"));
    }

    #[test]
    fn entity_kind_accepts_wire_aliases() {
        assert_eq!(EntityKind::parse("pokemon"), Some(EntityKind::Pokemon));
        assert_eq!(EntityKind::parse("bundle"), Some(EntityKind::Bundle));
        assert_eq!(EntityKind::parse("bundles"), Some(EntityKind::Bundle));
        assert_eq!(EntityKind::parse("trainers"), None);
    }
}

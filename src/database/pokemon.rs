use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use time::OffsetDateTime;

use super::filter::Search;
use super::{content_hash, Database};

/// A stored pokemon row. `base64_hash` is derived from `base64` and is
/// unique: at most one row exists per distinct payload.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Pokemon {
    pub id: i64,
    pub upload_datetime: OffsetDateTime,
    pub download_code: String,
    pub download_count: i64,
    pub generation: String,
    pub legal: bool,
    pub base64: String,
    pub base64_hash: String,
}

/// Wire shape served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpssPokemon {
    pub legal: bool,
    #[serde(rename = "base_64")]
    pub base64: String,
    #[serde(rename = "code")]
    pub download_code: String,
    pub generation: String,
}

impl From<Pokemon> for GpssPokemon {
    fn from(p: Pokemon) -> Self {
        Self {
            legal: p.legal,
            base64: p.base64,
            download_code: p.download_code,
            generation: p.generation,
        }
    }
}

const POKEMON_COLUMNS: &str = "id, upload_datetime, download_code, download_count, \
     generation, legal, base64, base64_hash";

fn push_pokemon_filters(qb: &mut QueryBuilder<'static, Sqlite>, search: &Search) {
    qb.push(" WHERE 1 = 1");
    if let Some(code) = &search.download_code {
        qb.push(" AND download_code = ").push_bind(code.clone());
    }
    if let Some(gens) = &search.generations {
        if !gens.is_empty() {
            qb.push(" AND generation IN (");
            let mut sep = qb.separated(", ");
            for gen in gens {
                sep.push_bind(gen.clone());
            }
            sep.push_unseparated(")");
        }
    }
    if search.legal_only {
        qb.push(" AND legal = 1");
    }
}

impl Database {
    /// Fast-path dedup lookup by content hash. Returns `(id, download_code)`.
    pub async fn lookup_pokemon(
        &self,
        base64_hash: &str,
    ) -> Result<Option<(i64, String)>, sqlx::Error> {
        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT id, download_code
            FROM pokemons
            WHERE base64_hash = ?
            "#,
        )
        .bind(base64_hash)
        .fetch_optional(&**self)
        .await?;
        Ok(row)
    }

    /// Insert a new pokemon row, returning its id. Fails with a unique
    /// violation when the content hash or download code is already taken;
    /// callers re-run [`lookup_pokemon`](Self::lookup_pokemon) on conflict.
    pub async fn insert_pokemon(
        &self,
        base64: &str,
        legal: bool,
        code: &str,
        generation: &str,
    ) -> Result<i64, sqlx::Error> {
        let base64_hash = content_hash(base64);
        let now = OffsetDateTime::now_utc();

        let result = sqlx::query(
            r#"
            INSERT INTO pokemons
                (upload_datetime, download_code, download_count, generation, legal, base64, base64_hash)
            VALUES (?, ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(now)
        .bind(code)
        .bind(generation)
        .bind(legal)
        .bind(base64)
        .bind(&base64_hash)
        .execute(&**self)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Filtered, sorted page of pokemons. Pages are 1-indexed.
    pub async fn list_pokemons(
        &self,
        page: u32,
        amount: u32,
        search: &Search,
    ) -> Result<Vec<Pokemon>, sqlx::Error> {
        let offset = (page.max(1) - 1) as i64 * amount as i64;

        let mut qb = QueryBuilder::new(format!("SELECT {POKEMON_COLUMNS} FROM pokemons"));
        push_pokemon_filters(&mut qb, search);
        qb.push(format!(
            " ORDER BY {} {}",
            search.sort.field.column(),
            search.sort.direction()
        ));
        qb.push(" LIMIT ").push_bind(amount as i64);
        qb.push(" OFFSET ").push_bind(offset);

        qb.build_query_as::<Pokemon>().fetch_all(&**self).await
    }

    pub async fn count_pokemons(&self, search: &Search) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM pokemons");
        push_pokemon_filters(&mut qb, search);
        qb.build_query_scalar::<i64>().fetch_one(&**self).await
    }

    /// Atomic download-count bump; a no-op for unknown codes.
    pub async fn increment_pokemon_download(&self, code: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE pokemons
            SET download_count = download_count + 1
            WHERE download_code = ?
            "#,
        )
        .bind(code)
        .execute(&**self)
        .await?;
        Ok(())
    }

    /// Admin deletion. Membership rows cascade with the row.
    pub async fn delete_pokemon_by_code(&self, code: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM pokemons WHERE download_code = ?")
            .bind(code)
            .execute(&**self)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{is_unique_violation, EntityKind, Sort, SortField};
    use super::*;

    async fn db() -> Database {
        Database::in_memory().await.expect("setup")
    }

    #[tokio::test]
    async fn insert_then_lookup_by_hash() {
        let db = db().await;
        let id = db
            .insert_pokemon("cGF5bG9hZA==", true, "1111111111", "7")
            .await
            .unwrap();

        let hash = content_hash("cGF5bG9hZA==");
        let found = db.lookup_pokemon(&hash).await.unwrap();
        assert_eq!(found, Some((id, "1111111111".to_string())));

        assert!(db.lookup_pokemon(&content_hash("other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_content_is_a_unique_violation() {
        let db = db().await;
        db.insert_pokemon("cGF5bG9hZA==", true, "1111111111", "7")
            .await
            .unwrap();

        let err = db
            .insert_pokemon("cGF5bG9hZA==", false, "2222222222", "8")
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        assert_eq!(db.count_pokemons(&Search::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_code_is_a_unique_violation() {
        let db = db().await;
        db.insert_pokemon("one", true, "1111111111", "7").await.unwrap();
        let err = db
            .insert_pokemon("two", true, "1111111111", "7")
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn list_pages_are_one_indexed() {
        let db = db().await;
        for i in 0..45 {
            db.insert_pokemon(&format!("payload-{i}"), true, &format!("{i:010}"), "7")
                .await
                .unwrap();
        }

        let search = Search::default();
        let first = db.list_pokemons(1, 30, &search).await.unwrap();
        let second = db.list_pokemons(2, 30, &search).await.unwrap();
        assert_eq!(first.len(), 30);
        assert_eq!(second.len(), 15);
        assert_eq!(db.count_pokemons(&search).await.unwrap(), 45);
    }

    #[tokio::test]
    async fn filters_and_sorting() {
        let db = db().await;
        db.insert_pokemon("a", true, "1111111111", "7").await.unwrap();
        db.insert_pokemon("b", false, "2222222222", "8").await.unwrap();
        db.insert_pokemon("c", true, "3333333333", "8").await.unwrap();
        db.increment_pokemon_download("1111111111").await.unwrap();
        db.increment_pokemon_download("1111111111").await.unwrap();
        db.increment_pokemon_download("2222222222").await.unwrap();

        let legal_gen8 = Search {
            generations: Some(vec!["8".to_string()]),
            legal_only: true,
            ..Search::default()
        };
        let rows = db.list_pokemons(1, 30, &legal_gen8).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].download_code, "3333333333");
        assert_eq!(db.count_pokemons(&legal_gen8).await.unwrap(), 1);

        let by_popularity = Search {
            sort: Sort {
                field: SortField::DownloadCount,
                ascending: false,
            },
            ..Search::default()
        };
        let rows = db.list_pokemons(1, 30, &by_popularity).await.unwrap();
        let codes: Vec<_> = rows.iter().map(|p| p.download_code.as_str()).collect();
        assert_eq!(codes, vec!["1111111111", "2222222222", "3333333333"]);
    }

    #[tokio::test]
    async fn increment_unknown_code_is_a_noop() {
        let db = db().await;
        db.increment_pokemon_download("9999999999").await.unwrap();
        assert_eq!(db.count_pokemons(&Search::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_by_code() {
        let db = db().await;
        db.insert_pokemon("a", true, "1111111111", "7").await.unwrap();
        assert!(db.delete_pokemon_by_code("1111111111").await.unwrap());
        assert!(!db.delete_pokemon_by_code("1111111111").await.unwrap());
        assert!(!db.code_exists(EntityKind::Pokemon, "1111111111").await.unwrap());
    }
}

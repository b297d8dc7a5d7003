use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use time::OffsetDateTime;

use super::filter::Search;
use super::Database;

/// A stored bundle row. Membership lives in `bundle_pokemons` and is fixed
/// at creation; only the reconciler ever removes a dangling reference.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Bundle {
    pub id: i64,
    pub upload_datetime: OffsetDateTime,
    pub download_code: String,
    pub download_count: i64,
    pub legal: bool,
    pub min_gen: String,
    pub max_gen: String,
}

/// Wire shape of a bundle member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpssBundlePokemon {
    #[serde(rename = "legality")]
    pub legal: bool,
    #[serde(rename = "base_64")]
    pub base64: String,
    pub generation: String,
}

/// Wire shape of a bundle, members inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpssBundle {
    pub pokemons: Vec<GpssBundlePokemon>,
    pub download_codes: Vec<String>,
    pub download_code: String,
    pub min_gen: String,
    pub max_gen: String,
    pub count: usize,
    #[serde(rename = "legal")]
    pub legal: bool,
}

const BUNDLE_COLUMNS: &str =
    "id, upload_datetime, download_code, download_count, legal, min_gen, max_gen";

fn push_bundle_filters(qb: &mut QueryBuilder<'static, Sqlite>, search: &Search) {
    qb.push(" WHERE 1 = 1");
    if let Some(code) = &search.download_code {
        qb.push(" AND download_code = ").push_bind(code.clone());
    }
    if let Some(gens) = &search.generations {
        // A bundle matches only when BOTH its min and max generation are in
        // the requested set; range overlap deliberately does not match.
        if !gens.is_empty() {
            for column in ["min_gen", "max_gen"] {
                qb.push(format!(" AND {column} IN ("));
                let mut sep = qb.separated(", ");
                for gen in gens {
                    sep.push_bind(gen.clone());
                }
                sep.push_unseparated(")");
            }
        }
    }
    if search.legal_only {
        qb.push(" AND legal = 1");
    }
}

impl Database {
    /// Exact member-set dedup: returns the download code of a bundle whose
    /// membership is exactly `pokemon_ids`, if one exists.
    ///
    /// Candidates are bundles where the rows matching the input count up to
    /// the input cardinality; each candidate's full membership is then
    /// compared as a set, so supersets and subsets never match.
    pub async fn find_bundle_by_member_set(
        &self,
        pokemon_ids: &[i64],
    ) -> Result<Option<String>, sqlx::Error> {
        let wanted: HashSet<i64> = pokemon_ids.iter().copied().collect();
        if wanted.is_empty() {
            return Ok(None);
        }

        let mut qb = QueryBuilder::new(
            "SELECT bundle_id FROM bundle_pokemons WHERE pokemon_id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in &wanted {
            sep.push_bind(*id);
        }
        sep.push_unseparated(")");
        qb.push(" GROUP BY bundle_id HAVING COUNT(*) = ").push_bind(wanted.len() as i64);

        let candidates: Vec<i64> = qb.build_query_scalar().fetch_all(&**self).await?;

        for bundle_id in candidates {
            let members: Vec<i64> = sqlx::query_scalar(
                "SELECT pokemon_id FROM bundle_pokemons WHERE bundle_id = ?",
            )
            .bind(bundle_id)
            .fetch_all(&**self)
            .await?;

            let members: HashSet<i64> = members.into_iter().collect();
            if members == wanted {
                let code: Option<String> =
                    sqlx::query_scalar("SELECT download_code FROM bundles WHERE id = ?")
                        .bind(bundle_id)
                        .fetch_optional(&**self)
                        .await?;
                return Ok(code);
            }
        }
        Ok(None)
    }

    /// Create the bundle row plus one membership row per member, as a
    /// single transaction.
    pub async fn insert_bundle(
        &self,
        legal: bool,
        code: &str,
        min_gen: &str,
        max_gen: &str,
        pokemon_ids: &[i64],
    ) -> Result<i64, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO bundles
                (upload_datetime, download_code, download_count, legal, min_gen, max_gen)
            VALUES (?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(now)
        .bind(code)
        .bind(legal)
        .bind(min_gen)
        .bind(max_gen)
        .execute(&mut *tx)
        .await?;
        let bundle_id = result.last_insert_rowid();

        for pokemon_id in pokemon_ids {
            sqlx::query("INSERT INTO bundle_pokemons (pokemon_id, bundle_id) VALUES (?, ?)")
                .bind(pokemon_id)
                .bind(bundle_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(bundle_id)
    }

    /// Filtered, sorted page of bundles with their members inlined.
    pub async fn list_bundles(
        &self,
        page: u32,
        amount: u32,
        search: &Search,
    ) -> Result<Vec<GpssBundle>, sqlx::Error> {
        let offset = (page.max(1) - 1) as i64 * amount as i64;

        let mut qb = QueryBuilder::new(format!("SELECT {BUNDLE_COLUMNS} FROM bundles"));
        push_bundle_filters(&mut qb, search);
        qb.push(format!(
            " ORDER BY {} {}",
            search.sort.field.column(),
            search.sort.direction()
        ));
        qb.push(" LIMIT ").push_bind(amount as i64);
        qb.push(" OFFSET ").push_bind(offset);

        let bundles: Vec<Bundle> = qb.build_query_as().fetch_all(&**self).await?;
        if bundles.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::new(
            "SELECT bp.bundle_id, p.legal, p.base64, p.generation, p.download_code \
             FROM bundle_pokemons bp \
             JOIN pokemons p ON p.id = bp.pokemon_id \
             WHERE bp.bundle_id IN (",
        );
        let mut sep = qb.separated(", ");
        for bundle in &bundles {
            sep.push_bind(bundle.id);
        }
        sep.push_unseparated(") ORDER BY bp.id");

        let member_rows: Vec<(i64, bool, String, String, String)> =
            qb.build_query_as().fetch_all(&**self).await?;

        let mut members: HashMap<i64, (Vec<GpssBundlePokemon>, Vec<String>)> = HashMap::new();
        for (bundle_id, legal, base64, generation, download_code) in member_rows {
            let entry = members.entry(bundle_id).or_default();
            entry.0.push(GpssBundlePokemon {
                legal,
                base64,
                generation,
            });
            entry.1.push(download_code);
        }

        Ok(bundles
            .into_iter()
            .map(|bundle| {
                let (pokemons, download_codes) =
                    members.remove(&bundle.id).unwrap_or_default();
                GpssBundle {
                    count: pokemons.len(),
                    pokemons,
                    download_codes,
                    download_code: bundle.download_code,
                    min_gen: bundle.min_gen,
                    max_gen: bundle.max_gen,
                    legal: bundle.legal,
                }
            })
            .collect())
    }

    pub async fn count_bundles(&self, search: &Search) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM bundles");
        push_bundle_filters(&mut qb, search);
        qb.build_query_scalar::<i64>().fetch_one(&**self).await
    }

    /// Bump the bundle's counter and every current member's counter, as one
    /// transaction. A no-op for unknown codes.
    pub async fn increment_bundle_download(&self, code: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.begin().await?;

        let bundle_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM bundles WHERE download_code = ?")
                .bind(code)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(bundle_id) = bundle_id else {
            return Ok(());
        };

        sqlx::query("UPDATE bundles SET download_count = download_count + 1 WHERE id = ?")
            .bind(bundle_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            UPDATE pokemons
            SET download_count = download_count + 1
            WHERE id IN (SELECT pokemon_id FROM bundle_pokemons WHERE bundle_id = ?)
            "#,
        )
        .bind(bundle_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    /// Admin deletion. Membership rows cascade; member pokemons survive.
    pub async fn delete_bundle_by_code(&self, code: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM bundles WHERE download_code = ?")
            .bind(code)
            .execute(&**self)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db_with_pokemons(n: usize) -> (Database, Vec<i64>) {
        let db = Database::in_memory().await.expect("setup");
        let mut ids = Vec::new();
        for i in 0..n {
            let id = db
                .insert_pokemon(&format!("member-{i}"), true, &format!("{i:010}"), "7")
                .await
                .unwrap();
            ids.push(id);
        }
        (db, ids)
    }

    #[tokio::test]
    async fn member_set_match_is_order_independent() {
        let (db, ids) = db_with_pokemons(2).await;
        db.insert_bundle(true, "5555555555", "7", "7", &[ids[0], ids[1]])
            .await
            .unwrap();

        let found = db
            .find_bundle_by_member_set(&[ids[1], ids[0]])
            .await
            .unwrap();
        assert_eq!(found, Some("5555555555".to_string()));
    }

    #[tokio::test]
    async fn partial_overlap_is_not_a_match() {
        let (db, ids) = db_with_pokemons(3).await;
        db.insert_bundle(true, "5555555555", "7", "7", &[ids[0], ids[1]])
            .await
            .unwrap();

        // superset of the stored membership
        assert_eq!(
            db.find_bundle_by_member_set(&[ids[0], ids[1], ids[2]])
                .await
                .unwrap(),
            None
        );
        // subset of the stored membership
        assert_eq!(db.find_bundle_by_member_set(&[ids[0]]).await.unwrap(), None);
        // disjoint-ish set of the same cardinality
        assert_eq!(
            db.find_bundle_by_member_set(&[ids[1], ids[2]]).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn increment_propagates_to_members() {
        let (db, ids) = db_with_pokemons(2).await;
        db.insert_bundle(true, "5555555555", "7", "7", &ids)
            .await
            .unwrap();

        db.increment_bundle_download("5555555555").await.unwrap();
        db.increment_bundle_download("no-such-code").await.unwrap();

        let bundles = db.list_bundles(1, 30, &Search::default()).await.unwrap();
        assert_eq!(bundles.len(), 1);

        let pokemons = db.list_pokemons(1, 30, &Search::default()).await.unwrap();
        assert!(pokemons.iter().all(|p| p.download_count == 1));
    }

    #[tokio::test]
    async fn delete_bundle_keeps_members() {
        let (db, ids) = db_with_pokemons(2).await;
        let bundle_id = db
            .insert_bundle(true, "5555555555", "7", "7", &ids)
            .await
            .unwrap();

        assert!(db.delete_bundle_by_code("5555555555").await.unwrap());
        assert!(!db.delete_bundle_by_code("5555555555").await.unwrap());

        let memberships: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bundle_pokemons WHERE bundle_id = ?")
                .bind(bundle_id)
                .fetch_one(&*db)
                .await
                .unwrap();
        assert_eq!(memberships, 0);
        assert_eq!(db.count_pokemons(&Search::default()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn deleting_a_member_cascades_its_membership() {
        let (db, ids) = db_with_pokemons(2).await;
        db.insert_bundle(true, "5555555555", "7", "7", &ids)
            .await
            .unwrap();

        assert!(db.delete_pokemon_by_code("0000000000").await.unwrap());

        let memberships: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bundle_pokemons")
            .fetch_one(&*db)
            .await
            .unwrap();
        assert_eq!(memberships, 1);
        // the bundle itself survives
        assert_eq!(db.count_bundles(&Search::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn generation_filter_requires_min_and_max() {
        let (db, ids) = db_with_pokemons(2).await;
        db.insert_bundle(true, "5555555555", "2", "6", &ids)
            .await
            .unwrap();

        let matching = Search {
            generations: Some(vec!["2".into(), "6".into()]),
            ..Search::default()
        };
        assert_eq!(db.count_bundles(&matching).await.unwrap(), 1);

        // only one bound present in the requested set: no match
        let min_only = Search {
            generations: Some(vec!["2".into(), "4".into()]),
            ..Search::default()
        };
        assert_eq!(db.count_bundles(&min_only).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_inlines_members() {
        let (db, ids) = db_with_pokemons(2).await;
        db.insert_bundle(true, "5555555555", "7", "7", &ids)
            .await
            .unwrap();

        let bundles = db.list_bundles(1, 30, &Search::default()).await.unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].count, 2);
        assert_eq!(bundles[0].pokemons.len(), 2);
        assert_eq!(bundles[0].download_codes.len(), 2);
    }
}

//! Background integrity reconciler.
//!
//! Periodically walks every stored pokemon row and re-validates it against
//! the oracle: recompute the content hash, re-parse the payload, and
//! re-judge legality. Rows the oracle can still read get their derived
//! fields repaired in place; rows it cannot read are purged (bundle
//! membership rows cascade with them). Oracle outages never destroy data:
//! a row whose oracle call fails is skipped until the next cycle.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tokio::sync::watch;

use crate::database::{content_hash, is_unique_violation, Database};
use crate::oracle::Oracle;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    /// Rows examined per transaction.
    pub batch_size: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            batch_size: 1_000,
        }
    }
}

/// Counters from one full sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub checked: u64,
    pub legality_updates: u64,
    pub repaired: u64,
    pub purged: u64,
    pub skipped: u64,
}

#[derive(Debug, sqlx::FromRow)]
struct StoredRow {
    id: i64,
    base64: String,
    base64_hash: String,
    generation: String,
    legal: bool,
}

/// What a sweep decided to do with one row.
enum Action {
    Keep,
    UpdateLegality(bool),
    Repair {
        base64_hash: String,
        generation: String,
        legal: bool,
    },
    Purge,
    Skip,
}

pub struct Reconciler {
    db: Database,
    oracle: Arc<dyn Oracle>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(db: Database, oracle: Arc<dyn Oracle>, config: ReconcilerConfig) -> Self {
        Self { db, oracle, config }
    }

    /// Sweep on the configured interval until shutdown is signalled.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<()>) {
        // ignore any signal state predating this task
        shutdown_rx.borrow_and_update();

        loop {
            match self.run_once(&mut shutdown_rx).await {
                Ok(summary) => tracing::info!(
                    checked = summary.checked,
                    legality_updates = summary.legality_updates,
                    repaired = summary.repaired,
                    purged = summary.purged,
                    skipped = summary.skipped,
                    "reconciler sweep complete"
                ),
                Err(err) => tracing::error!("reconciler sweep failed: {err}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => (),
                _ = shutdown_rx.changed() => {
                    tracing::debug!("reconciler shutting down");
                    return;
                }
            }
        }
    }

    /// One sweep over the stored rows, in id order, batch by batch. A
    /// shutdown signal ends the sweep at the next batch boundary.
    pub async fn run_once(
        &mut self,
        shutdown_rx: &mut watch::Receiver<()>,
    ) -> Result<RunSummary, sqlx::Error> {
        let mut summary = RunSummary::default();
        let mut last_id = 0i64;

        loop {
            let rows: Vec<StoredRow> = sqlx::query_as(
                r#"
                SELECT id, base64, base64_hash, generation, legal
                FROM pokemons
                WHERE id > ?
                ORDER BY id
                LIMIT ?
                "#,
            )
            .bind(last_id)
            .bind(self.config.batch_size as i64)
            .fetch_all(&*self.db)
            .await?;

            if rows.is_empty() {
                break;
            }
            last_id = rows[rows.len() - 1].id;

            let mut actions = Vec::with_capacity(rows.len());
            for row in &rows {
                summary.checked += 1;
                actions.push((row.id, self.examine(row).await));
            }

            let mut tx = self.db.begin().await?;
            for (id, action) in actions {
                match action {
                    Action::Keep => (),
                    Action::Skip => summary.skipped += 1,
                    Action::UpdateLegality(legal) => {
                        sqlx::query("UPDATE pokemons SET legal = ? WHERE id = ?")
                            .bind(legal)
                            .bind(id)
                            .execute(&mut *tx)
                            .await?;
                        summary.legality_updates += 1;
                    }
                    Action::Repair {
                        base64_hash,
                        generation,
                        legal,
                    } => {
                        let result = sqlx::query(
                            r#"
                            UPDATE pokemons
                            SET base64_hash = ?, generation = ?, legal = ?
                            WHERE id = ?
                            "#,
                        )
                        .bind(&base64_hash)
                        .bind(&generation)
                        .bind(legal)
                        .bind(id)
                        .execute(&mut *tx)
                        .await;

                        match result {
                            Ok(_) => summary.repaired += 1,
                            // the corrected hash belongs to another row, so
                            // this row is a duplicate of it
                            Err(err) if is_unique_violation(&err) => {
                                sqlx::query("DELETE FROM pokemons WHERE id = ?")
                                    .bind(id)
                                    .execute(&mut *tx)
                                    .await?;
                                summary.purged += 1;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    Action::Purge => {
                        sqlx::query("DELETE FROM pokemons WHERE id = ?")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?;
                        summary.purged += 1;
                    }
                }
            }
            tx.commit().await?;

            // a dropped sender counts as shutdown too
            if shutdown_rx.has_changed().unwrap_or(true) {
                tracing::debug!("sweep interrupted by shutdown");
                break;
            }
            if rows.len() < self.config.batch_size as usize {
                break;
            }
        }

        Ok(summary)
    }

    async fn examine(&self, row: &StoredRow) -> Action {
        let recomputed = content_hash(&row.base64);
        let hash_ok = recomputed == row.base64_hash;

        let bytes = match base64::engine::general_purpose::STANDARD.decode(&row.base64) {
            Ok(bytes) => bytes,
            // stored text is not even base64, unreadable for good
            Err(_) => {
                tracing::warn!(id = row.id, "stored payload is not base64, purging");
                return Action::Purge;
            }
        };

        let parsed = match self.oracle.parse(&bytes, &row.generation).await {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(id = row.id, "oracle parse failed, skipping row: {err}");
                return Action::Skip;
            }
        };

        let record = match parsed {
            Some(record) => record,
            None => {
                tracing::warn!(id = row.id, "oracle no longer recognizes payload, purging");
                return Action::Purge;
            }
        };

        let legal = match self.oracle.analyze_legality(&record).await {
            Ok(legal) => legal,
            Err(err) => {
                tracing::warn!(id = row.id, "oracle legality check failed, skipping row: {err}");
                return Action::Skip;
            }
        };

        if !hash_ok {
            tracing::info!(id = row.id, "repairing derived fields");
            return Action::Repair {
                base64_hash: recomputed,
                generation: record.generation,
                legal,
            };
        }

        if legal != row.legal {
            return Action::UpdateLegality(legal);
        }
        Action::Keep
    }
}

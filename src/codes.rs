//! Download code registry: short public codes for fetching stored records.

use rand::Rng;

use crate::database::{Database, EntityKind};

pub const DEFAULT_CODE_LENGTH: usize = 10;

fn draw_code<R: Rng>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

/// Draw decimal-digit codes until one is unused.
///
/// The existence pre-check only avoids wasted inserts; two concurrent
/// callers can still draw the same candidate, so the store's unique index
/// on `download_code` stays the authoritative guard and insert callers
/// retry on conflict.
pub async fn generate_unique(db: &Database, kind: EntityKind) -> Result<String, sqlx::Error> {
    generate_unique_with(db, kind, DEFAULT_CODE_LENGTH, |length| {
        let mut rng = rand::rng();
        draw_code(&mut rng, length)
    })
    .await
}

pub(crate) async fn generate_unique_with<F>(
    db: &Database,
    kind: EntityKind,
    length: usize,
    mut draw: F,
) -> Result<String, sqlx::Error>
where
    F: FnMut(usize) -> String,
{
    loop {
        let code = draw(length);
        if !db.code_exists(kind, &code).await? {
            return Ok(code);
        }
        tracing::debug!(kind = kind.cache_ns(), "download code collision, redrawing");
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn draws_fixed_length_decimal_strings() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let code = draw_code(&mut rng, DEFAULT_CODE_LENGTH);
            assert_eq!(code.len(), DEFAULT_CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn taken_candidate_forces_a_redraw() {
        let db = Database::in_memory().await.expect("setup");
        db.insert_pokemon("payload", true, "1234567890", "7")
            .await
            .unwrap();

        // first draw collides with the stored code, the loser retries
        let mut draws = vec!["1234567890".to_string(), "0987654321".to_string()].into_iter();
        let code = generate_unique_with(&db, EntityKind::Pokemon, DEFAULT_CODE_LENGTH, |_| {
            draws.next().expect("enough candidates")
        })
        .await
        .unwrap();
        assert_eq!(code, "0987654321");
    }

    #[tokio::test]
    async fn kinds_have_independent_code_spaces() {
        let db = Database::in_memory().await.expect("setup");
        db.insert_pokemon("payload", true, "1234567890", "7")
            .await
            .unwrap();

        // the same candidate is free in the bundle namespace
        let mut draws = vec!["1234567890".to_string()].into_iter();
        let code = generate_unique_with(&db, EntityKind::Bundle, DEFAULT_CODE_LENGTH, |_| {
            draws.next().expect("enough candidates")
        })
        .await
        .unwrap();
        assert_eq!(code, "1234567890");
    }
}

//! Search/list engine: translates the legacy JSON search body and composes
//! paginated responses out of the store's list and count operations. Holds
//! no state of its own.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::{Database, EntityKind, Search, Sort, SortField};

/// Named generation aliases the website-era clients still send.
pub fn generation_alias(tag: &str) -> Option<&'static str> {
    match tag {
        "LGPE" => Some("7.1"),
        "BDSP" => Some("8.2"),
        "PLA" => Some("8.1"),
        _ => None,
    }
}

/// Numeric ordering value of a generation tag, `None` for tags that are
/// neither aliases nor numbers.
pub fn generation_value(tag: &str) -> Option<f64> {
    let tag = generation_alias(tag).unwrap_or(tag);
    tag.parse::<f64>().ok()
}

/// The search filter as clients send it. All fields optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generations: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal: Option<bool>,
    /// `true` sorts ascending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_direction: Option<bool>,
    /// `latest` or `popularity`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_code: Option<String>,
}

impl SearchBody {
    pub fn translate(&self) -> Search {
        let generations = self.generations.as_ref().map(|gens| {
            gens.iter()
                .map(|g| generation_alias(g).unwrap_or(g).to_string())
                .collect()
        });

        let field = match self.sort_field.as_deref() {
            Some("popularity") => SortField::DownloadCount,
            // `latest` and anything unrecognized fall back to upload time
            _ => SortField::UploadTime,
        };

        Search {
            generations,
            legal_only: self.legal.unwrap_or(false),
            download_code: self.download_code.clone(),
            sort: Sort {
                field,
                ascending: self.sort_direction.unwrap_or(false),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResults {
    pub page: u32,
    pub pages: u32,
    pub total: i64,
    pub items: Value,
}

/// One filtered, sorted page plus the page arithmetic. `pages` is never 0:
/// an empty result still reports one page.
pub async fn execute(
    db: &Database,
    kind: EntityKind,
    page: u32,
    amount: u32,
    search: &Search,
) -> Result<SearchResults, sqlx::Error> {
    let amount = amount.max(1);

    let (total, items) = match kind {
        EntityKind::Pokemon => {
            let total = db.count_pokemons(search).await?;
            let items: Vec<crate::database::GpssPokemon> = db
                .list_pokemons(page, amount, search)
                .await?
                .into_iter()
                .map(Into::into)
                .collect();
            (total, serde_json::to_value(items))
        }
        EntityKind::Bundle => {
            let total = db.count_bundles(search).await?;
            let items = db.list_bundles(page, amount, search).await?;
            (total, serde_json::to_value(items))
        }
    };
    let items = items.map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    let pages = (total.max(0) as u64).div_ceil(amount as u64).max(1) as u32;

    Ok(SearchResults {
        page,
        pages,
        total,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pagination_arithmetic() {
        let db = Database::in_memory().await.expect("setup");
        for i in 0..45 {
            db.insert_pokemon(&format!("payload-{i}"), true, &format!("{i:010}"), "7")
                .await
                .unwrap();
        }

        let search = Search::default();
        let first = execute(&db, EntityKind::Pokemon, 1, 30, &search)
            .await
            .unwrap();
        assert_eq!(first.pages, 2);
        assert_eq!(first.total, 45);
        assert_eq!(first.items.as_array().unwrap().len(), 30);

        let second = execute(&db, EntityKind::Pokemon, 2, 30, &search)
            .await
            .unwrap();
        assert_eq!(second.items.as_array().unwrap().len(), 15);
    }

    #[tokio::test]
    async fn empty_results_still_report_one_page() {
        let db = Database::in_memory().await.expect("setup");
        let results = execute(&db, EntityKind::Bundle, 1, 30, &Search::default())
            .await
            .unwrap();
        assert_eq!(results.pages, 1);
        assert_eq!(results.total, 0);
        assert_eq!(results.items.as_array().unwrap().len(), 0);
    }

    #[test]
    fn body_translation_maps_aliases_and_sorts() {
        let body = SearchBody {
            generations: Some(vec!["LGPE".into(), "BDSP".into(), "PLA".into(), "4".into()]),
            legal: Some(true),
            sort_field: Some("popularity".into()),
            sort_direction: Some(true),
            download_code: None,
        };
        let search = body.translate();
        assert_eq!(
            search.generations,
            Some(vec![
                "7.1".to_string(),
                "8.2".to_string(),
                "8.1".to_string(),
                "4".to_string()
            ])
        );
        assert!(search.legal_only);
        assert_eq!(search.sort.field, SortField::DownloadCount);
        assert!(search.sort.ascending);

        let default = SearchBody::default().translate();
        assert_eq!(default.sort.field, SortField::UploadTime);
        assert!(!default.sort.ascending);
    }

    #[test]
    fn generation_values_order_numerically() {
        assert_eq!(generation_value("2"), Some(2.0));
        assert_eq!(generation_value("LGPE"), Some(7.1));
        assert_eq!(generation_value("BDSP"), Some(8.2));
        assert_eq!(generation_value("ancient"), None);
    }
}

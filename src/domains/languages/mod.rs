//! Supported-language catalog.
//!
//! A read-only store: admission validates requested languages against it and
//! the matcher fleet is sized from it at startup. The trait allows swapping
//! the Postgres catalog for a static one in tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Language {
    pub id: i32,
    pub name: String,
    pub short_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait LanguageCatalog: Send + Sync {
    /// All active languages, ordered by name.
    async fn all(&self) -> Result<Vec<Language>>;

    /// Look up an active language by its name or short name.
    async fn by_name(&self, name: &str) -> Result<Option<Language>>;
}

pub struct PgLanguageCatalog {
    pool: PgPool,
}

impl PgLanguageCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LanguageCatalog for PgLanguageCatalog {
    async fn all(&self) -> Result<Vec<Language>> {
        let languages = sqlx::query_as::<_, Language>(
            r#"
            SELECT id, name, short_name, is_active, created_at, updated_at
            FROM languages
            WHERE is_active = true
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(languages)
    }

    async fn by_name(&self, name: &str) -> Result<Option<Language>> {
        let language = sqlx::query_as::<_, Language>(
            r#"
            SELECT id, name, short_name, is_active, created_at, updated_at
            FROM languages
            WHERE (name = $1 OR short_name = $1) AND is_active = true
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(language)
    }
}

/// Fixed catalog for tests and single-process development.
pub struct StaticCatalog {
    languages: Vec<Language>,
}

impl StaticCatalog {
    /// Build a catalog from `(name, short_name)` pairs.
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let now = Utc::now();
        let languages = pairs
            .iter()
            .enumerate()
            .map(|(i, (name, short_name))| Language {
                id: i as i32 + 1,
                name: name.to_string(),
                short_name: short_name.to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .collect();
        Self { languages }
    }
}

#[async_trait]
impl LanguageCatalog for StaticCatalog {
    async fn all(&self) -> Result<Vec<Language>> {
        Ok(self.languages.clone())
    }

    async fn by_name(&self, name: &str) -> Result<Option<Language>> {
        Ok(self
            .languages
            .iter()
            .find(|l| l.name == name || l.short_name == name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_catalog_matches_name_and_short_name() {
        let catalog = StaticCatalog::new(&[("English", "en"), ("Spanish", "es")]);

        assert_eq!(
            catalog.by_name("English").await.unwrap().unwrap().short_name,
            "en"
        );
        assert_eq!(catalog.by_name("es").await.unwrap().unwrap().name, "Spanish");
        assert!(catalog.by_name("Klingon").await.unwrap().is_none());
        assert_eq!(catalog.all().await.unwrap().len(), 2);
    }
}

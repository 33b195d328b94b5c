use crate::models::{CssVariable, TypographyForm, TypographyStyle, VariableForm};
use async_trait::async_trait;
use sqlx::{PgPool, query_builder::QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

/// Repository Trait
///
/// Persistence contract for the design tokens the panel edits. Handlers only see
/// `Arc<dyn Repository>`, so tests swap in an in-memory implementation.
///
/// Database failures are returned as `Err`; a missing row is `Ok(None)`.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Typography ---
    async fn list_typography(&self) -> Result<Vec<TypographyStyle>, sqlx::Error>;
    async fn update_typography(
        &self,
        id: Uuid,
        form: TypographyForm,
    ) -> Result<Option<TypographyStyle>, sqlx::Error>;

    // --- CSS variables ---
    async fn list_variables(&self, category: Option<String>) -> Result<Vec<CssVariable>, sqlx::Error>;
    async fn update_variable(&self, id: Uuid, form: VariableForm) -> Result<Option<CssVariable>, sqlx::Error>;
}

/// RepositoryState
///
/// The persistence layer as shared through the application state.
pub type RepositoryState = Arc<dyn Repository>;

const TYPOGRAPHY_COLUMNS: &str = "id, class_name, font_size, font_size_unit, font_weight, color, \
     line_height, line_height_unit, letter_spacing, letter_spacing_unit, text_transform, \
     font_style, border_radius, border_radius_unit, created_at, updated_at";

const VARIABLE_COLUMNS: &str =
    "id, variable_name, variable_value, category, description, created_at, updated_at";

/// PostgresRepository
///
/// `Repository` backed by the project's Postgres database (see `schema.sql`).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn list_typography(&self) -> Result<Vec<TypographyStyle>, sqlx::Error> {
        let sql = format!("SELECT {TYPOGRAPHY_COLUMNS} FROM typography_styles ORDER BY class_name ASC");
        sqlx::query_as::<_, TypographyStyle>(&sql)
            .fetch_all(&self.pool)
            .await
            .inspect_err(|e| tracing::error!("list_typography error: {:?}", e))
    }

    /// update_typography
    ///
    /// Overwrites every editable column and stamps `updated_at`.
    async fn update_typography(
        &self,
        id: Uuid,
        form: TypographyForm,
    ) -> Result<Option<TypographyStyle>, sqlx::Error> {
        let sql = format!(
            r#"UPDATE typography_styles SET
                font_size = $1, font_size_unit = $2, font_weight = $3, color = $4,
                line_height = $5, line_height_unit = $6,
                letter_spacing = $7, letter_spacing_unit = $8,
                text_transform = $9, font_style = $10,
                border_radius = $11, border_radius_unit = $12,
                updated_at = now()
            WHERE id = $13
            RETURNING {TYPOGRAPHY_COLUMNS}"#
        );
        sqlx::query_as::<_, TypographyStyle>(&sql)
            .bind(form.font_size)
            .bind(form.font_size_unit)
            .bind(form.font_weight)
            .bind(form.color)
            .bind(form.line_height)
            .bind(form.line_height_unit)
            .bind(form.letter_spacing)
            .bind(form.letter_spacing_unit)
            .bind(form.text_transform)
            .bind(form.font_style)
            .bind(form.border_radius)
            .bind(form.border_radius_unit)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .inspect_err(|e| tracing::error!(%id, "update_typography error: {:?}", e))
    }

    /// list_variables
    ///
    /// Optionally narrowed to one category; ordered by category, then name.
    async fn list_variables(&self, category: Option<String>) -> Result<Vec<CssVariable>, sqlx::Error> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {VARIABLE_COLUMNS} FROM css_variables"));

        if let Some(category) = category {
            builder.push(" WHERE category = ");
            builder.push_bind(category);
        }
        builder.push(" ORDER BY category ASC, variable_name ASC");

        builder
            .build_query_as::<CssVariable>()
            .fetch_all(&self.pool)
            .await
            .inspect_err(|e| tracing::error!("list_variables error: {:?}", e))
    }

    async fn update_variable(&self, id: Uuid, form: VariableForm) -> Result<Option<CssVariable>, sqlx::Error> {
        let sql = format!(
            "UPDATE css_variables SET variable_value = $1, description = $2, updated_at = now() \
             WHERE id = $3 RETURNING {VARIABLE_COLUMNS}"
        );
        sqlx::query_as::<_, CssVariable>(&sql)
            .bind(form.variable_value)
            .bind(form.description)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .inspect_err(|e| tracing::error!(%id, "update_variable error: {:?}", e))
    }
}

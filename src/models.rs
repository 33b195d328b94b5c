use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::BTreeMap, sync::LazyLock};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Allowed values (mirrors the admin form selects) ---

pub const FONT_SIZE_UNITS: [&str; 3] = ["px", "rem", "em"];
pub const LINE_HEIGHT_UNITS: [&str; 3] = ["px", "rem", "unitless"];
pub const LETTER_SPACING_UNITS: [&str; 3] = ["px", "rem", "em"];
pub const BORDER_RADIUS_UNITS: [&str; 3] = ["px", "rem", "%"];
pub const TEXT_TRANSFORMS: [&str; 4] = ["none", "uppercase", "lowercase", "capitalize"];
pub const FONT_STYLES: [&str; 3] = ["normal", "italic", "oblique"];
pub const FONT_WEIGHTS: [i32; 9] = [100, 200, 300, 400, 500, 600, 700, 800, 900];
pub const VARIABLE_CATEGORIES: [&str; 5] = ["colors", "sizes", "animations", "fonts", "buttons"];
pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

// --- Design tokens (mapped to database) ---

/// TypographyStyle
///
/// A typography class from the `typography_styles` table. `class_name` is fixed;
/// everything else is editable from the panel.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct TypographyStyle {
    pub id: Uuid,
    pub class_name: String,
    pub font_size: f64,
    pub font_size_unit: String,
    pub font_weight: i32,
    pub color: String,
    pub line_height: f64,
    pub line_height_unit: String,
    pub letter_spacing: f64,
    pub letter_spacing_unit: String,
    pub text_transform: String,
    pub font_style: String,
    pub border_radius: f64,
    pub border_radius_unit: String,
    #[ts(type = "string | null")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(type = "string | null")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// TypographyForm
///
/// Input payload for PUT /api/typography/{id}: every editable column.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct TypographyForm {
    pub font_size: f64,
    pub font_size_unit: String,
    pub font_weight: i32,
    pub color: String,
    pub line_height: f64,
    pub line_height_unit: String,
    pub letter_spacing: f64,
    pub letter_spacing_unit: String,
    pub text_transform: String,
    pub font_style: String,
    pub border_radius: f64,
    pub border_radius_unit: String,
}

impl TypographyForm {
    /// validate
    ///
    /// Font size, weight and colour are mandatory; every unit and keyword must be one
    /// the site's stylesheet generator understands.
    pub fn validate(&self) -> Result<(), String> {
        if self.font_size <= 0.0 || self.font_weight == 0 || self.color.trim().is_empty() {
            return Err("font_size, font_weight and color are required".to_string());
        }
        if !FONT_WEIGHTS.contains(&self.font_weight) {
            return Err(format!("unsupported font_weight {}", self.font_weight));
        }
        one_of("font_size_unit", &self.font_size_unit, &FONT_SIZE_UNITS)?;
        one_of("line_height_unit", &self.line_height_unit, &LINE_HEIGHT_UNITS)?;
        one_of("letter_spacing_unit", &self.letter_spacing_unit, &LETTER_SPACING_UNITS)?;
        one_of("border_radius_unit", &self.border_radius_unit, &BORDER_RADIUS_UNITS)?;
        one_of("text_transform", &self.text_transform, &TEXT_TRANSFORMS)?;
        one_of("font_style", &self.font_style, &FONT_STYLES)?;
        Ok(())
    }
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), String> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(format!("{field} must be one of {}", allowed.join(", ")))
    }
}

/// CssVariable
///
/// A CSS custom property from the `css_variables` table. `variable_name` is stored
/// without the leading `--`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct CssVariable {
    pub id: Uuid,
    pub variable_name: String,
    pub variable_value: String,
    pub category: String,
    pub description: Option<String>,
    #[ts(type = "string | null")]
    pub created_at: Option<DateTime<Utc>>,
    #[ts(type = "string | null")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// VariableForm
///
/// Input payload for PUT /api/variables/{id}.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct VariableForm {
    pub variable_value: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl VariableForm {
    /// Rejects an empty value and normalises an empty description to `None`.
    pub fn normalized(self) -> Result<Self, String> {
        if self.variable_value.trim().is_empty() {
            return Err("variable_value is required".to_string());
        }
        Ok(Self {
            variable_value: self.variable_value,
            description: self.description.filter(|d| !d.trim().is_empty()),
        })
    }
}

// --- Administrator accounts (identity service) ---

/// AdminUser
///
/// An administrator account as reported by the identity admin API.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct AdminUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub last_sign_in_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[ts(type = "Record<string, unknown> | null")]
    #[schema(value_type = Option<Object>)]
    pub user_metadata: Option<serde_json::Value>,
    #[serde(default)]
    #[ts(type = "Record<string, unknown> | null")]
    #[schema(value_type = Option<Object>)]
    pub app_metadata: Option<serde_json::Value>,
}

/// CreateUserRequest
///
/// Input payload for POST /api/users. The password is passed straight to the
/// identity service and never stored or logged here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default = "default_email_confirm")]
    pub email_confirm: bool,
}

fn default_email_confirm() -> bool {
    true
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err("email and password are required".to_string());
        }
        if !EMAIL_PATTERN.is_match(&self.email) {
            return Err("invalid email format".to_string());
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!("password must be at least {MIN_PASSWORD_LEN} characters"));
        }
        Ok(())
    }
}

/// UsersListResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UsersListResponse {
    pub success: bool,
    pub users: Vec<AdminUser>,
    pub total: usize,
}

/// CreateUserResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateUserResponse {
    pub success: bool,
    pub user: AdminUser,
}

/// SuccessResponse
///
/// Bare acknowledgement, e.g. for DELETE /api/users/{id}.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SuccessResponse {
    pub success: bool,
}

/// TestUserResponse
///
/// Result of POST /api/auth/create-test-user. `user_id` is absent when the test
/// account already existed.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TestUserResponse {
    pub success: bool,
    pub message: String,
    pub email: String,
    pub user_id: Option<Uuid>,
}

/// DataResponse
///
/// Wraps an updated record as `{ "data": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataResponse<T> {
    pub data: T,
}

// --- Page payloads ---

/// DashboardSection
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct DashboardSection {
    pub name: String,
    pub path: String,
}

/// DashboardView
///
/// Payload for GET /dashboard: who is signed in and where they can go.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DashboardView {
    pub user_id: Uuid,
    pub email: String,
    pub sections: Vec<DashboardSection>,
}

/// VariablesView
///
/// Payload for GET /dashboard/variables: the variables (by category, then name)
/// and how many of them fall in each category.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct VariablesView {
    pub variables: Vec<CssVariable>,
    pub total: usize,
    pub stats: BTreeMap<String, usize>,
}

impl VariablesView {
    pub fn new(variables: Vec<CssVariable>) -> Self {
        let mut stats = BTreeMap::new();
        for variable in &variables {
            *stats.entry(variable.category.clone()).or_insert(0) += 1;
        }
        Self {
            total: variables.len(),
            variables,
            stats,
        }
    }
}

/// LoginView
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginView {
    pub page: String,
    pub error: Option<String>,
}

/// LoginForm
///
/// Form body of POST /login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

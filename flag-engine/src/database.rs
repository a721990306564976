use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tokio::time::timeout;
use tracing::{instrument, warn};

use crate::api::errors::FlagError;
use crate::config::Config;
use crate::flags::flag_models::{FeatureFlag, FlagOverride, FlagType, FlagVariant, OverrideValue};

/// Read access to flag definitions and overrides.
///
/// Targets passed to the override lookups are ordered by precedence, earliest first.
#[async_trait]
pub trait FlagRepository: Send + Sync {
    /// Every flag definition in the store.
    async fn list_all_flags(&self) -> Result<Vec<FeatureFlag>, FlagError>;

    /// The override for `flag_key` pinned to one of `targets`.
    ///
    /// A live override beats an expired one, then the earliest matching target wins.
    /// Expired rows can still be returned when nothing live matches.
    async fn find_override(
        &self,
        flag_key: &str,
        targets: &[String],
    ) -> Result<Option<FlagOverride>, FlagError>;

    /// Every override, for any flag, pinned to one of `targets`.
    async fn list_overrides(&self, targets: &[String]) -> Result<Vec<FlagOverride>, FlagError>;
}

const FLAG_COLUMNS: &str = "id::bigint AS id, key, name, description, flag_type::text AS flag_type, enabled, \
     percentage::integer AS percentage, countries, roles, environments, variants, expires_at, \
     created_by, tags, jira_ref, created_at, updated_at";

#[derive(Debug, FromRow)]
pub struct FeatureFlagRow {
    pub id: i64,
    pub key: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub flag_type: String,
    pub enabled: bool,
    pub percentage: Option<i32>,
    pub countries: Option<Vec<String>>,
    pub roles: Option<Vec<String>>,
    pub environments: Option<Vec<String>>,
    pub variants: Option<Value>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub tags: Option<Vec<String>>,
    pub jira_ref: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<FeatureFlagRow> for FeatureFlag {
    type Error = FlagError;

    fn try_from(row: FeatureFlagRow) -> Result<Self, Self::Error> {
        let flag_type: FlagType = serde_json::from_value(Value::String(row.flag_type))
            .map_err(|_| FlagError::DataParsingError)?;

        Ok(FeatureFlag {
            id: Some(row.id),
            flag_type,
            enabled: row.enabled,
            percentage: row.percentage.unwrap_or(100),
            countries: row.countries.unwrap_or_default().into_iter().collect(),
            roles: row.roles.unwrap_or_default().into_iter().collect(),
            environments: row.environments.unwrap_or_default().into_iter().collect(),
            variants: parse_variants(&row.key, row.variants),
            key: row.key,
            name: row.name,
            description: row.description,
            expires_at: row.expires_at,
            created_by: row.created_by,
            tags: row.tags.unwrap_or_default(),
            jira_ref: row.jira_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// A bad entry drops that variant only. The flag itself stays evaluable.
fn parse_variants(flag_key: &str, raw: Option<Value>) -> Vec<FlagVariant> {
    let Some(Value::Array(entries)) = raw else {
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<FlagVariant>(entry) {
            Ok(variant) => Some(variant),
            Err(e) => {
                warn!(flag_key, error = %e, "Skipping malformed variant");
                None
            }
        })
        .collect()
}

#[derive(Debug, FromRow)]
pub struct FlagOverrideRow {
    pub flag_key: String,
    pub target_value: String,
    pub override_value: Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<FlagOverrideRow> for FlagOverride {
    type Error = FlagError;

    fn try_from(row: FlagOverrideRow) -> Result<Self, Self::Error> {
        let override_value: OverrideValue =
            serde_json::from_value(row.override_value).map_err(|_| FlagError::DataParsingError)?;

        Ok(FlagOverride {
            flag_key: row.flag_key,
            target_value: row.target_value,
            override_value,
            expires_at: row.expires_at,
        })
    }
}

pub struct PgFlagRepository {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgFlagRepository {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    /// Builds a lazily connecting pool, so the service can start while the database is down
    /// and report the outage through readiness instead.
    pub fn from_config(config: &Config) -> Result<Self, FlagError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_pg_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_lazy(&config.database_url)?;

        Ok(Self::new(pool, config.query_timeout()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_db_error(e: sqlx::Error) -> FlagError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            FlagError::DatabaseUnavailable
        }
        other => FlagError::DatabaseError(other),
    }
}

// Rows that fail to convert are logged and skipped so one bad row can't blank out the rest
fn convert_rows<R, T>(rows: Vec<R>, kind: &'static str) -> Vec<T>
where
    T: TryFrom<R, Error = FlagError>,
{
    rows.into_iter()
        .filter_map(|row| match T::try_from(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(kind, error = %e, "Skipping row that failed to parse");
                None
            }
        })
        .collect()
}

// Rows arrive in precedence order. A row with a malformed payload is skipped, not fatal,
// matching what the batch lookup does.
fn first_valid_override(rows: Vec<FlagOverrideRow>) -> Option<FlagOverride> {
    convert_rows(rows, "flag_override").into_iter().next()
}

#[async_trait]
impl FlagRepository for PgFlagRepository {
    #[instrument(skip_all)]
    async fn list_all_flags(&self) -> Result<Vec<FeatureFlag>, FlagError> {
        let query = format!("SELECT {FLAG_COLUMNS} FROM feature_flags");
        let rows = timeout(
            self.query_timeout,
            sqlx::query_as::<_, FeatureFlagRow>(&query).fetch_all(&self.pool),
        )
        .await?
        .map_err(map_db_error)?;

        Ok(convert_rows(rows, "feature_flag"))
    }

    #[instrument(skip_all, fields(flag_key = %flag_key))]
    async fn find_override(
        &self,
        flag_key: &str,
        targets: &[String],
    ) -> Result<Option<FlagOverride>, FlagError> {
        if targets.is_empty() {
            return Ok(None);
        }

        let query = r#"
            SELECT flag_key, target_value, override_value, expires_at
            FROM flag_overrides
            WHERE flag_key = $1 AND target_value = ANY($2)
            ORDER BY (expires_at IS NULL OR expires_at >= now()) DESC,
                     array_position($2, target_value)
        "#;
        let rows = timeout(
            self.query_timeout,
            sqlx::query_as::<_, FlagOverrideRow>(query)
                .bind(flag_key)
                .bind(targets)
                .fetch_all(&self.pool),
        )
        .await?
        .map_err(map_db_error)?;

        Ok(first_valid_override(rows))
    }

    #[instrument(skip_all)]
    async fn list_overrides(&self, targets: &[String]) -> Result<Vec<FlagOverride>, FlagError> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let query = r#"
            SELECT flag_key, target_value, override_value, expires_at
            FROM flag_overrides
            WHERE target_value = ANY($1)
        "#;
        let rows = timeout(
            self.query_timeout,
            sqlx::query_as::<_, FlagOverrideRow>(query)
                .bind(targets)
                .fetch_all(&self.pool),
        )
        .await?
        .map_err(map_db_error)?;

        Ok(convert_rows(rows, "flag_override"))
    }
}

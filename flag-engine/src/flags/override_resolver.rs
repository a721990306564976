use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    api::errors::FlagError,
    database::FlagRepository,
    flags::flag_models::{FlagContext, FlagOverride, OverrideValue},
};

/// Finds manual overrides for a context.
///
/// Targets are tried as user id, then session id, then country. A live override always
/// beats an expired one, and among live ones the earliest target wins.
pub struct OverrideResolver {
    repository: Arc<dyn FlagRepository>,
}

impl OverrideResolver {
    pub fn new(repository: Arc<dyn FlagRepository>) -> Self {
        Self { repository }
    }

    pub async fn resolve(
        &self,
        flag_key: &str,
        ctx: &FlagContext,
        now: DateTime<Utc>,
    ) -> Result<Option<OverrideValue>, FlagError> {
        let targets = ctx.override_targets();
        if targets.is_empty() {
            return Ok(None);
        }

        let found = self.repository.find_override(flag_key, &targets).await?;
        Ok(found.and_then(|o| live_value(o, now)))
    }

    /// Overrides for every flag at once, keyed by flag key.
    pub async fn resolve_all(
        &self,
        ctx: &FlagContext,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, OverrideValue>, FlagError> {
        let targets = ctx.override_targets();
        if targets.is_empty() {
            return Ok(HashMap::new());
        }

        let overrides = self.repository.list_overrides(&targets).await?;

        let mut best: HashMap<String, (usize, FlagOverride)> = HashMap::new();
        for candidate in overrides {
            if candidate.is_expired_at(now) {
                continue;
            }
            let Some(position) = targets.iter().position(|t| *t == candidate.target_value)
            else {
                continue;
            };
            match best.get(&candidate.flag_key) {
                Some((existing, _)) if *existing <= position => {}
                _ => {
                    best.insert(candidate.flag_key.clone(), (position, candidate));
                }
            }
        }

        Ok(best
            .into_iter()
            .map(|(key, (_, o))| (key, o.override_value))
            .collect())
    }
}

fn live_value(flag_override: FlagOverride, now: DateTime<Utc>) -> Option<OverrideValue> {
    if flag_override.is_expired_at(now) {
        debug!(
            flag_key = %flag_override.flag_key,
            target = %flag_override.target_value,
            "Ignoring expired override"
        );
        return None;
    }
    Some(flag_override.override_value)
}

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    api::errors::FlagError,
    database::FlagRepository,
    flags::flag_models::{
        FeatureFlag, FlagContext, FlagOverride, FlagType, FlagVariant, OverrideValue,
    },
};

/// A signed-in user in Poland, evaluated in production.
pub fn context() -> FlagContext {
    FlagContext {
        user_id: Some("user-123".to_string()),
        session_id: None,
        country: Some("PL".to_string()),
        role: None,
        environment: "production".to_string(),
    }
}

/// An enabled boolean flag with no targeting and a full rollout.
pub fn flag(key: &str) -> FeatureFlag {
    FeatureFlag {
        id: None,
        key: key.to_string(),
        name: None,
        description: None,
        flag_type: FlagType::Boolean,
        enabled: true,
        percentage: 100,
        countries: HashSet::new(),
        roles: HashSet::new(),
        environments: HashSet::new(),
        variants: Vec::new(),
        expires_at: None,
        created_by: None,
        tags: Vec::new(),
        jira_ref: None,
        created_at: None,
        updated_at: None,
    }
}

pub fn variant_flag(key: &str, table: &[(&str, i64)]) -> FeatureFlag {
    FeatureFlag {
        flag_type: FlagType::Variant,
        variants: variants(table),
        ..flag(key)
    }
}

pub fn set_of(values: &[&str]) -> HashSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn variants(table: &[(&str, i64)]) -> Vec<FlagVariant> {
    table
        .iter()
        .map(|(name, weight)| FlagVariant {
            name: name.to_string(),
            weight: *weight,
        })
        .collect()
}

pub fn override_for(
    flag_key: &str,
    target_value: &str,
    enabled: bool,
    variant: Option<&str>,
) -> FlagOverride {
    FlagOverride {
        flag_key: flag_key.to_string(),
        target_value: target_value.to_string(),
        override_value: OverrideValue {
            enabled,
            variant: variant.map(str::to_string),
        },
        expires_at: None,
    }
}

pub fn expiring(mut flag_override: FlagOverride, expires_at: DateTime<Utc>) -> FlagOverride {
    flag_override.expires_at = Some(expires_at);
    flag_override
}

#[derive(Default)]
struct MockState {
    flags: Vec<FeatureFlag>,
    overrides: Vec<FlagOverride>,
    failing: bool,
    calls: Vec<&'static str>,
}

/// In-memory repository that records every call and can be switched into a failing state.
#[derive(Default)]
pub struct MockFlagRepository {
    state: Mutex<MockState>,
}

impl MockFlagRepository {
    pub fn new(flags: Vec<FeatureFlag>) -> Self {
        Self {
            state: Mutex::new(MockState {
                flags,
                ..Default::default()
            }),
        }
    }

    pub fn with_overrides(self, overrides: Vec<FlagOverride>) -> Self {
        self.state().overrides = overrides;
        self
    }

    pub fn set_flags(&self, flags: Vec<FeatureFlag>) {
        self.state().flags = flags;
    }

    pub fn set_overrides(&self, overrides: Vec<FlagOverride>) {
        self.state().overrides = overrides;
    }

    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    pub fn list_all_flags_calls(&self) -> usize {
        self.call_count("list_all_flags")
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, operation: &'static str) -> Result<MutexGuard<'_, MockState>, FlagError> {
        let mut state = self.state();
        state.calls.push(operation);
        if state.failing {
            return Err(FlagError::DatabaseUnavailable);
        }
        Ok(state)
    }
}

#[async_trait]
impl FlagRepository for MockFlagRepository {
    async fn list_all_flags(&self) -> Result<Vec<FeatureFlag>, FlagError> {
        let state = self.record("list_all_flags")?;
        Ok(state.flags.clone())
    }

    async fn find_override(
        &self,
        flag_key: &str,
        targets: &[String],
    ) -> Result<Option<FlagOverride>, FlagError> {
        let state = self.record("find_override")?;
        let now = Utc::now();
        let best = state
            .overrides
            .iter()
            .filter(|o| o.flag_key == flag_key)
            .filter_map(|o| {
                let position = targets.iter().position(|t| *t == o.target_value)?;
                Some((o.is_expired_at(now), position, o))
            })
            .min_by_key(|(expired, position, _)| (*expired, *position))
            .map(|(_, _, o)| o.clone());
        Ok(best)
    }

    async fn list_overrides(&self, targets: &[String]) -> Result<Vec<FlagOverride>, FlagError> {
        let state = self.record("list_overrides")?;
        Ok(state
            .overrides
            .iter()
            .filter(|o| targets.contains(&o.target_value))
            .cloned()
            .collect())
    }
}

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flags::flag_source::FlagSource;

pub const ANONYMOUS_IDENTIFIER: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    #[default]
    Boolean,
    Percentage,
    Variant,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlagVariant {
    pub name: String,
    // Weights are not validated on write, so anything that fits in a JSON number is accepted here
    pub weight: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeatureFlag {
    #[serde(default)]
    pub id: Option<i64>,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "type")]
    pub flag_type: FlagType,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_percentage")]
    pub percentage: i32,
    #[serde(default)]
    pub countries: HashSet<String>,
    #[serde(default)]
    pub roles: HashSet<String>,
    #[serde(default)]
    pub environments: HashSet<String>,
    #[serde(default)]
    pub variants: Vec<FlagVariant>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub jira_ref: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_percentage() -> i32 {
    100
}

impl FeatureFlag {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OverrideValue {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// A manual pin for one flag, keyed by a user id, session id or country code.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagOverride {
    pub flag_key: String,
    pub target_value: String,
    pub override_value: OverrideValue,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl FlagOverride {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

/// Per-request evaluation input. Assembled by the caller, never looked up implicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlagContext {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub environment: String,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl FlagContext {
    /// The identity used for bucketing. A logged in user keeps their bucket across sessions.
    pub fn bucketing_identifier(&self) -> &str {
        non_empty(&self.user_id)
            .or_else(|| non_empty(&self.session_id))
            .unwrap_or(ANONYMOUS_IDENTIFIER)
    }

    pub fn effective_role(&self) -> &str {
        non_empty(&self.role).unwrap_or(ANONYMOUS_IDENTIFIER)
    }

    pub fn country(&self) -> Option<&str> {
        non_empty(&self.country)
    }

    /// Values an override may be pinned to, in precedence order: user, session, country.
    pub fn override_targets(&self) -> Vec<String> {
        [&self.user_id, &self.session_id, &self.country]
            .into_iter()
            .filter_map(non_empty)
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagResult {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub source: FlagSource,
}

impl FlagResult {
    pub fn disabled(source: FlagSource) -> Self {
        Self {
            enabled: false,
            variant: None,
            source,
        }
    }

    /// An empty variant in an override payload counts as no variant.
    pub fn from_override(value: OverrideValue) -> Self {
        Self {
            enabled: value.enabled,
            variant: value.variant.filter(|v| !v.is_empty()),
            source: FlagSource::Override,
        }
    }
}

/// Compact payload used to hydrate a client in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EvaluatedFlags {
    pub flags: HashMap<String, bool>,
    pub variants: HashMap<String, String>,
}

impl EvaluatedFlags {
    pub fn insert(&mut self, key: &str, result: FlagResult) {
        self.flags.insert(key.to_string(), result.enabled);
        if let Some(variant) = result.variant.filter(|v| !v.is_empty()) {
            self.variants.insert(key.to_string(), variant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_minimal_flag_uses_defaults() {
        let flag: FeatureFlag = serde_json::from_value(json!({
            "key": "new_search",
            "enabled": true,
        }))
        .unwrap();

        assert_eq!(flag.flag_type, FlagType::Boolean);
        assert_eq!(flag.percentage, 100);
        assert!(flag.countries.is_empty());
        assert!(flag.variants.is_empty());
        assert!(flag.expires_at.is_none());
    }

    #[test]
    fn test_deserialize_accepts_type_alias() {
        let flag: FeatureFlag = serde_json::from_value(json!({
            "key": "checkout",
            "type": "variant",
            "enabled": true,
            "variants": [{"name": "control", "weight": 50}, {"name": "treatment", "weight": 50}],
            "expires_at": "2020-01-01T00:00:00Z",
        }))
        .unwrap();

        assert_eq!(flag.flag_type, FlagType::Variant);
        assert_eq!(flag.variants.len(), 2);
        assert!(flag.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_bucketing_identifier_precedence() {
        let ctx = FlagContext {
            user_id: Some("user-1".to_string()),
            session_id: Some("sess-1".to_string()),
            ..Default::default()
        };
        assert_eq!(ctx.bucketing_identifier(), "user-1");

        let ctx = FlagContext {
            session_id: Some("sess-1".to_string()),
            ..Default::default()
        };
        assert_eq!(ctx.bucketing_identifier(), "sess-1");

        let ctx = FlagContext {
            user_id: Some("".to_string()),
            ..Default::default()
        };
        assert_eq!(ctx.bucketing_identifier(), ANONYMOUS_IDENTIFIER);
    }

    #[test]
    fn test_override_targets_skip_absent_values() {
        let ctx = FlagContext {
            user_id: Some("user-1".to_string()),
            country: Some("PL".to_string()),
            ..Default::default()
        };
        assert_eq!(ctx.override_targets(), vec!["user-1", "PL"]);
        assert!(FlagContext::default().override_targets().is_empty());
    }

    #[test]
    fn test_override_with_empty_variant_has_no_variant() {
        let result = FlagResult::from_override(OverrideValue {
            enabled: true,
            variant: Some("".to_string()),
        });
        assert_eq!(result.variant, None);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"enabled": true, "source": "override"})
        );

        let result = FlagResult::from_override(OverrideValue {
            enabled: false,
            variant: Some("B".to_string()),
        });
        assert_eq!(result.variant.as_deref(), Some("B"));
    }

    #[test]
    fn test_evaluated_flags_omits_missing_and_empty_variants() {
        let mut evaluated = EvaluatedFlags::default();
        evaluated.insert("plain", FlagResult::disabled(FlagSource::Kill));
        evaluated.insert(
            "pinned",
            FlagResult::from_override(OverrideValue {
                enabled: true,
                variant: Some("".to_string()),
            }),
        );
        evaluated.insert(
            "experiment",
            FlagResult {
                enabled: true,
                variant: Some("treatment".to_string()),
                source: FlagSource::Rule,
            },
        );

        assert_eq!(
            serde_json::to_value(&evaluated).unwrap(),
            json!({
                "flags": {"plain": false, "pinned": true, "experiment": true},
                "variants": {"experiment": "treatment"},
            })
        );
    }
}

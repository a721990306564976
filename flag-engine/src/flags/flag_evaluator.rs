use chrono::{DateTime, Utc};

use crate::flags::{
    bucketing::{assign_variant, bucket},
    flag_models::{FeatureFlag, FlagContext, FlagResult, FlagType},
    flag_source::FlagSource,
};

/// Evaluates a flag against a context using the current wall clock for expiry.
pub fn evaluate(flag: Option<&FeatureFlag>, ctx: &FlagContext) -> FlagResult {
    evaluate_at(flag, ctx, Utc::now())
}

/// Evaluates a flag against a context as of `now`.
///
/// The checks run in a fixed order and the first failing one decides the reported source:
///
/// 1. missing definition -> `default`
/// 2. expired -> `expired` (before the kill switch, so expired and disabled reports `expired`)
/// 3. kill switch -> `kill`
/// 4. environment, 5. country, 6. role targeting -> `rule`
/// 7. percentage rollout -> `rule`
/// 8. variant assignment for variant flags
/// 9. enabled
///
/// An empty targeting set matches everything. A missing role is the literal role
/// `anonymous`, never a wildcard.
pub fn evaluate_at(flag: Option<&FeatureFlag>, ctx: &FlagContext, now: DateTime<Utc>) -> FlagResult {
    let Some(flag) = flag else {
        return FlagResult::disabled(FlagSource::Default);
    };

    if flag.is_expired_at(now) {
        return FlagResult::disabled(FlagSource::Expired);
    }

    if !flag.enabled {
        return FlagResult::disabled(FlagSource::Kill);
    }

    if !flag.environments.is_empty() && !flag.environments.contains(&ctx.environment) {
        return FlagResult::disabled(FlagSource::Rule);
    }

    if !flag.countries.is_empty()
        && !ctx
            .country()
            .is_some_and(|country| flag.countries.contains(country))
    {
        return FlagResult::disabled(FlagSource::Rule);
    }

    if !flag.roles.is_empty() && !flag.roles.contains(ctx.effective_role()) {
        return FlagResult::disabled(FlagSource::Rule);
    }

    let identifier = ctx.bucketing_identifier();

    if flag.percentage < 100
        && i64::from(bucket(&flag.key, identifier)) >= i64::from(flag.percentage)
    {
        return FlagResult::disabled(FlagSource::Rule);
    }

    match flag.flag_type {
        FlagType::Variant if !flag.variants.is_empty() => FlagResult {
            enabled: true,
            variant: Some(assign_variant(&flag.key, identifier, &flag.variants)),
            source: FlagSource::Rule,
        },
        FlagType::Variant | FlagType::Boolean | FlagType::Percentage => FlagResult {
            enabled: true,
            variant: None,
            source: FlagSource::Rule,
        },
    }
}

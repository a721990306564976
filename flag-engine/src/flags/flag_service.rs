use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::{
    api::errors::FlagError,
    database::FlagRepository,
    flags::{
        flag_evaluator::evaluate_at,
        flag_models::{EvaluatedFlags, FlagContext, FlagResult, OverrideValue},
        flag_source::FlagSource,
        flag_store::FlagStore,
        override_resolver::OverrideResolver,
    },
    metrics_consts::{FLAG_EVALUATION_COUNTER, FLAG_OVERRIDE_LOOKUP_ERROR_COUNTER},
    metrics_utils::inc,
};

/// Evaluates flags for a request: cached definitions, then overrides, then rules.
pub struct FlagService {
    store: Arc<FlagStore>,
    overrides: OverrideResolver,
}

impl FlagService {
    pub fn new(store: Arc<FlagStore>, repository: Arc<dyn FlagRepository>) -> Self {
        Self {
            store,
            overrides: OverrideResolver::new(repository),
        }
    }

    pub fn store(&self) -> &Arc<FlagStore> {
        &self.store
    }

    /// Evaluates one flag. An unknown key is `default` and never consults overrides.
    ///
    /// Overrides win over every rule, including the kill switch and expiry. If the
    /// override lookup fails the rules decide.
    #[instrument(skip_all, fields(flag_key = %flag_key))]
    pub async fn evaluate(&self, flag_key: &str, ctx: &FlagContext) -> Result<FlagResult, FlagError> {
        let snapshot = self.store.load().await?;
        let now = Utc::now();

        let Some(flag) = snapshot.get(flag_key) else {
            return Ok(record(FlagResult::disabled(FlagSource::Default)));
        };

        let result = match self.overrides.resolve(flag_key, ctx, now).await {
            Ok(Some(value)) => FlagResult::from_override(value),
            Ok(None) => evaluate_at(Some(flag), ctx, now),
            Err(e) => {
                override_lookup_failed(&e);
                evaluate_at(Some(flag), ctx, now)
            }
        };

        debug!(enabled = result.enabled, source = %result.source, "Evaluated flag");
        Ok(record(result))
    }

    pub async fn is_enabled(&self, flag_key: &str, ctx: &FlagContext) -> Result<bool, FlagError> {
        Ok(self.evaluate(flag_key, ctx).await?.enabled)
    }

    /// The variant reported by `evaluate`. Rules only assign one to enabled variant flags;
    /// an override's variant is returned as pinned, even on a disabled override.
    pub async fn get_variant(
        &self,
        flag_key: &str,
        ctx: &FlagContext,
    ) -> Result<Option<String>, FlagError> {
        Ok(self.evaluate(flag_key, ctx).await?.variant)
    }

    /// Evaluates every known flag for a context with a single batched override lookup.
    #[instrument(skip_all)]
    pub async fn evaluate_all(&self, ctx: &FlagContext) -> Result<EvaluatedFlags, FlagError> {
        let snapshot = self.store.load().await?;
        let now = Utc::now();

        let mut overrides: HashMap<String, OverrideValue> =
            match self.overrides.resolve_all(ctx, now).await {
                Ok(overrides) => overrides,
                Err(e) => {
                    override_lookup_failed(&e);
                    HashMap::new()
                }
            };

        let mut evaluated = EvaluatedFlags::default();
        for (key, flag) in snapshot.iter() {
            let result = match overrides.remove(key) {
                Some(value) => FlagResult::from_override(value),
                None => evaluate_at(Some(flag), ctx, now),
            };
            evaluated.insert(key, record(result));
        }

        debug!(flag_count = evaluated.flags.len(), "Evaluated all flags");
        Ok(evaluated)
    }
}

fn record(result: FlagResult) -> FlagResult {
    inc(
        FLAG_EVALUATION_COUNTER,
        &[("source".to_string(), result.source.to_string())],
        1,
    );
    result
}

fn override_lookup_failed(e: &FlagError) {
    warn!(error = %e, "Override lookup failed, falling back to rules");
    inc(
        FLAG_OVERRIDE_LOOKUP_ERROR_COUNTER,
        &[("reason".to_string(), e.error_code().to_string())],
        1,
    );
}

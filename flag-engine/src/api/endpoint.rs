use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use axum_client_ip::InsecureClientIp;
use tracing::{debug, instrument};

use crate::{
    api::{
        errors::FlagError,
        types::{FlagResponse, FlagsQueryParams},
    },
    flags::flag_models::EvaluatedFlags,
    router,
};

fn decode_query(
    query: Result<Query<FlagsQueryParams>, QueryRejection>,
) -> Result<FlagsQueryParams, FlagError> {
    query
        .map(|Query(params)| params)
        .map_err(|e| FlagError::RequestDecodingError(e.body_text()))
}

/// Every flag evaluated for the caller, as `{flags, variants}`.
#[instrument(skip_all, fields(ip = %ip))]
pub async fn flags(
    State(state): State<router::State>,
    InsecureClientIp(ip): InsecureClientIp,
    query: Result<Query<FlagsQueryParams>, QueryRejection>,
) -> Result<Json<EvaluatedFlags>, FlagError> {
    let ctx = decode_query(query)?.into_context(&state.config.environment);
    debug!(user_id = ?ctx.user_id, session_id = ?ctx.session_id, "Evaluating all flags");

    let evaluated = state.flag_service.evaluate_all(&ctx).await?;
    Ok(Json(evaluated))
}

/// A single flag with the reason for its value.
#[instrument(skip_all, fields(ip = %ip, flag_key = %key))]
pub async fn flag(
    State(state): State<router::State>,
    InsecureClientIp(ip): InsecureClientIp,
    Path(key): Path<String>,
    query: Result<Query<FlagsQueryParams>, QueryRejection>,
) -> Result<Json<FlagResponse>, FlagError> {
    let ctx = decode_query(query)?.into_context(&state.config.environment);

    let result = state.flag_service.evaluate(&key, &ctx).await?;
    Ok(Json(FlagResponse { key, result }))
}

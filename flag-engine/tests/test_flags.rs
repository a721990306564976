use std::sync::Arc;

use anyhow::Result;
use assert_json_diff::{assert_json_eq, assert_json_include};
use reqwest::StatusCode;
use serde_json::{json, Value};

use flag_engine::test_utils::{flag, override_for, set_of, variant_flag, MockFlagRepository};

use crate::common::*;

pub mod common;

fn repository() -> Arc<MockFlagRepository> {
    let mut checkout = flag("checkout_v2");
    checkout.countries = set_of(&["PL"]);

    let mut staging_only = flag("debug_panel");
    staging_only.environments = set_of(&["staging"]);

    let mut killed = flag("legacy_banner");
    killed.enabled = false;

    Arc::new(MockFlagRepository::new(vec![
        flag("new_search"),
        checkout,
        staging_only,
        killed,
        variant_flag("test_flag", &[("control", 50), ("treatment", 50)]),
    ]))
}

#[tokio::test]
async fn it_evaluates_all_flags() -> Result<()> {
    let server = ServerHandle::for_repository(repository()).await;

    let res = server.get("/flags?user_id=user-123&country=PL").await;
    assert_eq!(StatusCode::OK, res.status());

    let body: Value = res.json().await?;
    assert_json_eq!(
        body,
        json!({
            "flags": {
                "new_search": true,
                "checkout_v2": true,
                "debug_panel": false,
                "legacy_banner": false,
                "test_flag": true,
            },
            "variants": {
                "test_flag": "control",
            },
        })
    );

    Ok(())
}

#[tokio::test]
async fn it_omits_variants_for_flags_without_one() -> Result<()> {
    let server = ServerHandle::for_repository(repository()).await;

    let body: Value = server.get("/flags?session_id=sess-1").await.json().await?;

    // sess-1 lands in bucket 98 for test_flag, the last variant
    assert_json_include!(
        actual: body.clone(),
        expected: json!({
            "flags": {"checkout_v2": false, "test_flag": true},
            "variants": {"test_flag": "treatment"},
        })
    );
    assert_eq!(body["variants"].as_object().map(|v| v.len()), Some(1));

    Ok(())
}

#[tokio::test]
async fn it_applies_overrides_to_all_flags() -> Result<()> {
    let repository = repository();
    repository.set_overrides(vec![
        override_for("legacy_banner", "user-123", true, None),
        override_for("checkout_v2", "DE", true, Some("B")),
    ]);
    let server = ServerHandle::for_repository(repository).await;

    let body: Value = server
        .get("/flags?user_id=user-123&country=DE")
        .await
        .json()
        .await?;

    assert_json_include!(
        actual: body,
        expected: json!({
            "flags": {"legacy_banner": true, "checkout_v2": true},
            "variants": {"checkout_v2": "B"},
        })
    );

    Ok(())
}

#[tokio::test]
async fn it_explains_a_single_flag() -> Result<()> {
    let server = ServerHandle::for_repository(repository()).await;

    let body: Value = server
        .get("/flags/legacy_banner?user_id=user-123")
        .await
        .json()
        .await?;
    assert_json_eq!(
        body,
        json!({"key": "legacy_banner", "enabled": false, "source": "kill"})
    );

    let body: Value = server
        .get("/flags/test_flag?user_id=user-123")
        .await
        .json()
        .await?;
    assert_json_eq!(
        body,
        json!({"key": "test_flag", "enabled": true, "variant": "control", "source": "rule"})
    );

    let body: Value = server.get("/flags/does_not_exist").await.json().await?;
    assert_json_eq!(
        body,
        json!({"key": "does_not_exist", "enabled": false, "source": "default"})
    );

    Ok(())
}

#[tokio::test]
async fn it_evaluates_against_the_deployment_environment() -> Result<()> {
    let server = ServerHandle::for_repository(repository()).await;

    // The default test config runs as production
    let body: Value = server.get("/flags/debug_panel?user_id=user-123").await.json().await?;
    assert_json_include!(
        actual: body,
        expected: json!({"enabled": false, "source": "rule"})
    );

    Ok(())
}

#[tokio::test]
async fn it_returns_503_when_flags_cannot_be_loaded() -> Result<()> {
    let repository = repository();
    repository.set_failing(true);
    let server = ServerHandle::for_repository(repository).await;

    let res = server.get("/flags?user_id=user-123").await;
    assert_eq!(StatusCode::SERVICE_UNAVAILABLE, res.status());

    let res = server.get("/_readiness").await;
    assert_eq!(StatusCode::SERVICE_UNAVAILABLE, res.status());

    Ok(())
}

#[tokio::test]
async fn it_keeps_serving_when_the_repository_goes_down() -> Result<()> {
    let repository = repository();
    let server = ServerHandle::for_repository(repository.clone()).await;

    let res = server.get("/flags/new_search").await;
    assert_eq!(StatusCode::OK, res.status());

    repository.set_failing(true);

    let body: Value = server.get("/flags/new_search").await.json().await?;
    assert_json_include!(actual: body, expected: json!({"enabled": true}));

    let res = server.get("/_readiness").await;
    assert_eq!(StatusCode::OK, res.status());

    Ok(())
}

#[tokio::test]
async fn it_serves_liveness() -> Result<()> {
    let server = ServerHandle::for_repository(repository()).await;

    let res = server.get("/_liveness").await;
    assert_eq!(StatusCode::OK, res.status());
    assert_eq!(res.text().await?, "ok");

    Ok(())
}

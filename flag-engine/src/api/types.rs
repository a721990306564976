use serde::{Deserialize, Serialize};

use crate::flags::flag_models::{FlagContext, FlagResult};

/// Query string accepted by the flag endpoints. Empty values count as absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FlagsQueryParams {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub country: Option<String>,
    pub role: Option<String>,
}

impl FlagsQueryParams {
    /// Builds an evaluation context. The environment is the deployment's, never the caller's.
    pub fn into_context(self, environment: &str) -> FlagContext {
        FlagContext {
            user_id: self.user_id,
            session_id: self.session_id,
            country: self.country,
            role: self.role,
            environment: environment.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagResponse {
    pub key: String,
    #[serde(flatten)]
    pub result: FlagResult,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::flags::flag_source::FlagSource;

    #[test]
    fn test_into_context_uses_deployment_environment() {
        let params = FlagsQueryParams {
            user_id: Some("user-123".to_string()),
            country: Some("PL".to_string()),
            ..Default::default()
        };

        let ctx = params.into_context("staging");
        assert_eq!(ctx.environment, "staging");
        assert_eq!(ctx.bucketing_identifier(), "user-123");
        assert_eq!(ctx.country(), Some("PL"));
        assert_eq!(ctx.effective_role(), "anonymous");
    }

    #[test]
    fn test_flag_response_shape() {
        let response = FlagResponse {
            key: "checkout_v2".to_string(),
            result: FlagResult::disabled(FlagSource::Kill),
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"key": "checkout_v2", "enabled": false, "source": "kill"})
        );
    }
}

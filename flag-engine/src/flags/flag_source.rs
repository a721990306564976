use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Why an evaluation produced its result. Dashboards and debugging rely on this,
/// so two flags that are both "off" can still be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagSource {
    #[strum(serialize = "override")]
    Override,
    #[strum(serialize = "rule")]
    Rule,
    #[strum(serialize = "default")]
    Default,
    #[strum(serialize = "expired")]
    Expired,
    #[strum(serialize = "kill")]
    Kill,
}

impl FlagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagSource::Override => "override",
            FlagSource::Rule => "rule",
            FlagSource::Default => "default",
            FlagSource::Expired => "expired",
            FlagSource::Kill => "kill",
        }
    }
}

impl std::fmt::Display for FlagSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

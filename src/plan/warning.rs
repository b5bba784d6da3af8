use serde::Serialize;
use std::fmt;

/// Non-fatal finding reported alongside a successful compilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// `become_user` runs before any `create_user` in the stage or its ancestors
    BecomeUserWithoutCreate { stage: String, target: String },
    LegacyAlias {
        stage: String,
        alias: String,
        replacement: String,
    },
    /// A cached asset has not been downloaded yet, so the build will fail to copy it
    AssetNotCached { stage: String, url: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::BecomeUserWithoutCreate { stage, target } => write!(
                f,
                "Stage '{}' (target '{}') uses become_user without a preceding create_user; the account must already exist in the base image",
                stage, target
            ),
            Warning::LegacyAlias {
                stage,
                alias,
                replacement,
            } => write!(
                f,
                "Stage '{}': '{}' is deprecated, use '{}'",
                stage, alias, replacement
            ),
            Warning::AssetNotCached { stage, url } => write!(
                f,
                "Stage '{}': asset {} is not cached; run 'cm cache fetch' before building",
                stage, url
            ),
        }
    }
}

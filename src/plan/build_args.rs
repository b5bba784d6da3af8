//! Build arguments a target needs at invocation time

use crate::account::ResolvedAccount;
use serde::Serialize;
use std::fmt;

pub const USER_NAME: &str = "USER_NAME";
pub const USER_UID: &str = "USER_UID";
pub const USER_GID: &str = "USER_GID";
pub const USER_HOME: &str = "USER_HOME";

/// Argument names in the order they are declared and passed
pub const ACCOUNT_ARGS: [&str; 4] = [USER_NAME, USER_UID, USER_GID, USER_HOME];

/// A value read from the invoking host when the build starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostProbe {
    UserName,
    Uid,
    Gid,
    HomeDir,
}

impl HostProbe {
    /// Shell expression that yields the value on the host
    pub fn shell_expr(&self) -> &'static str {
        match self {
            HostProbe::UserName => "$(id -un)",
            HostProbe::Uid => "$(id -u)",
            HostProbe::Gid => "$(id -g)",
            HostProbe::HomeDir => "/home/$(id -un)",
        }
    }

    /// Arguments to `id` producing the value; `None` for derived values
    pub fn id_flags(&self) -> Option<&'static str> {
        match self {
            HostProbe::UserName => Some("-un"),
            HostProbe::Uid => Some("-u"),
            HostProbe::Gid => Some("-g"),
            HostProbe::HomeDir => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BuildArgValue {
    Literal(String),
    FromHost(HostProbe),
}

impl BuildArgValue {
    /// Value as it appears in a double-quoted shell word
    pub fn shell_value(&self) -> String {
        match self {
            BuildArgValue::Literal(value) => value.clone(),
            BuildArgValue::FromHost(probe) => probe.shell_expr().to_string(),
        }
    }

    pub fn literal(&self) -> Option<&str> {
        match self {
            BuildArgValue::Literal(value) => Some(value),
            BuildArgValue::FromHost(_) => None,
        }
    }
}

impl fmt::Display for BuildArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildArgValue::Literal(value) => f.write_str(value),
            BuildArgValue::FromHost(probe) => write!(f, "{} (host)", probe.shell_expr()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArg {
    pub name: String,
    pub value: BuildArgValue,
}

/// Named build arguments of one build target, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BuildArgs {
    args: Vec<BuildArg>,
}

impl BuildArgs {
    /// Arguments a target with `account` needs; none for an unconfigured account
    pub fn emit(account: &ResolvedAccount) -> Self {
        let args = match account {
            ResolvedAccount::None => Vec::new(),
            ResolvedAccount::HostCaptured => [
                (USER_NAME, HostProbe::UserName),
                (USER_UID, HostProbe::Uid),
                (USER_GID, HostProbe::Gid),
                (USER_HOME, HostProbe::HomeDir),
            ]
            .into_iter()
            .map(|(name, probe)| BuildArg {
                name: name.to_string(),
                value: BuildArgValue::FromHost(probe),
            })
            .collect(),
            ResolvedAccount::Fixed(identity) => [
                (USER_NAME, identity.name.clone()),
                (USER_UID, identity.uid.to_string()),
                (USER_GID, identity.gid.to_string()),
                (USER_HOME, identity.home.clone()),
            ]
            .into_iter()
            .map(|(name, value)| BuildArg {
                name: name.to_string(),
                value: BuildArgValue::Literal(value),
            })
            .collect(),
        };
        Self { args }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildArg> {
        self.args.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|arg| arg.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&BuildArgValue> {
        self.args
            .iter()
            .find(|arg| arg.name == name)
            .map(|arg| &arg.value)
    }

    /// `--build-arg NAME="value"` words for a generated shell script
    pub fn shell_flags(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| format!("--build-arg {}=\"{}\"", arg.name, arg.value.shell_value()))
            .collect()
    }
}

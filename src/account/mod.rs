//! Per-target account resolution
//!
//! Each build target is resolved on its own: one target's bad entry never
//! affects another target.

use crate::error::AccountResolutionError;
use crate::model::{AccountConfig, AccountEntry};
use serde::Serialize;
use std::fmt;

pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;

/// Fully determined account with literal values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FixedIdentity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
}

impl FixedIdentity {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32, home: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
            home: home.into(),
        }
    }
}

impl fmt::Display for FixedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{}, {})", self.name, self.uid, self.gid, self.home)
    }
}

/// Outcome of resolving a build target's account entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedAccount {
    /// No entry: nothing account-related may be emitted
    None,
    /// Values are captured from the invoking host at build invocation time
    HostCaptured,
    Fixed(FixedIdentity),
}

/// The account a stage switches to or provisions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Host,
    Fixed(FixedIdentity),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Host => f.write_str("host user"),
            Identity::Fixed(identity) => identity.fmt(f),
        }
    }
}

impl ResolvedAccount {
    pub fn identity(&self) -> Option<Identity> {
        match self {
            ResolvedAccount::None => None,
            ResolvedAccount::HostCaptured => Some(Identity::Host),
            ResolvedAccount::Fixed(identity) => Some(Identity::Fixed(identity.clone())),
        }
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, ResolvedAccount::None)
    }

    /// Home directory as a shell expression usable on the invoking host
    pub fn home_shell_expr(&self) -> String {
        match self {
            ResolvedAccount::None => "/root".to_string(),
            ResolvedAccount::HostCaptured => "/home/$(id -un)".to_string(),
            ResolvedAccount::Fixed(identity) => identity.home.clone(),
        }
    }
}

impl fmt::Display for ResolvedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedAccount::None => f.write_str("none (root)"),
            ResolvedAccount::HostCaptured => f.write_str("host user"),
            ResolvedAccount::Fixed(identity) => identity.fmt(f),
        }
    }
}

/// Resolve the account entry named `target`
///
/// A missing entry is not an error: it yields [`ResolvedAccount::None`] and
/// only steps that need an account will fail.
pub fn resolve(
    target: &str,
    accounts: &AccountConfig,
) -> Result<ResolvedAccount, AccountResolutionError> {
    match accounts.get(target) {
        None => Ok(ResolvedAccount::None),
        Some(AccountEntry::HostCaptured) => Ok(ResolvedAccount::HostCaptured),
        Some(AccountEntry::Fixed {
            name,
            uid,
            gid,
            home,
        }) => {
            let name = name.clone().ok_or_else(|| AccountResolutionError::MissingName {
                target: target.to_string(),
            })?;
            let home = home.clone().unwrap_or_else(|| format!("/home/{}", name));
            Ok(ResolvedAccount::Fixed(FixedIdentity {
                name,
                uid: uid.unwrap_or(DEFAULT_UID),
                gid: gid.unwrap_or(DEFAULT_GID),
                home,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(name: Option<&str>, uid: Option<u32>, gid: Option<u32>, home: Option<&str>) -> AccountEntry {
        AccountEntry::Fixed {
            name: name.map(String::from),
            uid,
            gid,
            home: home.map(String::from),
        }
    }

    #[test]
    fn test_absent_entry_is_none() {
        let accounts = AccountConfig::default();
        assert_eq!(resolve("production", &accounts).unwrap(), ResolvedAccount::None);
    }

    #[test]
    fn test_host_entry() {
        let mut accounts = AccountConfig::default();
        accounts.insert("development", AccountEntry::HostCaptured);
        assert_eq!(
            resolve("development", &accounts).unwrap(),
            ResolvedAccount::HostCaptured
        );
    }

    #[test]
    fn test_fixed_defaults() {
        let mut accounts = AccountConfig::default();
        accounts.insert("production", fixed(Some("app"), None, None, None));
        assert_eq!(
            resolve("production", &accounts).unwrap(),
            ResolvedAccount::Fixed(FixedIdentity::new("app", 1000, 1000, "/home/app"))
        );
    }

    #[test]
    fn test_explicit_zero_is_not_defaulted() {
        let mut accounts = AccountConfig::default();
        accounts.insert("production", fixed(Some("root"), Some(0), Some(0), Some("/root")));
        assert_eq!(
            resolve("production", &accounts).unwrap(),
            ResolvedAccount::Fixed(FixedIdentity::new("root", 0, 0, "/root"))
        );
    }

    #[test]
    fn test_missing_name_fails_only_its_target() {
        let mut accounts = AccountConfig::default();
        accounts.insert("production", fixed(None, Some(2000), None, None));
        accounts.insert("development", AccountEntry::HostCaptured);

        assert_eq!(
            resolve("production", &accounts).unwrap_err(),
            AccountResolutionError::MissingName {
                target: "production".to_string()
            }
        );
        assert!(resolve("development", &accounts).is_ok());
    }

    #[test]
    fn test_identity_projection() {
        assert_eq!(ResolvedAccount::None.identity(), None);
        assert_eq!(ResolvedAccount::HostCaptured.identity(), Some(Identity::Host));
        assert!(!ResolvedAccount::None.is_configured());
        assert!(ResolvedAccount::HostCaptured.is_configured());
    }

    #[test]
    fn test_home_shell_expr() {
        assert_eq!(ResolvedAccount::None.home_shell_expr(), "/root");
        assert_eq!(ResolvedAccount::HostCaptured.home_shell_expr(), "/home/$(id -un)");
        assert_eq!(
            ResolvedAccount::Fixed(FixedIdentity::new("app", 1, 1, "/srv/app")).home_shell_expr(),
            "/srv/app"
        );
    }
}

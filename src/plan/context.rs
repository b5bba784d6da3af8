use crate::account::Identity;
use serde::Serialize;
use std::fmt;

/// Which account subsequent instructions of a stage run as
///
/// Values are immutable snapshots: a transition returns a new context and the
/// previous one stays valid, which is what lets sibling stages start from the
/// same parent state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "identity", rename_all = "snake_case")]
pub enum AccountContext {
    #[default]
    Root,
    Active(Identity),
}

impl AccountContext {
    pub fn become_user(&self, identity: Identity) -> Self {
        AccountContext::Active(identity)
    }

    pub fn become_root(&self) -> Self {
        AccountContext::Root
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountContext::Active(_))
    }

    /// Owner for files copied in this context
    pub fn owner(&self) -> Option<&Identity> {
        match self {
            AccountContext::Root => None,
            AccountContext::Active(identity) => Some(identity),
        }
    }
}

impl fmt::Display for AccountContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountContext::Root => f.write_str("root"),
            AccountContext::Active(identity) => identity.fmt(f),
        }
    }
}

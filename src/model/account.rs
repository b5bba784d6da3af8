use crate::error::{AccountResolutionError, ConfigError};
use crate::model::document::AccountEntryDoc;
use serde::Serialize;
use std::collections::BTreeMap;

/// A validated `user.<target>` entry
///
/// Only checks that can be made on the entry alone happen here. A fixed entry
/// without a name is still representable and fails later, when a build target
/// actually resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccountEntry {
    HostCaptured,
    Fixed {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        uid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        gid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        home: Option<String>,
    },
}

impl AccountEntry {
    pub fn from_document(target: &str, doc: Option<&AccountEntryDoc>) -> Result<Self, ConfigError> {
        let context = format!("user.{}", target);
        let empty = AccountEntryDoc::default();
        let doc = doc.unwrap_or(&empty);

        let present: Vec<String> = [
            ("name", doc.name.is_some()),
            ("uid", doc.uid.is_some()),
            ("gid", doc.gid.is_some()),
            ("home", doc.home.is_some()),
        ]
        .iter()
        .filter(|(_, set)| *set)
        .map(|(field, _)| field.to_string())
        .collect();

        match doc.host {
            Some(true) if !present.is_empty() => {
                Err(AccountResolutionError::MutuallyExclusiveFields {
                    target: target.to_string(),
                    fields: present,
                }
                .into())
            }
            Some(true) => Ok(AccountEntry::HostCaptured),
            Some(false) if present.is_empty() => Err(ConfigError::AmbiguousField {
                context,
                field: "host".to_string(),
                hint: "'host: false' alone does not describe an account; set name (and optionally uid, gid, home) or remove the entry".to_string(),
            }),
            None if present.is_empty() => Err(ConfigError::AmbiguousField {
                context,
                field: target.to_string(),
                hint: "empty entry; use 'host: true' or set name (and optionally uid, gid, home)".to_string(),
            }),
            _ => {
                if let Some(home) = &doc.home {
                    if !home.starts_with('/') {
                        return Err(ConfigError::InvalidValue {
                            field: format!("{}.home", context),
                            message: format!("'{}' must be an absolute path", home),
                        });
                    }
                }
                if let Some(name) = &doc.name {
                    if !is_valid_account_name(name) {
                        return Err(ConfigError::InvalidValue {
                            field: format!("{}.name", context),
                            message: format!("'{}' is not a valid account name", name),
                        });
                    }
                }
                Ok(AccountEntry::Fixed {
                    name: doc.name.clone(),
                    uid: doc.uid,
                    gid: doc.gid,
                    home: doc.home.clone(),
                })
            }
        }
    }
}

/// Names accepted by both `useradd` and BusyBox `adduser`
fn is_valid_account_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 32
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// All account entries of a project, keyed by build target name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AccountConfig {
    entries: BTreeMap<String, AccountEntry>,
}

impl AccountConfig {
    pub fn from_document(
        user: &BTreeMap<String, Option<AccountEntryDoc>>,
    ) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();
        for (target, doc) in user {
            entries.insert(target.clone(), AccountEntry::from_document(target, doc.as_ref())?);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, target: &str) -> Option<&AccountEntry> {
        self.entries.get(target)
    }

    pub fn contains(&self, target: &str) -> bool {
        self.entries.contains_key(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, target: impl Into<String>, entry: AccountEntry) {
        self.entries.insert(target.into(), entry);
    }
}

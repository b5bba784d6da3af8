//! Serde mirror of the `cm.yaml` document
//!
//! These types accept exactly what a user can write. Nothing here is validated
//! beyond shape; [`crate::model::ProjectConfig`] turns a [`Document`] into the
//! checked model.

use crate::graph::PackageManager;
use crate::runtime::{RunFeature, RuntimeBackend};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

/// Mapping that keeps declaration order, used where order carries meaning
/// (stage tie-breaking, command listing).
fn deserialize_ordered<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a mapping")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries: Vec<(String, T)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                if entries.iter().any(|(existing, _)| existing == &key) {
                    return Err(de::Error::custom(format!("duplicate key '{}'", key)));
                }
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_any(OrderedVisitor(PhantomData))
}

fn serialize_ordered<S, T>(entries: &[(String, T)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

fn default_workspace() -> String {
    "workspace".to_string()
}

/// Top-level document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub project: Option<ProjectSection>,

    /// Account entries keyed by build target name; a null entry is kept so it
    /// can be reported as ambiguous rather than silently dropped.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub user: BTreeMap<String, Option<AccountEntryDoc>>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub runtime: RuntimeSection,

    #[serde(
        default,
        deserialize_with = "deserialize_ordered",
        serialize_with = "serialize_ordered"
    )]
    pub stages: Vec<(String, StageDoc)>,

    #[serde(
        default,
        deserialize_with = "deserialize_ordered",
        serialize_with = "serialize_ordered"
    )]
    pub commands: Vec<(String, CommandDoc)>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub build_script: BuildScriptSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_workspace")]
    pub workspace: String,

    #[serde(default)]
    pub auto_update: bool,
}

/// One `user.<target>` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountEntryDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSection {
    #[serde(default)]
    pub backend: RuntimeBackend,

    #[serde(default)]
    pub privileged: bool,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub features: Vec<RunFeature>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDoc {
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<PackageManager>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub packages: PackagesDoc,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub env: BTreeMap<String, EnvValue>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub cached_assets: Vec<CachedAssetDoc>,

    /// `None` when the key is absent, so default steps can be applied
    #[serde(default, alias = "build_steps", skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackagesDoc {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub apt: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub apk: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub dnf: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub pip: Vec<String>,
}

/// Environment values may be written as strings, numbers or booleans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Text(value) => f.write_str(value),
            EnvValue::Integer(value) => write!(f, "{}", value),
            EnvValue::Float(value) => write!(f, "{}", value),
            EnvValue::Bool(value) => write!(f, "{}", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachedAssetDoc {
    pub url: String,
    pub dest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandDoc {
    #[serde(default)]
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub env: BTreeMap<String, EnvValue>,

    #[serde(default)]
    pub standalone: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildScriptSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,
}

impl Document {
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

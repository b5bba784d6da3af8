//! Stage inheritance graph
//!
//! Every stage has exactly one base: an external image or another stage. The
//! graph is therefore a forest, ordered so that each stage comes after its
//! base, ties broken by declaration order. Inherited properties (package
//! manager, shell, packages, environment) are merged while ordering.

pub mod family;

pub use family::{detect_package_manager, detect_shell, AccountFamily, PackageManager};

use crate::error::StageReferenceError;
use crate::model::{BaseRef, CachedAsset, PackageSet, Stage};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// A stage with its inherited properties resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStage {
    pub name: String,
    pub base: BaseRef,
    /// External image at the root of this stage's ancestry
    pub root_image: String,
    pub package_manager: PackageManager,
    pub shell: String,
    /// Packages of every ancestor followed by this stage's own
    pub packages: PackageSet,
    /// Environment of every ancestor, overridden by this stage's own
    pub env: BTreeMap<String, String>,
    /// Variables declared by this stage itself
    pub own_env: BTreeMap<String, String>,
    pub cached_assets: Vec<CachedAsset>,
    pub steps: Vec<String>,
}

impl ResolvedStage {
    pub fn parent(&self) -> Option<&str> {
        match &self.base {
            BaseRef::Stage(parent) => Some(parent),
            BaseRef::Image(_) => None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageGraph {
    /// Topological order
    stages: Vec<ResolvedStage>,
}

impl StageGraph {
    pub fn resolve(stages: &[Stage]) -> Result<Self, StageReferenceError> {
        let declared: BTreeMap<&str, &Stage> =
            stages.iter().map(|stage| (stage.name.as_str(), stage)).collect();

        let mut placed: HashSet<String> = HashSet::new();
        let mut in_stack: Vec<String> = Vec::new();
        let mut ordered: Vec<ResolvedStage> = Vec::with_capacity(stages.len());

        for stage in stages {
            place(stage, &declared, &mut placed, &mut in_stack, &mut ordered)?;
        }

        Ok(Self { stages: ordered })
    }

    pub fn stages(&self) -> &[ResolvedStage] {
        &self.stages
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedStage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Ancestors of `name` from the root down, ending with `name` itself
    pub fn chain(&self, name: &str) -> Result<Vec<&ResolvedStage>, StageReferenceError> {
        let mut chain = Vec::new();
        let mut current = self
            .get(name)
            .ok_or_else(|| StageReferenceError::UnknownTarget(name.to_string()))?;
        loop {
            chain.push(current);
            match current.parent() {
                Some(parent) => {
                    current = self.get(parent).ok_or_else(|| {
                        StageReferenceError::UnknownStageReference {
                            stage: current.name.clone(),
                            reference: parent.to_string(),
                        }
                    })?;
                }
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ResolvedStage> + 'a {
        self.stages
            .iter()
            .filter(move |stage| stage.parent() == Some(name))
    }

    /// Stages nothing else is built on, in topological order
    pub fn leaves(&self) -> Vec<&ResolvedStage> {
        self.stages
            .iter()
            .filter(|stage| self.children(&stage.name).next().is_none())
            .collect()
    }
}

fn place(
    stage: &Stage,
    declared: &BTreeMap<&str, &Stage>,
    placed: &mut HashSet<String>,
    in_stack: &mut Vec<String>,
    ordered: &mut Vec<ResolvedStage>,
) -> Result<(), StageReferenceError> {
    if placed.contains(&stage.name) {
        return Ok(());
    }
    if let Some(pos) = in_stack.iter().position(|name| name == &stage.name) {
        let mut path: Vec<String> = in_stack[pos..].to_vec();
        path.push(stage.name.clone());
        return Err(StageReferenceError::Cycle { path });
    }

    in_stack.push(stage.name.clone());
    let resolved = match &stage.base {
        BaseRef::Image(image) => {
            let package_manager = stage
                .package_manager
                .unwrap_or_else(|| detect_package_manager(image));
            ResolvedStage {
                name: stage.name.clone(),
                base: stage.base.clone(),
                root_image: image.clone(),
                package_manager,
                shell: stage
                    .shell
                    .clone()
                    .unwrap_or_else(|| detect_shell(image).to_string()),
                packages: stage.packages.clone(),
                env: stage.env.clone(),
                own_env: stage.env.clone(),
                cached_assets: stage.cached_assets.clone(),
                steps: stage.steps.clone(),
            }
        }
        BaseRef::Stage(parent_name) => {
            let parent_stage = declared.get(parent_name.as_str()).ok_or_else(|| {
                StageReferenceError::UnknownStageReference {
                    stage: stage.name.clone(),
                    reference: parent_name.clone(),
                }
            })?;
            place(parent_stage, declared, placed, in_stack, ordered)?;

            let parent = ordered
                .iter()
                .find(|resolved| &resolved.name == parent_name)
                .ok_or_else(|| StageReferenceError::UnknownStageReference {
                    stage: stage.name.clone(),
                    reference: parent_name.clone(),
                })?;

            let mut env = parent.env.clone();
            env.extend(stage.env.iter().map(|(k, v)| (k.clone(), v.clone())));

            ResolvedStage {
                name: stage.name.clone(),
                base: stage.base.clone(),
                root_image: parent.root_image.clone(),
                package_manager: stage.package_manager.unwrap_or(parent.package_manager),
                shell: stage.shell.clone().unwrap_or_else(|| parent.shell.clone()),
                packages: parent.packages.merged_with(&stage.packages),
                env,
                own_env: stage.env.clone(),
                cached_assets: stage.cached_assets.clone(),
                steps: stage.steps.clone(),
            }
        }
    };
    in_stack.pop();

    placed.insert(stage.name.clone());
    ordered.push(resolved);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, base: BaseRef) -> Stage {
        Stage {
            name: name.to_string(),
            base,
            package_manager: None,
            shell: None,
            packages: PackageSet::default(),
            env: BTreeMap::new(),
            cached_assets: Vec::new(),
            steps: Vec::new(),
        }
    }

    fn image(name: &str, image: &str) -> Stage {
        stage(name, BaseRef::Image(image.to_string()))
    }

    fn derived(name: &str, parent: &str) -> Stage {
        stage(name, BaseRef::Stage(parent.to_string()))
    }

    fn names(graph: &StageGraph) -> Vec<&str> {
        graph.stages().iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_parents_come_first() {
        let graph = StageGraph::resolve(&[
            derived("production", "base"),
            derived("development", "base"),
            image("base", "python:3-slim"),
        ])
        .unwrap();
        assert_eq!(names(&graph), vec!["base", "production", "development"]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let graph = StageGraph::resolve(&[
            image("base", "alpine:3.19"),
            derived("zeta", "base"),
            derived("alpha", "base"),
        ])
        .unwrap();
        assert_eq!(names(&graph), vec!["base", "zeta", "alpha"]);
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let err = StageGraph::resolve(&[derived("a", "b"), derived("b", "a")]).unwrap_err();
        assert_eq!(
            err,
            StageReferenceError::Cycle {
                path: vec!["a".to_string(), "b".to_string(), "a".to_string()]
            }
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = StageGraph::resolve(&[derived("base", "base")]).unwrap_err();
        assert!(matches!(err, StageReferenceError::Cycle { .. }));
    }

    #[test]
    fn test_chain_runs_root_to_target() {
        let graph = StageGraph::resolve(&[
            image("base", "alpine:3.19"),
            derived("dev", "base"),
            derived("test", "dev"),
        ])
        .unwrap();
        let chain: Vec<&str> = graph
            .chain("test")
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(chain, vec!["base", "dev", "test"]);
        assert_eq!(
            graph.chain("missing").unwrap_err(),
            StageReferenceError::UnknownTarget("missing".to_string())
        );
    }

    #[test]
    fn test_leaves() {
        let graph = StageGraph::resolve(&[
            image("base", "alpine:3.19"),
            derived("development", "base"),
            derived("production", "base"),
        ])
        .unwrap();
        let leaves: Vec<&str> = graph.leaves().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(leaves, vec!["development", "production"]);
    }

    #[test]
    fn test_inherited_properties() {
        let mut base = image("base", "alpine:3.19");
        base.packages.apk = vec!["curl".to_string()];
        base.env.insert("A".to_string(), "1".to_string());
        base.env.insert("B".to_string(), "1".to_string());

        let mut child = derived("child", "base");
        child.packages.apk = vec!["git".to_string()];
        child.env.insert("B".to_string(), "2".to_string());

        let graph = StageGraph::resolve(&[base, child]).unwrap();
        let child = graph.get("child").unwrap();
        assert_eq!(child.package_manager, PackageManager::Apk);
        assert_eq!(child.shell, "/bin/sh");
        assert_eq!(child.root_image, "alpine:3.19");
        assert_eq!(child.packages.apk, vec!["curl", "git"]);
        assert_eq!(child.env["A"], "1");
        assert_eq!(child.env["B"], "2");
        assert_eq!(child.own_env.len(), 1);
    }

    #[test]
    fn test_package_manager_override_is_inherited() {
        let mut base = image("base", "registry.example.com/custom:1");
        base.package_manager = Some(PackageManager::Apk);
        let graph = StageGraph::resolve(&[base, derived("child", "base")]).unwrap();
        assert_eq!(graph.get("base").unwrap().package_manager, PackageManager::Apk);
        assert_eq!(graph.get("child").unwrap().package_manager, PackageManager::Apk);
    }
}

use crate::account::{self, Identity, ResolvedAccount};
use crate::cache::AssetStore;
use crate::error::{AccountResolutionError, CompileError};
use crate::graph::{AccountFamily, ResolvedStage, StageGraph};
use crate::model::ProjectConfig;
use crate::plan::build_args::{BuildArgs, ACCOUNT_ARGS};
use crate::plan::context::AccountContext;
use crate::plan::instruction::Instruction;
use crate::plan::provision::ProvisioningProcedure;
use crate::plan::step::{self, BuiltIn, Step};
use crate::plan::warning::Warning;
use crate::plan::{workspace_dir, BuildPlan, BuildTarget, Compilation, StagePlan};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Compiles build targets of one project into build plans
///
/// Compilation is a pure function of the project, the asset cache state and
/// the target: identical inputs always give identical plans.
pub struct Compiler<'a> {
    project: &'a ProjectConfig,
    graph: &'a StageGraph,
    assets: &'a dyn AssetStore,
}

/// Fold state carried from a stage to the next one in the chain
#[derive(Default)]
struct ChainState {
    context: AccountContext,
    user_created: bool,
    stages: Vec<StagePlan>,
    warnings: Vec<Warning>,
}

impl<'a> Compiler<'a> {
    pub fn new(project: &'a ProjectConfig, graph: &'a StageGraph, assets: &'a dyn AssetStore) -> Self {
        Self {
            project,
            graph,
            assets,
        }
    }

    /// Compiles one build target
    ///
    /// The target's account is resolved first, then its ancestor chain is
    /// folded root to leaf with the account context threaded through.
    ///
    /// # Arguments
    ///
    /// * `target` - Stage to build and the `user` entry it takes its account from
    ///
    /// # Returns
    ///
    /// The build plan with the warnings found on the way, or the first hard error
    ///
    /// # Example
    ///
    /// ```
    /// use container_magic::{BuildTarget, Compiler, ProjectConfig, StageGraph, StaticAssetStore};
    ///
    /// let project = ProjectConfig::from_yaml_str(
    ///     "project:\n  name: demo\nstages:\n  base:\n    from: alpine:3.19\n  production:\n    from: base\n",
    /// )
    /// .unwrap();
    /// let graph = StageGraph::resolve(&project.stages).unwrap();
    /// let store = StaticAssetStore::default();
    /// let compilation = Compiler::new(&project, &graph, &store)
    ///     .compile(&BuildTarget::for_stage(&project, "production"))
    ///     .unwrap();
    /// assert_eq!(compilation.plan.stages.len(), 2);
    /// ```
    pub fn compile(&self, target: &BuildTarget) -> Result<Compilation, CompileError> {
        let chain = self.graph.chain(&target.stage)?;
        let account = account::resolve(&target.account, &self.project.accounts)?;
        let build_args = BuildArgs::emit(&account);

        debug!(
            stage = %target.stage,
            account_target = %target.account,
            account = %account,
            chain_len = chain.len(),
            "Compiling build target"
        );

        let state = chain
            .iter()
            .try_fold(ChainState::default(), |state, stage| {
                self.compile_stage(stage, target, &account, state)
            })?;

        info!(
            stage = %target.stage,
            stages = state.stages.len(),
            warnings = state.warnings.len(),
            "Compiled build target"
        );

        Ok(Compilation {
            plan: BuildPlan {
                target: target.clone(),
                account,
                build_args,
                stages: state.stages,
            },
            warnings: state.warnings,
        })
    }

    fn compile_stage(
        &self,
        stage: &ResolvedStage,
        target: &BuildTarget,
        account: &ResolvedAccount,
        mut state: ChainState,
    ) -> Result<ChainState, CompileError> {
        let initial_context = if stage.is_root() {
            AccountContext::Root
        } else {
            state.context.clone()
        };
        let mut context = initial_context.clone();
        let mut instructions = Vec::new();

        if account.is_configured() {
            instructions.extend(ACCOUNT_ARGS.iter().map(|name| Instruction::Arg {
                name: name.to_string(),
            }));
        }
        if stage.is_root() {
            let mut vars = BTreeMap::new();
            vars.insert(
                "WORKSPACE".to_string(),
                workspace_dir(account, &self.project.project.workspace),
            );
            instructions.push(Instruction::Env { vars });
        }
        if !stage.own_env.is_empty() {
            instructions.push(Instruction::Env {
                vars: stage.own_env.clone(),
            });
        }

        for raw in &stage.steps {
            let classified = step::classify(&stage.name, raw)?;
            if let Some((alias, replacement)) = classified.legacy_alias {
                state.warnings.push(Warning::LegacyAlias {
                    stage: stage.name.clone(),
                    alias: alias.to_string(),
                    replacement: replacement.to_string(),
                });
            }

            match classified.step {
                Step::RawPassthrough { keyword, arguments } => {
                    instructions.push(Instruction::Raw { keyword, arguments })
                }
                Step::ImplicitRun { command } => instructions.push(Instruction::Run { command }),
                Step::MultiLineBlock { commands } => {
                    instructions.push(Instruction::RunChain { commands })
                }
                Step::BuiltIn(builtin) => {
                    let keyword = builtin.keyword();
                    let require_identity = || -> Result<Identity, AccountResolutionError> {
                        account
                            .identity()
                            .ok_or_else(|| AccountResolutionError::MissingAccount {
                                stage: stage.name.clone(),
                                step: keyword.to_string(),
                                target: target.account.clone(),
                            })
                    };

                    match builtin {
                        BuiltIn::InstallSystemPackages => {
                            instructions.extend(stage.packages.system_lists().into_iter().map(
                                |(manager, packages)| Instruction::InstallPackages {
                                    manager,
                                    packages: packages.to_vec(),
                                },
                            ));
                        }
                        BuiltIn::InstallPipPackages => {
                            if !stage.packages.pip.is_empty() {
                                instructions.push(Instruction::InstallPip {
                                    packages: stage.packages.pip.clone(),
                                });
                            }
                        }
                        BuiltIn::CreateUser => {
                            let identity = require_identity()?;
                            instructions.push(Instruction::ProvisionUser {
                                procedure: ProvisioningProcedure::new(
                                    AccountFamily::from(stage.package_manager),
                                    identity,
                                    stage.shell.clone(),
                                ),
                            });
                            state.user_created = true;
                        }
                        BuiltIn::BecomeUser => {
                            let identity = require_identity()?;
                            if !state.user_created {
                                state.warnings.push(Warning::BecomeUserWithoutCreate {
                                    stage: stage.name.clone(),
                                    target: target.account.clone(),
                                });
                            }
                            context = context.become_user(identity.clone());
                            instructions.push(Instruction::SwitchUser {
                                identity: Some(identity),
                            });
                        }
                        BuiltIn::BecomeRoot => {
                            context = context.become_root();
                            instructions.push(Instruction::SwitchUser { identity: None });
                        }
                        BuiltIn::Copy(args) => instructions.push(Instruction::Copy {
                            sources: args.sources,
                            dest: args.dest,
                            owner: context.owner().cloned(),
                        }),
                        BuiltIn::CopyAsUser(args) => instructions.push(Instruction::Copy {
                            sources: args.sources,
                            dest: args.dest,
                            owner: Some(require_identity()?),
                        }),
                        BuiltIn::CopyAsRoot(args) => instructions.push(Instruction::Copy {
                            sources: args.sources,
                            dest: args.dest,
                            owner: None,
                        }),
                        BuiltIn::CopyWorkspace => instructions.push(Instruction::Copy {
                            sources: vec![self.project.project.workspace.clone()],
                            dest: workspace_dir(account, &self.project.project.workspace),
                            owner: account.identity(),
                        }),
                        BuiltIn::CopyCachedAssets => {
                            for asset in &stage.cached_assets {
                                if !self.assets.is_cached(&asset.url) {
                                    state.warnings.push(Warning::AssetNotCached {
                                        stage: stage.name.clone(),
                                        url: asset.url.clone(),
                                    });
                                }
                                instructions.push(Instruction::Copy {
                                    sources: vec![self.assets.relative_path(&asset.url)],
                                    dest: asset.dest.clone(),
                                    owner: account.identity(),
                                });
                            }
                        }
                    }
                }
            }
        }

        state.stages.push(StagePlan {
            name: stage.name.clone(),
            base: stage.base.clone(),
            package_manager: stage.package_manager,
            initial_context,
            terminal_context: context.clone(),
            instructions,
        });
        state.context = context;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::FixedIdentity;
    use crate::cache::StaticAssetStore;
    use crate::error::StepError;
    use crate::plan::build_args::BuildArgValue;

    fn compile_yaml(yaml: &str, target: &str) -> Result<Compilation, CompileError> {
        let project = ProjectConfig::from_yaml_str(yaml)?;
        let graph = StageGraph::resolve(&project.stages)?;
        let assets = StaticAssetStore::default();
        let target = BuildTarget::for_stage(&project, target);
        Compiler::new(&project, &graph, &assets).compile(&target)
    }

    const PROJECT: &str = r#"
project:
  name: demo
user:
  development:
    host: true
  production:
    name: app
stages:
  base:
    from: python:3-slim
    packages:
      apt: [curl]
      pip: [requests]
    steps:
      - install_system_packages
      - install_pip_packages
      - create_user
  development:
    from: base
    steps:
      - become_user
  production:
    from: base
    steps:
      - become_user
      - copy_workspace
"#;

    #[test]
    fn test_contexts_flow_down_the_chain() {
        let compilation = compile_yaml(PROJECT, "production").unwrap();
        let plan = &compilation.plan;
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0].initial_context, AccountContext::Root);
        assert_eq!(plan.stages[0].terminal_context, AccountContext::Root);
        assert_eq!(plan.stages[1].initial_context, AccountContext::Root);
        assert!(plan.stages[1].terminal_context.is_active());
        assert!(compilation.warnings.is_empty());
    }

    #[test]
    fn test_fixed_target_args() {
        let plan = compile_yaml(PROJECT, "production").unwrap().plan;
        assert_eq!(
            plan.account,
            ResolvedAccount::Fixed(FixedIdentity::new("app", 1000, 1000, "/home/app"))
        );
        assert_eq!(
            plan.build_args.get("USER_NAME"),
            Some(&BuildArgValue::Literal("app".to_string()))
        );
    }

    #[test]
    fn test_host_target_args() {
        let plan = compile_yaml(PROJECT, "development").unwrap().plan;
        assert_eq!(plan.account, ResolvedAccount::HostCaptured);
        assert!(plan
            .build_args
            .iter()
            .all(|arg| matches!(arg.value, BuildArgValue::FromHost(_))));
    }

    #[test]
    fn test_create_user_without_account_fails() {
        let err = compile_yaml(
            r#"
project:
  name: demo
stages:
  base:
    from: alpine:3.19
    steps:
      - create_user
"#,
            "base",
        )
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::Account(AccountResolutionError::MissingAccount {
                stage: "base".to_string(),
                step: "create_user".to_string(),
                target: "base".to_string(),
            })
        );
    }

    #[test]
    fn test_become_user_without_create_warns() {
        let compilation = compile_yaml(
            r#"
project:
  name: demo
user:
  production:
    name: ros
stages:
  production:
    from: docker.io/osrf/ros:noetic
    steps:
      - become_user
"#,
            "production",
        )
        .unwrap();
        assert_eq!(
            compilation.warnings,
            vec![Warning::BecomeUserWithoutCreate {
                stage: "production".to_string(),
                target: "production".to_string(),
            }]
        );
    }

    #[test]
    fn test_copy_follows_context() {
        let plan = compile_yaml(
            r#"
project:
  name: demo
user:
  production:
    name: app
stages:
  production:
    from: alpine:3.19
    steps:
      - copy a /a
      - create_user
      - become_user
      - copy b /b
      - become_root
      - copy c /c
"#,
            "production",
        )
        .unwrap()
        .plan;
        let owners: Vec<bool> = plan.stages[0]
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Copy { owner, .. } => Some(owner.is_some()),
                _ => None,
            })
            .collect();
        assert_eq!(owners, vec![false, true, false]);
        assert_eq!(plan.stages[0].terminal_context, AccountContext::Root);
    }

    #[test]
    fn test_step_errors_surface() {
        let err = compile_yaml(
            r#"
project:
  name: demo
stages:
  base:
    from: alpine:3.19
    steps:
      - copy
"#,
            "base",
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Step(StepError::MissingArguments { .. })));
    }

    #[test]
    fn test_legacy_alias_warns() {
        let compilation = compile_yaml(
            r#"
project:
  name: demo
user:
  production:
    name: app
stages:
  production:
    from: alpine:3.19
    steps:
      - create_user
      - switch_user
"#,
            "production",
        )
        .unwrap();
        assert_eq!(
            compilation.warnings,
            vec![Warning::LegacyAlias {
                stage: "production".to_string(),
                alias: "switch_user".to_string(),
                replacement: "become_user".to_string(),
            }]
        );
    }
}

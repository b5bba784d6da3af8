//! Build plan compilation
//!
//! A build target is compiled into a [`BuildPlan`]: the ordered ancestor chain
//! of the target stage, each stage expanded into concrete instructions. The
//! account context is threaded through the chain as a fold, so a stage always
//! starts in the context its base ended in.

pub mod build_args;
pub mod compiler;
pub mod context;
pub mod instruction;
pub mod provision;
pub mod step;
pub mod warning;

pub use build_args::{BuildArg, BuildArgValue, BuildArgs, HostProbe};
pub use compiler::Compiler;
pub use context::AccountContext;
pub use instruction::Instruction;
pub use provision::{ExistingAccount, ProvisionBranch, ProvisioningProcedure};
pub use step::{classify, BuiltIn, Step};
pub use warning::Warning;

use crate::account::ResolvedAccount;
use crate::graph::PackageManager;
use crate::model::{BaseRef, ProjectConfig};
use serde::Serialize;
use std::fmt;

/// A stage built with a given account entry
///
/// `account` names the `user` entry whose identity the build uses. Compiling
/// the same stage for two different account entries gives two independent
/// plans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BuildTarget {
    pub stage: String,
    pub account: String,
}

impl BuildTarget {
    pub fn new(stage: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            account: account.into(),
        }
    }

    /// Target for `stage` with the account entry the project assigns to it
    pub fn for_stage(project: &ProjectConfig, stage: &str) -> Self {
        Self::new(stage, project.account_target_for(stage))
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stage == self.account {
            f.write_str(&self.stage)
        } else {
            write!(f, "{} (account '{}')", self.stage, self.account)
        }
    }
}

/// Container path the workspace lives at
pub fn workspace_dir(account: &ResolvedAccount, workspace: &str) -> String {
    if account.is_configured() {
        format!("${{{}}}/{}", build_args::USER_HOME, workspace)
    } else {
        format!("/root/{}", workspace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagePlan {
    pub name: String,
    pub base: BaseRef,
    pub package_manager: PackageManager,
    pub initial_context: AccountContext,
    pub terminal_context: AccountContext,
    pub instructions: Vec<Instruction>,
}

impl StagePlan {
    /// Header line opening the stage
    pub fn from_line(&self) -> String {
        format!("FROM {} AS {}", self.base.as_str(), self.name)
    }

    /// The stage as it appears in a Dockerfile, one instruction per line
    pub fn dockerfile_text(&self) -> String {
        let mut text = self.from_line();
        text.push('\n');
        for instruction in &self.instructions {
            text.push_str(&instruction.to_string());
            text.push('\n');
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub target: BuildTarget,
    pub account: ResolvedAccount,
    pub build_args: BuildArgs,
    /// Ancestor chain from the root stage to the target stage
    pub stages: Vec<StagePlan>,
}

impl BuildPlan {
    pub fn stage(&self, name: &str) -> Option<&StagePlan> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn terminal(&self) -> Option<&StagePlan> {
        self.stages.last()
    }

    pub fn terminal_context(&self) -> AccountContext {
        self.terminal()
            .map(|stage| stage.terminal_context.clone())
            .unwrap_or_default()
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build plan for {}", self.target)?;
        writeln!(f, "Account: {}", self.account)?;

        if self.build_args.is_empty() {
            writeln!(f, "Build arguments: none")?;
        } else {
            writeln!(f, "Build arguments:")?;
            for arg in self.build_args.iter() {
                writeln!(f, "  {} = {}", arg.name, arg.value)?;
            }
        }

        for stage in &self.stages {
            writeln!(f)?;
            writeln!(
                f,
                "{}  # {}, {} -> {}",
                stage.from_line(),
                stage.package_manager,
                stage.initial_context,
                stage.terminal_context
            )?;
            for instruction in &stage.instructions {
                writeln!(f, "{}", instruction)?;
            }
        }
        Ok(())
    }
}

/// A plan together with the non-fatal findings of its compilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Compilation {
    pub plan: BuildPlan,
    pub warnings: Vec<Warning>,
}

use crate::account::Identity;
use crate::graph::PackageManager;
use crate::plan::build_args::{USER_GID, USER_NAME, USER_UID};
use crate::plan::provision::ProvisioningProcedure;
use crate::plan::step::RawKeyword;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Separator between continued lines of one instruction
pub const CONTINUATION: &str = " \\\n    ";

/// One emitted container build instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    /// Argument declaration without a default; defaults live in the global scope
    Arg { name: String },
    Env { vars: BTreeMap<String, String> },
    Run { command: String },
    /// Commands chained with `&&` in a single layer
    RunChain { commands: Vec<String> },
    InstallPackages {
        manager: PackageManager,
        packages: Vec<String>,
    },
    InstallPip { packages: Vec<String> },
    ProvisionUser { procedure: ProvisioningProcedure },
    /// Switch to the target's account (`None`) or to root
    SwitchUser { identity: Option<Identity> },
    Copy {
        sources: Vec<String>,
        dest: String,
        owner: Option<Identity>,
    },
    Raw { keyword: RawKeyword, arguments: String },
}

/// Double-quote `value` for an ENV instruction
pub fn quote_env_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Arg { name } => write!(f, "ARG {}", name),
            Instruction::Env { vars } => {
                let pairs: Vec<String> = vars
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, quote_env_value(value)))
                    .collect();
                write!(f, "ENV {}", pairs.join(CONTINUATION))
            }
            Instruction::Run { command } => write!(f, "RUN {}", command),
            Instruction::RunChain { commands } => {
                write!(f, "RUN {}", commands.join(&format!("{}&& ", CONTINUATION)))
            }
            Instruction::InstallPackages { manager, packages } => {
                write!(f, "RUN {}", manager.install_command(packages))
            }
            Instruction::InstallPip { packages } => {
                write!(f, "RUN pip install --no-cache-dir {}", packages.join(" "))
            }
            Instruction::ProvisionUser { procedure } => {
                write!(f, "RUN {}", procedure.script().join(CONTINUATION))
            }
            Instruction::SwitchUser { identity: Some(_) } => write!(f, "USER ${{{}}}", USER_NAME),
            Instruction::SwitchUser { identity: None } => f.write_str("USER root"),
            Instruction::Copy {
                sources,
                dest,
                owner,
            } => {
                f.write_str("COPY ")?;
                if owner.is_some() {
                    write!(f, "--chown=${{{}}}:${{{}}} ", USER_UID, USER_GID)?;
                }
                write!(f, "{} {}", sources.join(" "), dest)
            }
            Instruction::Raw { keyword, arguments } if arguments.is_empty() => {
                f.write_str(keyword.as_str())
            }
            Instruction::Raw { keyword, arguments } => write!(f, "{} {}", keyword, arguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::FixedIdentity;

    #[test]
    fn test_env_quoting() {
        let mut vars = BTreeMap::new();
        vars.insert("MY_VAR".to_string(), "hello world".to_string());
        assert_eq!(Instruction::Env { vars }.to_string(), "ENV MY_VAR=\"hello world\"");

        assert_eq!(quote_env_value("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_env_value("/opt/bin:${PATH}"), "\"/opt/bin:${PATH}\"");
        assert_eq!(quote_env_value("C:\\dir"), "\"C:\\\\dir\"");
    }

    #[test]
    fn test_env_multiple_vars_are_sorted() {
        let mut vars = BTreeMap::new();
        vars.insert("ZED".to_string(), "1".to_string());
        vars.insert("ALPHA".to_string(), "2".to_string());
        assert_eq!(
            Instruction::Env { vars }.to_string(),
            "ENV ALPHA=\"2\" \\\n    ZED=\"1\""
        );
    }

    #[test]
    fn test_run_chain() {
        let chain = Instruction::RunChain {
            commands: vec!["echo one".to_string(), "echo two".to_string()],
        };
        assert_eq!(chain.to_string(), "RUN echo one \\\n    && echo two");
    }

    #[test]
    fn test_copy_ownership() {
        let owned = Instruction::Copy {
            sources: vec!["app".to_string()],
            dest: "/srv/app".to_string(),
            owner: Some(Identity::Fixed(FixedIdentity::new("app", 1000, 1000, "/home/app"))),
        };
        assert_eq!(owned.to_string(), "COPY --chown=${USER_UID}:${USER_GID} app /srv/app");

        let plain = Instruction::Copy {
            sources: vec!["a".to_string(), "b".to_string()],
            dest: "/dst/".to_string(),
            owner: None,
        };
        assert_eq!(plain.to_string(), "COPY a b /dst/");
    }

    #[test]
    fn test_switch_user() {
        assert_eq!(
            Instruction::SwitchUser {
                identity: Some(Identity::Host)
            }
            .to_string(),
            "USER ${USER_NAME}"
        );
        assert_eq!(Instruction::SwitchUser { identity: None }.to_string(), "USER root");
    }

    #[test]
    fn test_raw_passthrough() {
        let raw = Instruction::Raw {
            keyword: RawKeyword::Expose,
            arguments: "8080".to_string(),
        };
        assert_eq!(raw.to_string(), "EXPOSE 8080");
    }

    #[test]
    fn test_pip_install() {
        let pip = Instruction::InstallPip {
            packages: vec!["numpy".to_string(), "pandas".to_string()],
        };
        assert_eq!(pip.to_string(), "RUN pip install --no-cache-dir numpy pandas");
    }
}

//! Account provisioning
//!
//! Whether the requested account already exists in the base image is only
//! known when the image is built, so `create_user` expands to a shell routine
//! that inspects `/etc/passwd` and `/etc/group` and takes one of four
//! branches:
//!
//! * neither the uid nor the name is taken: create group (if the gid is free) and user
//! * an account holds the uid with the requested name and primary gid: no-op
//! * the uid is free but the name is taken at another uid: renumber that account
//! * an account holds the uid under another name or gid: rename it
//!
//! Adapting follows the image's tooling. shadow-utils images modify the account
//! and its group in place; BusyBox images delete and recreate them. Either way
//! the home directory ends up owned by the requested uid and gid.

use crate::account::{FixedIdentity, Identity};
use crate::graph::AccountFamily;
use crate::plan::build_args::{USER_GID, USER_HOME, USER_NAME, USER_UID};
use serde::Serialize;

const PASSWD: &str = "/etc/passwd";
const GROUP: &str = "/etc/group";

/// An account present in an image's passwd database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingAccount {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl ExistingAccount {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }
}

/// Branch the provisioning routine takes for a given passwd database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "branch", rename_all = "snake_case")]
pub enum ProvisionBranch {
    Create,
    AlreadyPresent,
    /// The requested name exists at `from_uid`; the requested uid is free
    Renumber { from_uid: u32 },
    /// The requested uid belongs to `from`
    Rename { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningProcedure {
    pub family: AccountFamily,
    pub identity: Identity,
    /// Login shell given to a newly created account
    pub shell: String,
}

fn arg(name: &str) -> String {
    format!("\"${{{}}}\"", name)
}

/// Joins `steps` with `&&` across continuation lines and terminates the chain
fn chain(steps: Vec<String>) -> Vec<String> {
    let last = steps.len().saturating_sub(1);
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| {
            let step = if i == 0 { step } else { format!("&& {}", step) };
            if i == last {
                format!("{};", step)
            } else {
                step
            }
        })
        .collect()
}

impl ProvisioningProcedure {
    pub fn new(family: AccountFamily, identity: Identity, shell: impl Into<String>) -> Self {
        Self {
            family,
            identity,
            shell: shell.into(),
        }
    }

    /// Branch taken for `accounts` when the identity is fixed; host-captured
    /// identities are only known at invocation, see [`Self::select_branch_for`].
    pub fn select_branch(&self, accounts: &[ExistingAccount]) -> Option<ProvisionBranch> {
        match &self.identity {
            Identity::Host => None,
            Identity::Fixed(identity) => Some(Self::select_branch_for(identity, accounts)),
        }
    }

    /// Mirrors the decision made by [`Self::script`]
    ///
    /// # Arguments
    ///
    /// * `identity` - The account the stage asks for
    /// * `accounts` - The image's passwd database, in file order
    ///
    /// # Example
    ///
    /// ```
    /// use container_magic::account::FixedIdentity;
    /// use container_magic::plan::{ExistingAccount, ProvisionBranch, ProvisioningProcedure};
    ///
    /// let app = FixedIdentity::new("app", 1000, 1000, "/home/app");
    /// let ubuntu = vec![ExistingAccount::new("ubuntu", 1000, 1000)];
    /// assert_eq!(
    ///     ProvisioningProcedure::select_branch_for(&app, &ubuntu),
    ///     ProvisionBranch::Rename { from: "ubuntu".into() }
    /// );
    /// ```
    pub fn select_branch_for(
        identity: &FixedIdentity,
        accounts: &[ExistingAccount],
    ) -> ProvisionBranch {
        match accounts.iter().find(|account| account.uid == identity.uid) {
            Some(existing) if existing.name == identity.name && existing.gid == identity.gid => {
                ProvisionBranch::AlreadyPresent
            }
            Some(existing) => ProvisionBranch::Rename {
                from: existing.name.clone(),
            },
            None => match accounts.iter().find(|account| account.name == identity.name) {
                Some(existing) => ProvisionBranch::Renumber {
                    from_uid: existing.uid,
                },
                None => ProvisionBranch::Create,
            },
        }
    }

    /// Shell commands of the routine, to be joined with line continuations
    pub fn script(&self) -> Vec<String> {
        let name = arg(USER_NAME);
        let uid = arg(USER_UID);
        let gid = arg(USER_GID);
        let home = arg(USER_HOME);

        let mut lines = vec![
            format!("existing_user=\"$(awk -F: -v uid={uid} '$3 == uid {{ print $1; exit }}' {PASSWD})\""),
            format!("&& existing_user_gid=\"$(awk -F: -v uid={uid} '$3 == uid {{ print $4; exit }}' {PASSWD})\""),
            format!("&& named_uid=\"$(awk -F: -v name={name} '$1 == name {{ print $3; exit }}' {PASSWD})\""),
            "&& if [ -z \"$existing_user\" ] && [ -z \"$named_uid\" ]; then".to_string(),
        ];
        lines.extend(chain(self.create_steps()));
        lines.push(format!(
            "elif [ \"$existing_user\" = {name} ] && [ \"$existing_user_gid\" = {gid} ]; then"
        ));
        lines.push(format!(
            "echo \"account ${{{}}} (${{{}}}:${{{}}}) already present\";",
            USER_NAME, USER_UID, USER_GID
        ));
        lines.push("elif [ -z \"$existing_user\" ]; then".to_string());
        lines.extend(chain(self.renumber_steps()));
        lines.push("else".to_string());
        lines.extend(chain(self.rename_steps()));
        lines.push("fi".to_string());
        lines.push(format!("&& mkdir -p {home}"));
        lines.push(format!("&& chown {uid}:{gid} {home}"));
        lines
    }

    /// Reads the group holding the gid and the gid of the group holding the name.
    /// Re-read after any deletion, since removing a user may remove its group.
    fn read_groups() -> Vec<String> {
        let name = arg(USER_NAME);
        let gid = arg(USER_GID);
        vec![
            format!("existing_group=\"$(awk -F: -v gid={gid} '$3 == gid {{ print $1; exit }}' {GROUP})\""),
            format!("named_gid=\"$(awk -F: -v name={name} '$1 == name {{ print $3; exit }}' {GROUP})\""),
        ]
    }

    /// Leaves a group at the requested gid, named after the account when possible
    fn prepare_group(&self) -> String {
        let name = arg(USER_NAME);
        let gid = arg(USER_GID);
        match self.family {
            AccountFamily::Shadow => format!(
                "if [ -z \"$existing_group\" ]; then \
                 if [ -n \"$named_gid\" ]; then groupmod --gid {gid} {name}; else groupadd --gid {gid} {name}; fi; \
                 elif [ \"$existing_group\" != {name} ] && [ -z \"$named_gid\" ]; then groupmod --new-name {name} \"$existing_group\"; fi"
            ),
            AccountFamily::BusyBox => format!(
                "if [ -z \"$existing_group\" ]; then \
                 if [ -n \"$named_gid\" ]; then delgroup {name}; fi \
                 && addgroup -g {gid} {name} && existing_group={name}; fi"
            ),
        }
    }

    fn busybox_adduser(&self) -> String {
        format!(
            "adduser -D -u {} -G \"$existing_group\" -h {} -s {} {}",
            arg(USER_UID),
            arg(USER_HOME),
            self.shell,
            arg(USER_NAME)
        )
    }

    fn create_steps(&self) -> Vec<String> {
        let mut steps = Self::read_groups();
        steps.push(self.prepare_group());
        steps.push(match self.family {
            AccountFamily::Shadow => format!(
                "useradd --uid {} --gid {} --create-home --home-dir {} --shell {} {}",
                arg(USER_UID),
                arg(USER_GID),
                arg(USER_HOME),
                self.shell,
                arg(USER_NAME)
            ),
            AccountFamily::BusyBox => self.busybox_adduser(),
        });
        steps
    }

    fn renumber_steps(&self) -> Vec<String> {
        let mut steps = Vec::new();
        if self.family == AccountFamily::BusyBox {
            steps.push(format!("deluser {}", arg(USER_NAME)));
        }
        steps.extend(Self::read_groups());
        steps.push(self.prepare_group());
        steps.push(match self.family {
            AccountFamily::Shadow => format!(
                "usermod --uid {} --gid {} --home {} --move-home {}",
                arg(USER_UID),
                arg(USER_GID),
                arg(USER_HOME),
                arg(USER_NAME)
            ),
            AccountFamily::BusyBox => self.busybox_adduser(),
        });
        steps
    }

    fn rename_steps(&self) -> Vec<String> {
        let name = arg(USER_NAME);
        let uid = arg(USER_UID);
        let home = arg(USER_HOME);
        // Another account may hold the name while the uid belongs to a third one
        let name_taken = format!("[ -n \"$named_uid\" ] && [ \"$named_uid\" != {uid} ]");

        let mut steps = Vec::new();
        match self.family {
            AccountFamily::Shadow => {
                steps.push(format!("if {name_taken}; then userdel {name}; fi"));
                steps.extend(Self::read_groups());
                steps.push(self.prepare_group());
                steps.push(format!(
                    "if [ \"$existing_user\" != {name} ]; then usermod --login {name} --home {home} --move-home \"$existing_user\"; fi"
                ));
                steps.push(format!("usermod --gid {} {name}", arg(USER_GID)));
            }
            AccountFamily::BusyBox => {
                steps.push(format!("if {name_taken}; then deluser {name}; fi"));
                steps.push("deluser \"$existing_user\"".to_string());
                steps.extend(Self::read_groups());
                steps.push(self.prepare_group());
                steps.push(self.busybox_adduser());
            }
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn app() -> FixedIdentity {
        FixedIdentity::new("app", 1000, 1000, "/home/app")
    }

    fn procedure(family: AccountFamily) -> ProvisioningProcedure {
        ProvisioningProcedure::new(family, Identity::Fixed(app()), "/bin/bash")
    }

    #[test]
    fn test_create_when_uid_is_free() {
        let accounts = vec![ExistingAccount::new("root", 0, 0)];
        assert_eq!(
            procedure(AccountFamily::Shadow).select_branch(&accounts),
            Some(ProvisionBranch::Create)
        );
    }

    #[test]
    fn test_noop_when_account_matches() {
        let accounts = vec![
            ExistingAccount::new("root", 0, 0),
            ExistingAccount::new("app", 1000, 1000),
        ];
        assert_eq!(
            procedure(AccountFamily::Shadow).select_branch(&accounts),
            Some(ProvisionBranch::AlreadyPresent)
        );
    }

    #[parameterized(
        other_name = { "ubuntu", 1000 },
        same_name_other_gid = { "app", 100 },
    )]
    fn test_rename_when_uid_is_taken(existing: &str, gid: u32) {
        let accounts = vec![ExistingAccount::new(existing, 1000, gid)];
        for family in [AccountFamily::Shadow, AccountFamily::BusyBox] {
            assert_eq!(
                procedure(family).select_branch(&accounts),
                Some(ProvisionBranch::Rename {
                    from: existing.to_string()
                })
            );
        }
    }

    #[test]
    fn test_renumber_when_name_is_taken_elsewhere() {
        let accounts = vec![
            ExistingAccount::new("root", 0, 0),
            ExistingAccount::new("app", 999, 999),
        ];
        for family in [AccountFamily::Shadow, AccountFamily::BusyBox] {
            assert_eq!(
                procedure(family).select_branch(&accounts),
                Some(ProvisionBranch::Renumber { from_uid: 999 })
            );
        }
    }

    #[test]
    fn test_uid_holder_wins_over_name_holder() {
        let accounts = vec![
            ExistingAccount::new("ubuntu", 1000, 1000),
            ExistingAccount::new("app", 1001, 1001),
        ];
        assert_eq!(
            procedure(AccountFamily::Shadow).select_branch(&accounts),
            Some(ProvisionBranch::Rename {
                from: "ubuntu".to_string()
            })
        );
    }

    #[test]
    fn test_host_identity_has_no_static_branch() {
        let procedure =
            ProvisioningProcedure::new(AccountFamily::Shadow, Identity::Host, "/bin/bash");
        assert_eq!(procedure.select_branch(&[]), None);
    }

    #[test]
    fn test_shadow_script_renames_in_place() {
        let script = procedure(AccountFamily::Shadow).script().join("\n");
        assert!(script.contains("useradd --uid \"${USER_UID}\""));
        assert!(script.contains("groupmod --new-name \"${USER_NAME}\" \"$existing_group\""));
        assert!(script.contains("usermod --login \"${USER_NAME}\" --home \"${USER_HOME}\" --move-home"));
        assert!(!script.contains("deluser"));
        assert!(script.ends_with("&& chown \"${USER_UID}\":\"${USER_GID}\" \"${USER_HOME}\""));
    }

    #[test]
    fn test_busybox_script_recreates() {
        let script = ProvisioningProcedure::new(AccountFamily::BusyBox, Identity::Fixed(app()), "/bin/sh")
            .script()
            .join("\n");
        assert!(script.contains("deluser \"$existing_user\""));
        assert!(script.contains("adduser -D -u \"${USER_UID}\""));
        assert!(script.contains("-s /bin/sh"));
        assert!(!script.contains("usermod"));
        assert!(!script.contains("groupmod"));
    }

    #[test]
    fn test_script_has_all_four_branches() {
        let script = procedure(AccountFamily::Shadow).script();
        assert!(script.iter().filter(|l| l.contains("then")).count() >= 2);
        assert_eq!(script.iter().filter(|l| l.starts_with("elif")).count(), 2);
        assert!(script.iter().any(|l| l == "else"));
        assert!(script.iter().any(|l| l == "fi"));
    }

    /// Runs the emitted routine under `sh` against scratch passwd/group files,
    /// with every account tool replaced by a stub that logs its arguments.
    #[cfg(unix)]
    mod emitted {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use std::process::Command;

        const TOOLS: [&str; 11] = [
            "groupadd", "groupmod", "useradd", "usermod", "userdel", "addgroup", "adduser",
            "deluser", "delgroup", "mkdir", "chown",
        ];

        const HOME_SETUP: [&str; 2] = ["mkdir -p /home/app", "chown 1000:1000 /home/app"];

        struct Image {
            passwd: &'static str,
            group: &'static str,
        }

        const UBUNTU: Image = Image {
            passwd: "root:x:0:0:root:/root:/bin/bash\nubuntu:x:1000:1000:Ubuntu:/home/ubuntu:/bin/bash\n",
            group: "root:x:0:\nubuntu:x:1000:\n",
        };
        const BARE: Image = Image {
            passwd: "root:x:0:0:root:/root:/bin/bash\n",
            group: "root:x:0:\n",
        };
        const MATCHING: Image = Image {
            passwd: "root:x:0:0:root:/root:/bin/bash\napp:x:1000:1000::/home/app:/bin/sh\n",
            group: "root:x:0:\napp:x:1000:\n",
        };
        const RENUMBERED: Image = Image {
            passwd: "root:x:0:0:root:/root:/bin/bash\napp:x:999:999::/home/app:/bin/sh\n",
            group: "root:x:0:\napp:x:999:\n",
        };

        fn accounts(image: &Image) -> Vec<ExistingAccount> {
            image
                .passwd
                .lines()
                .map(|line| {
                    let fields: Vec<&str> = line.split(':').collect();
                    ExistingAccount::new(fields[0], fields[2].parse().unwrap(), fields[3].parse().unwrap())
                })
                .collect()
        }

        fn write_stub(dir: &Path, tool: &str) {
            let path = dir.join(tool);
            fs::write(&path, format!("#!/bin/sh\necho \"{} $*\" >> \"$CALL_LOG\"\n", tool)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        /// Tool invocations made by the routine, in order, plus its stdout
        fn run(family: AccountFamily, image: &Image) -> (Vec<String>, String) {
            let dir = tempfile::tempdir().unwrap();
            let bin = dir.path().join("bin");
            fs::create_dir(&bin).unwrap();
            for tool in TOOLS {
                write_stub(&bin, tool);
            }
            let passwd = dir.path().join("passwd");
            let group = dir.path().join("group");
            let log = dir.path().join("calls.log");
            fs::write(&passwd, image.passwd).unwrap();
            fs::write(&group, image.group).unwrap();

            let routine = ProvisioningProcedure::new(family, Identity::Fixed(app()), "/bin/sh")
                .script()
                .join(" \\\n")
                .replace(PASSWD, passwd.to_str().unwrap())
                .replace(GROUP, group.to_str().unwrap());
            let path = format!("{}:{}", bin.display(), std::env::var("PATH").unwrap_or_default());

            let output = Command::new("sh")
                .arg("-c")
                .arg(&routine)
                .env("PATH", path)
                .env("CALL_LOG", &log)
                .env(USER_NAME, "app")
                .env(USER_UID, "1000")
                .env(USER_GID, "1000")
                .env(USER_HOME, "/home/app")
                .output()
                .unwrap();
            assert!(
                output.status.success(),
                "routine failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );

            let calls = fs::read_to_string(&log)
                .unwrap_or_default()
                .lines()
                .map(String::from)
                .collect();
            (calls, String::from_utf8_lossy(&output.stdout).into_owned())
        }

        fn expected(account_calls: &[&str]) -> Vec<String> {
            account_calls
                .iter()
                .chain(HOME_SETUP.iter())
                .map(|call| call.to_string())
                .collect()
        }

        #[test]
        fn test_shadow_renames_taken_uid() {
            let (calls, _) = run(AccountFamily::Shadow, &UBUNTU);
            assert_eq!(
                calls,
                expected(&[
                    "groupmod --new-name app ubuntu",
                    "usermod --login app --home /home/app --move-home ubuntu",
                    "usermod --gid 1000 app",
                ])
            );
            assert_eq!(
                ProvisioningProcedure::select_branch_for(&app(), &accounts(&UBUNTU)),
                ProvisionBranch::Rename {
                    from: "ubuntu".to_string()
                }
            );
        }

        #[test]
        fn test_shadow_creates_on_bare_image() {
            let (calls, _) = run(AccountFamily::Shadow, &BARE);
            assert_eq!(
                calls,
                expected(&[
                    "groupadd --gid 1000 app",
                    "useradd --uid 1000 --gid 1000 --create-home --home-dir /home/app --shell /bin/sh app",
                ])
            );
            assert_eq!(
                ProvisioningProcedure::select_branch_for(&app(), &accounts(&BARE)),
                ProvisionBranch::Create
            );
        }

        #[test]
        fn test_shadow_renumbers_name_at_other_uid() {
            let (calls, _) = run(AccountFamily::Shadow, &RENUMBERED);
            assert_eq!(
                calls,
                expected(&[
                    "groupmod --gid 1000 app",
                    "usermod --uid 1000 --gid 1000 --home /home/app --move-home app",
                ])
            );
            assert_eq!(
                ProvisioningProcedure::select_branch_for(&app(), &accounts(&RENUMBERED)),
                ProvisionBranch::Renumber { from_uid: 999 }
            );
        }

        #[test]
        fn test_busybox_recreates_taken_uid() {
            let (calls, _) = run(AccountFamily::BusyBox, &UBUNTU);
            assert_eq!(calls.first().map(String::as_str), Some("deluser ubuntu"));
            assert!(calls.iter().any(|call| {
                call.starts_with("adduser -D -u 1000 -G ")
                    && call.ends_with("-h /home/app -s /bin/sh app")
            }));
            assert!(!calls.iter().any(|call| call.starts_with("usermod")));
        }

        #[test]
        fn test_busybox_creates_on_bare_image() {
            let (calls, _) = run(AccountFamily::BusyBox, &BARE);
            assert_eq!(
                calls,
                expected(&[
                    "addgroup -g 1000 app",
                    "adduser -D -u 1000 -G app -h /home/app -s /bin/sh app",
                ])
            );
        }

        #[test]
        fn test_busybox_recreates_name_at_other_uid() {
            let (calls, _) = run(AccountFamily::BusyBox, &RENUMBERED);
            assert_eq!(calls.first().map(String::as_str), Some("deluser app"));
            assert!(calls.contains(&"addgroup -g 1000 app".to_string()));
            assert!(calls.contains(&"adduser -D -u 1000 -G app -h /home/app -s /bin/sh app".to_string()));
        }

        #[test]
        fn test_matching_account_is_left_alone() {
            for family in [AccountFamily::Shadow, AccountFamily::BusyBox] {
                let (calls, stdout) = run(family, &MATCHING);
                assert_eq!(calls, expected(&[]));
                assert!(stdout.contains("account app (1000:1000) already present"));
            }
            assert_eq!(
                ProvisioningProcedure::select_branch_for(&app(), &accounts(&MATCHING)),
                ProvisionBranch::AlreadyPresent
            );
        }

        #[test]
        fn test_failing_tool_aborts_routine() {
            let dir = tempfile::tempdir().unwrap();
            let bin = dir.path().join("bin");
            fs::create_dir(&bin).unwrap();
            for tool in TOOLS {
                write_stub(&bin, tool);
            }
            fs::write(bin.join("useradd"), "#!/bin/sh\nexit 9\n").unwrap();
            let passwd = dir.path().join("passwd");
            let group = dir.path().join("group");
            fs::write(&passwd, BARE.passwd).unwrap();
            fs::write(&group, BARE.group).unwrap();

            let routine = procedure(AccountFamily::Shadow)
                .script()
                .join(" \\\n")
                .replace(PASSWD, passwd.to_str().unwrap())
                .replace(GROUP, group.to_str().unwrap());
            let status = Command::new("sh")
                .arg("-c")
                .arg(&routine)
                .env("PATH", format!("{}:{}", bin.display(), std::env::var("PATH").unwrap_or_default()))
                .env("CALL_LOG", dir.path().join("calls.log"))
                .env(USER_NAME, "app")
                .env(USER_UID, "1000")
                .env(USER_GID, "1000")
                .env(USER_HOME, "/home/app")
                .status()
                .unwrap();
            assert!(!status.success());
            let calls = fs::read_to_string(dir.path().join("calls.log")).unwrap_or_default();
            assert!(!calls.contains("chown"));
        }
    }
}

//! Base image heuristics: package manager, default shell and account tooling

use serde::{Deserialize, Serialize};
use std::fmt;

/// System package manager family of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Apk,
    Dnf,
}

impl PackageManager {
    pub const ALL: [PackageManager; 3] = [PackageManager::Apt, PackageManager::Apk, PackageManager::Dnf];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Apk => "apk",
            PackageManager::Dnf => "dnf",
        }
    }

    /// Shell command installing `packages` with this manager
    pub fn install_command(&self, packages: &[String]) -> String {
        let list = packages.join(" ");
        match self {
            PackageManager::Apt => format!(
                "apt-get update && apt-get install -y --no-install-recommends {} && rm -rf /var/lib/apt/lists/*",
                list
            ),
            PackageManager::Apk => format!("apk add --no-cache {}", list),
            PackageManager::Dnf => format!("dnf install -y {} && dnf clean all", list),
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convention used to create, rename or replace accounts inside an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountFamily {
    /// shadow-utils (`useradd`/`usermod`/`groupmod`): existing accounts are renamed in place
    Shadow,
    /// BusyBox (`adduser`/`deluser`): existing accounts are deleted and recreated
    BusyBox,
}

impl From<PackageManager> for AccountFamily {
    fn from(manager: PackageManager) -> Self {
        match manager {
            PackageManager::Apk => AccountFamily::BusyBox,
            PackageManager::Apt | PackageManager::Dnf => AccountFamily::Shadow,
        }
    }
}

const DNF_DISTROS: &[&str] = &["fedora", "centos", "rhel", "rocky", "alma"];

/// Infer the package manager from a base image reference
///
/// Debian, Ubuntu and the official language images are Debian based, so apt is
/// the fallback.
pub fn detect_package_manager(image: &str) -> PackageManager {
    let image = image.to_lowercase();

    if image.contains("alpine") {
        return PackageManager::Apk;
    }

    if DNF_DISTROS.iter().any(|distro| image.contains(distro)) {
        return PackageManager::Dnf;
    }

    PackageManager::Apt
}

/// Infer the default login shell from a base image reference
pub fn detect_shell(image: &str) -> &'static str {
    if image.to_lowercase().contains("alpine") {
        "/bin/sh"
    } else {
        "/bin/bash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        alpine = { "alpine:3.19", PackageManager::Apk },
        debian = { "debian:bookworm", PackageManager::Apt },
        ubuntu = { "ubuntu:22.04", PackageManager::Apt },
        python_slim = { "python:3-slim", PackageManager::Apt },
        fedora = { "fedora:39", PackageManager::Dnf },
        rocky = { "rockylinux:9", PackageManager::Dnf },
        centos = { "centos:stream9", PackageManager::Dnf },
        ros = { "docker.io/osrf/ros:noetic", PackageManager::Apt },
    )]
    fn test_detect_package_manager(image: &str, expected: PackageManager) {
        assert_eq!(detect_package_manager(image), expected);
    }

    #[test]
    fn test_detect_shell() {
        assert_eq!(detect_shell("alpine:3.19"), "/bin/sh");
        assert_eq!(detect_shell("python:3-slim"), "/bin/bash");
        assert_eq!(detect_shell("ubuntu:22.04"), "/bin/bash");
    }

    #[test]
    fn test_account_family_follows_package_manager() {
        assert_eq!(AccountFamily::from(PackageManager::Apk), AccountFamily::BusyBox);
        assert_eq!(AccountFamily::from(PackageManager::Apt), AccountFamily::Shadow);
        assert_eq!(AccountFamily::from(PackageManager::Dnf), AccountFamily::Shadow);
    }

    #[test]
    fn test_install_commands() {
        let packages = vec!["curl".to_string(), "git".to_string()];
        assert_eq!(
            PackageManager::Apk.install_command(&packages),
            "apk add --no-cache curl git"
        );
        assert!(PackageManager::Apt
            .install_command(&packages)
            .starts_with("apt-get update && apt-get install -y --no-install-recommends curl git"));
        assert_eq!(
            PackageManager::Dnf.install_command(&packages),
            "dnf install -y curl git && dnf clean all"
        );
    }
}

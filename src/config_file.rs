//! Settings file handling for the bootstrap constants.
//!
//! The entrypoint scripts hard-coded the UID, group, shell, and workspace
//! paths. They live here with the same defaults and can be overridden from a
//! JSON file passed with `--config`. Missing keys keep their default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::validate_user;
use crate::types::{HandoffMode, SetupFailurePolicy};

/// Fixed UID given to the provisioned account
pub const DEFAULT_UID: u32 = 1000;
/// Fixed GID of the docker users group
pub const DEFAULT_DOCKER_GID: u32 = 1111;

/// Bootstrap constants that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapSettings {
    // Account
    pub uid: u32,
    pub shell: PathBuf,
    pub home_root: PathBuf,
    pub admin_group: String,

    // Docker variant group
    pub docker_group: String,
    pub docker_gid: u32,

    // Workspace collaborators
    pub setup_script: PathBuf,
    pub env_file: PathBuf,
    pub email_var: String,
    pub profile_file: String,

    // Policies
    pub setup_failure: SetupFailurePolicy,
    pub handoff: HandoffMode,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            uid: DEFAULT_UID,
            shell: PathBuf::from("/bin/bash"),
            home_root: PathBuf::from("/home"),
            admin_group: "sudo".to_string(),
            docker_group: "docker_users".to_string(),
            docker_gid: DEFAULT_DOCKER_GID,
            setup_script: PathBuf::from("/workspace/create_conda_env.sh"),
            env_file: PathBuf::from("/workspace/.env"),
            email_var: "receiver_email".to_string(),
            profile_file: ".bashrc".to_string(),
            setup_failure: SetupFailurePolicy::Ignore,
            handoff: HandoffMode::Supervise,
        }
    }
}

impl BootstrapSettings {
    /// Load settings from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;

        let settings: Self =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;

        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.uid == 0 {
            anyhow::bail!("uid must not be 0 (root)");
        }
        if self.docker_gid == 0 {
            anyhow::bail!("docker_gid must not be 0 (root group)");
        }
        for (field, path) in [
            ("shell", &self.shell),
            ("home_root", &self.home_root),
            ("setup_script", &self.setup_script),
            ("env_file", &self.env_file),
        ] {
            if !path.is_absolute() {
                anyhow::bail!("{} must be an absolute path, got {:?}", field, path);
            }
        }
        validate_user(&self.admin_group).context("Invalid admin_group")?;
        validate_user(&self.docker_group).context("Invalid docker_group")?;

        if self.email_var.is_empty()
            || self.email_var.starts_with(|c: char| c.is_ascii_digit())
            || !self
                .email_var
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!("email_var {:?} is not a valid shell variable name", self.email_var);
        }
        if self.profile_file.is_empty() || self.profile_file.contains('/') {
            anyhow::bail!(
                "profile_file must be a plain file name inside the home directory, got {:?}",
                self.profile_file
            );
        }
        Ok(())
    }

    /// Home directory of the given user
    pub fn home_dir(&self, user: &str) -> PathBuf {
        self.home_root.join(user)
    }

    /// Shell profile file of the given user
    pub fn profile_path(&self, user: &str) -> PathBuf {
        self.home_dir(user).join(&self.profile_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_entrypoint_constants() {
        let settings = BootstrapSettings::default();
        assert_eq!(settings.uid, 1000);
        assert_eq!(settings.docker_gid, 1111);
        assert_eq!(settings.shell, PathBuf::from("/bin/bash"));
        assert_eq!(settings.admin_group, "sudo");
        assert_eq!(settings.env_file, PathBuf::from("/workspace/.env"));
        assert_eq!(settings.email_var, "receiver_email");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_home_and_profile_paths() {
        let settings = BootstrapSettings::default();
        assert_eq!(settings.home_dir("carol"), PathBuf::from("/home/carol"));
        assert_eq!(
            settings.profile_path("bob"),
            PathBuf::from("/home/bob/.bashrc")
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "uid": 2000, "setup_failure": "abort" }}"#).unwrap();

        let settings = BootstrapSettings::load_from_file(file.path()).unwrap();
        assert_eq!(settings.uid, 2000);
        assert_eq!(settings.setup_failure, SetupFailurePolicy::Abort);
        assert_eq!(settings.docker_gid, 1111);
        assert_eq!(settings.handoff, HandoffMode::Supervise);
    }

    #[test]
    fn test_load_written_settings() {
        let mut file = NamedTempFile::new().unwrap();
        let settings = BootstrapSettings {
            setup_script: PathBuf::from("/opt/setup.sh"),
            handoff: HandoffMode::Exec,
            ..Default::default()
        };

        write!(file, "{}", serde_json::to_string_pretty(&settings).unwrap()).unwrap();
        let loaded = BootstrapSettings::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = BootstrapSettings::load_from_file("/nonexistent/settings.json");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_unknown_key_fails() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "uidd": 2000 }}"#).unwrap();
        assert!(BootstrapSettings::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let root_uid = BootstrapSettings {
            uid: 0,
            ..Default::default()
        };
        assert!(root_uid.validate().is_err());

        let relative = BootstrapSettings {
            env_file: PathBuf::from("workspace/.env"),
            ..Default::default()
        };
        assert!(relative.validate().is_err());

        let bad_var = BootstrapSettings {
            email_var: "receiver-email".to_string(),
            ..Default::default()
        };
        assert!(bad_var.validate().is_err());

        let nested_profile = BootstrapSettings {
            profile_file: "../.bashrc".to_string(),
            ..Default::default()
        };
        assert!(nested_profile.validate().is_err());
    }
}

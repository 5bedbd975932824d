//! Shell profile exports.
//!
//! The workspace variant appends two lines to the new user's `~/.bashrc`:
//!
//! ```text
//! source /workspace/.env
//! export receiver_email=bob@example.com
//! ```
//!
//! The file is only ever appended to. When `useradd` did not copy a skeleton
//! `.bashrc`, the file is created and handed to the user's UID and primary
//! group, matching what `useradd -m` produces for skeleton files.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid, User, chown, geteuid};
use tracing::{debug, info};

use crate::command_traits::shell_quote;
use crate::error::Result;

/// Lines appended to the user's shell profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileExports {
    /// Shared environment file to source
    pub env_file: PathBuf,
    /// Variable the email is exported as
    pub email_var: String,
    /// Exported value; `None` exports an empty string
    pub email: Option<String>,
}

impl ProfileExports {
    /// Render the exact lines to append, in order
    pub fn lines(&self) -> [String; 2] {
        let email = self.email.as_deref().unwrap_or("");
        [
            format!("source {}", shell_quote(&self.env_file.display().to_string())),
            format!("export {}={}", self.email_var, shell_quote(email)),
        ]
    }

    /// Append the export lines to `profile`.
    ///
    /// A newline is inserted first if the existing file does not end with
    /// one, so the `source` line never gets glued to the previous line.
    /// When the file had to be created and the runner is root, ownership is
    /// given to `owner` and `group`. A `None` group leaves the group as is.
    pub fn append_to(&self, profile: &Path, owner: Uid, group: Option<Gid>) -> Result<()> {
        let existed = profile.exists();
        let needs_newline = existed && !ends_with_newline(profile)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(profile)?;

        let mut content = String::new();
        if needs_newline {
            content.push('\n');
        }
        for line in self.lines() {
            content.push_str(&line);
            content.push('\n');
        }
        file.write_all(content.as_bytes())?;
        file.flush()?;

        if !existed {
            if geteuid().is_root() {
                chown(profile, Some(owner), group).map_err(std::io::Error::from)?;
                debug!(
                    path = %profile.display(),
                    uid = owner.as_raw(),
                    gid = ?group.map(Gid::as_raw),
                    "created profile"
                );
            } else {
                debug!(path = %profile.display(), "created profile, not root so ownership unchanged");
            }
        }

        info!(path = %profile.display(), "appended shell exports");
        Ok(())
    }
}

/// Primary group of `user` from the account database
pub fn primary_group_of(user: &str) -> Option<Gid> {
    match User::from_name(user) {
        Ok(Some(account)) => Some(account.gid),
        Ok(None) => None,
        Err(e) => {
            debug!(user, error = %e, "account lookup failed");
            None
        }
    }
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let content = std::fs::read(path)?;
    Ok(content.is_empty() || content.ends_with(b"\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exports(email: Option<&str>) -> ProfileExports {
        ProfileExports {
            env_file: PathBuf::from("/workspace/.env"),
            email_var: "receiver_email".to_string(),
            email: email.map(str::to_string),
        }
    }

    #[test]
    fn test_lines_in_order() {
        let lines = exports(Some("bob@example.com")).lines();
        assert_eq!(lines[0], "source /workspace/.env");
        assert_eq!(lines[1], "export receiver_email=bob@example.com");
    }

    #[test]
    fn test_missing_email_exports_empty_value() {
        let lines = exports(None).lines();
        assert_eq!(lines[1], "export receiver_email=''");
    }

    #[test]
    fn test_append_preserves_existing_content() {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join(".bashrc");
        std::fs::write(&profile, "alias ll='ls -l'\n").unwrap();

        exports(Some("bob@example.com"))
            .append_to(&profile, geteuid(), None)
            .unwrap();

        let content = std::fs::read_to_string(&profile).unwrap();
        assert_eq!(
            content,
            "alias ll='ls -l'\nsource /workspace/.env\nexport receiver_email=bob@example.com\n"
        );
    }

    #[test]
    fn test_append_adds_missing_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join(".bashrc");
        std::fs::write(&profile, "PS1='$ '").unwrap();

        exports(Some("bob@example.com"))
            .append_to(&profile, geteuid(), None)
            .unwrap();

        let content = std::fs::read_to_string(&profile).unwrap();
        assert!(content.starts_with("PS1='$ '\nsource /workspace/.env\n"));
    }

    #[test]
    fn test_append_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join(".bashrc");

        exports(Some("bob@example.com"))
            .append_to(&profile, geteuid(), None)
            .unwrap();

        let content = std::fs::read_to_string(&profile).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_created_profile_gets_owner_and_group() {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join(".bashrc");
        let (uid, gid) = (Uid::from_raw(4321), Gid::from_raw(4322));

        exports(None).append_to(&profile, uid, Some(gid)).unwrap();

        // Unprivileged runs leave ownership alone
        if geteuid().is_root() {
            use std::os::unix::fs::MetadataExt;
            let meta = std::fs::metadata(&profile).unwrap();
            assert_eq!(meta.uid(), 4321);
            assert_eq!(meta.gid(), 4322);
        }
    }

    #[test]
    fn test_primary_group_lookup() {
        assert_eq!(primary_group_of("root"), Some(Gid::from_raw(0)));
        assert_eq!(primary_group_of("no-such-user-xyz"), None);
    }

    #[test]
    fn test_append_fails_without_home() {
        let dir = TempDir::new().unwrap();
        let profile = dir.path().join("missing-home").join(".bashrc");
        assert!(exports(None).append_to(&profile, geteuid(), None).is_err());
    }
}

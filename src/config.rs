//! Environment configuration module
//!
//! Reads `user`, `password` and `email` from the process environment into an
//! explicit, validated struct. Validation happens once, before any system
//! command runs.

use std::collections::HashMap;
use std::env::VarError;
use std::fmt;

use crate::error::ConfigError;

/// Environment variable holding the login name to create
pub const USER_VAR: &str = "user";
/// Environment variable holding the plaintext password
pub const PASSWORD_VAR: &str = "password";
/// Environment variable holding the recipient email address
pub const EMAIL_VAR: &str = "email";

/// Maximum login name length accepted by `useradd`
const MAX_USER_LEN: usize = 32;

/// Source of environment variables.
///
/// The process environment in production, a map in tests.
pub trait EnvSource {
    /// Look up a variable. `Ok(None)` means unset.
    fn var(&self, key: &'static str) -> Result<Option<String>, ConfigError>;
}

/// The real process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        match std::env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(key)),
        }
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        Ok(self.get(key).cloned())
    }
}

/// Validated bootstrap configuration.
///
/// `Debug` redacts the password so the struct is safe to log.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Login name to create
    pub user: String,
    /// Plaintext password to assign
    pub password: String,
    /// Recipient address exported into the shell profile
    pub email: Option<String>,
}

impl fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

impl BootstrapConfig {
    /// Build and validate a configuration from explicit values
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        email: Option<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            user: user.into(),
            password: password.into(),
            email,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    /// Read configuration from any environment source.
    ///
    /// An empty `email` is treated as unset.
    pub fn from_source(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let user = env.var(USER_VAR)?.ok_or(ConfigError::Missing(USER_VAR))?;
        let password = env
            .var(PASSWORD_VAR)?
            .ok_or(ConfigError::Missing(PASSWORD_VAR))?;
        let email = env.var(EMAIL_VAR)?.filter(|e| !e.is_empty());

        Self::new(user, password, email)
    }

    /// Validate every field, returning the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_user(&self.user)?;
        validate_password(&self.password)?;
        if let Some(ref email) = self.email {
            validate_email(email)?;
        }
        Ok(())
    }
}

/// Check a login name against the rules `useradd` enforces by default.
///
/// Must start with a lowercase letter or underscore, continue with lowercase
/// letters, digits, `_` or `-`, and be at most 32 characters.
pub fn validate_user(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidUser {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_USER_LEN {
        return Err(invalid("must be at most 32 characters"));
    }
    if !name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
    {
        return Err(invalid("must start with a lowercase letter or underscore"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(invalid(
            "may only contain lowercase letters, digits, underscores and hyphens",
        ));
    }
    Ok(())
}

/// Check a password can be fed to `chpasswd`.
///
/// No strength rules; only what would corrupt the `user:password` line.
pub fn validate_password(password: &str) -> Result<(), ConfigError> {
    if password.is_empty() {
        return Err(ConfigError::InvalidPassword("must not be empty"));
    }
    if password.contains(['\n', '\r', '\0']) {
        return Err(ConfigError::InvalidPassword(
            "must not contain line breaks or NUL bytes",
        ));
    }
    Ok(())
}

/// Minimal sanity check for the exported email address
pub fn validate_email(email: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidEmail {
        email: email.to_string(),
        reason,
    };

    if email.contains(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(invalid("must look like local@domain")),
    }
}

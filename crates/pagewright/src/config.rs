//! Suite configuration.
//!
//! Loaded from a YAML file, from `PAGEWRIGHT_*` environment variables, or
//! both (`from_yaml_file(..)?.merge_env()?`). Every loader validates, so a
//! file must carry a base URL even when the environment overrides it.
//! Nothing here is global: the config is passed to the runner, which hands
//! it to each scenario context.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::action_log::{Redactor, DEFAULT_SENSITIVE_KEYS};
use crate::result::{ProbeError, ProbeResult};
use crate::wait::PollConfig;

/// Environment variable holding the application base URL
pub const ENV_BASE_URL: &str = "PAGEWRIGHT_BASE_URL";
/// Environment variable holding the admin user name
pub const ENV_ADMIN_USER: &str = "PAGEWRIGHT_ADMIN_USER";
/// Environment variable holding the admin password
pub const ENV_ADMIN_PASSWORD: &str = "PAGEWRIGHT_ADMIN_PASSWORD";
/// Environment variable overriding the UI poll timeout
pub const ENV_UI_TIMEOUT_MS: &str = "PAGEWRIGHT_UI_TIMEOUT_MS";
/// Environment variable overriding the mail poll timeout
pub const ENV_MAIL_TIMEOUT_MS: &str = "PAGEWRIGHT_MAIL_TIMEOUT_MS";

/// Regex templates used to recognize feedback messages by category.
///
/// `{field}` and `{name}` are replaced with regex-escaped values before
/// compiling. Defaults are case-insensitive keyword matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagePatterns {
    /// Success feedback after a create/update
    pub success: String,
    /// Error attached to a specific field
    pub field_error: String,
    /// Form-level error
    pub generic_error: String,
    /// Login refused
    pub login_denied: String,
}

impl Default for MessagePatterns {
    fn default() -> Self {
        Self {
            success: r"(?i)\b(created|saved|added|updated|success)".to_string(),
            field_error: r"(?i)\b{field}\b".to_string(),
            generic_error: r"(?i)\b(error|invalid|failed|could not|unable)".to_string(),
            login_denied: r"(?i)\b(invalid|incorrect|denied|not found|unknown)".to_string(),
        }
    }
}

impl MessagePatterns {
    fn compile(template: &str, field: &str, name: &str) -> ProbeResult<Regex> {
        let expanded = template
            .replace("{field}", &regex::escape(field))
            .replace("{name}", &regex::escape(name));
        Ok(Regex::new(&expanded)?)
    }

    /// Success pattern, `{name}` filled in
    pub fn success_for(&self, name: &str) -> ProbeResult<Regex> {
        Self::compile(&self.success, "", name)
    }

    /// Field error pattern, `{field}` filled in. Underscores in the field
    /// key also match spaces (`access_level` matches "Access level").
    pub fn field_error_for(&self, field: &str) -> ProbeResult<Regex> {
        let spoken = field.replace('_', " ");
        let expanded = self
            .field_error
            .replace("{field}", &regex::escape(&spoken).replace(' ', r"[\s_]"))
            .replace("{name}", "");
        Ok(Regex::new(&expanded)?)
    }

    /// Generic error pattern
    pub fn generic_error(&self) -> ProbeResult<Regex> {
        Self::compile(&self.generic_error, "", "")
    }

    /// Login-denied pattern
    pub fn login_denied(&self) -> ProbeResult<Regex> {
        Self::compile(&self.login_denied, "", "")
    }

    /// Compile every template once to surface mistakes at load time
    pub fn validate(&self) -> ProbeResult<()> {
        let _ = self.success_for("x")?;
        let _ = self.field_error_for("x")?;
        let _ = self.generic_error()?;
        let _ = self.login_denied()?;
        Ok(())
    }
}

/// Everything a suite needs to know about its target
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Application base URL
    pub base_url: String,
    /// Admin user name
    pub admin_user: String,
    /// Admin password
    pub admin_password: String,
    /// Poll settings for UI feedback
    pub ui_poll: PollConfig,
    /// Poll settings for mail delivery
    pub mail_poll: PollConfig,
    /// Parameter names whose values are never logged
    pub sensitive_keys: Vec<String>,
    /// Feedback message patterns
    pub messages: MessagePatterns,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            admin_user: "admin".to_string(),
            admin_password: String::new(),
            ui_poll: PollConfig::fast(),
            mail_poll: PollConfig::mail(),
            sensitive_keys: DEFAULT_SENSITIVE_KEYS
                .iter()
                .map(ToString::to_string)
                .collect(),
            messages: MessagePatterns::default(),
        }
    }
}

impl fmt::Debug for SuiteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteConfig")
            .field("base_url", &self.base_url)
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"***")
            .field("ui_poll", &self.ui_poll)
            .field("mail_poll", &self.mail_poll)
            .field("sensitive_keys", &self.sensitive_keys)
            .field("messages", &self.messages)
            .finish()
    }
}

impl SuiteConfig {
    /// Config for `base_url` with defaults elsewhere
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set admin credentials
    #[must_use]
    pub fn with_admin(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.admin_user = user.into();
        self.admin_password = password.into();
        self
    }

    /// Set UI poll settings
    #[must_use]
    pub const fn with_ui_poll(mut self, poll: PollConfig) -> Self {
        self.ui_poll = poll;
        self
    }

    /// Set mail poll settings
    #[must_use]
    pub const fn with_mail_poll(mut self, poll: PollConfig) -> Self {
        self.mail_poll = poll;
        self
    }

    /// Read the process environment; `PAGEWRIGHT_BASE_URL` is required
    pub fn from_env() -> ProbeResult<Self> {
        Self::default().merge_lookup(|k| std::env::var(k).ok())
    }

    /// Overlay `PAGEWRIGHT_*` variables from the process environment
    pub fn merge_env(self) -> ProbeResult<Self> {
        self.merge_lookup(|k| std::env::var(k).ok())
    }

    /// Overlay variables from an arbitrary lookup (testable env access)
    pub fn merge_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> ProbeResult<Self> {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(user) = lookup(ENV_ADMIN_USER) {
            self.admin_user = user;
        }
        if let Some(password) = lookup(ENV_ADMIN_PASSWORD) {
            self.admin_password = password;
        }
        if let Some(ms) = lookup(ENV_UI_TIMEOUT_MS) {
            self.ui_poll.timeout_ms = parse_ms(ENV_UI_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_MAIL_TIMEOUT_MS) {
            self.mail_poll.timeout_ms = parse_ms(ENV_MAIL_TIMEOUT_MS, &ms)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Load and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check required values and patterns
    pub fn validate(&self) -> ProbeResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ProbeError::Config {
                message: format!("base URL is not set ({ENV_BASE_URL})"),
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ProbeError::Config {
                message: format!("base URL must be http(s): {}", self.base_url),
            });
        }
        self.messages.validate()
    }

    /// Join a path onto the base URL
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Redaction rules for action logs
    #[must_use]
    pub fn redactor(&self) -> Redactor {
        Redactor::with_keys(&self.sensitive_keys)
    }
}

fn parse_ms(var: &str, value: &str) -> ProbeResult<u64> {
    value.trim().parse().map_err(|_| ProbeError::Config {
        message: format!("{var} must be a number of milliseconds, got {value:?}"),
    })
}

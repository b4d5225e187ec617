//! Structured step log.
//!
//! Every page action appends one [`StepEntry`] to the scenario's
//! [`ActionLog`] and emits a matching `tracing` event under the
//! `pagewright::step` target. The trail is attached to failed scenario
//! results so a failure reads as a narrative of what was done.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Placeholder written instead of sensitive values
pub const REDACTED: &str = "***";

/// Keys whose values are never logged
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &["password", "pass", "secret", "token", "otp"];

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Step completed
    Ok,
    /// Step failed
    Failed {
        /// Rendered error
        message: String,
    },
}

impl StepOutcome {
    /// Whether the step completed
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// One logged action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEntry {
    /// Position in the trail, starting at 1
    pub seq: usize,
    /// Session label (actor)
    pub session: String,
    /// Step name (`goto`, `fill`, `click`, `await`, ...)
    pub step: String,
    /// Redacted parameters
    pub params: BTreeMap<String, String>,
    /// Outcome
    pub outcome: StepOutcome,
    /// When the step finished
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for StepEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}] {}", self.seq, self.session, self.step)?;
        for (key, value) in &self.params {
            write!(f, " {key}={value:?}")?;
        }
        match &self.outcome {
            StepOutcome::Ok => write!(f, " -> ok"),
            StepOutcome::Failed { message } => write!(f, " -> FAILED: {message}"),
        }
    }
}

/// Case-insensitive set of sensitive parameter names.
///
/// A key is sensitive when it equals one of the names or one of its
/// `_`/`-`/`.` separated segments does (`admin_password`, `api-token`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redactor {
    keys: BTreeSet<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::with_keys(DEFAULT_SENSITIVE_KEYS.iter().copied())
    }
}

impl Redactor {
    /// Build from explicit key names
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|k| k.as_ref().trim().to_ascii_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Redact nothing
    #[must_use]
    pub fn none() -> Self {
        Self {
            keys: BTreeSet::new(),
        }
    }

    /// Whether values under `key` must be hidden
    #[must_use]
    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.keys.contains(&key)
            || key
                .split(['_', '-', '.'])
                .any(|segment| self.keys.contains(segment))
    }

    /// The value to log for `key`
    #[must_use]
    pub fn redact(&self, key: &str, value: &str) -> String {
        if self.is_sensitive(key) {
            REDACTED.to_string()
        } else {
            value.to_string()
        }
    }
}

/// Shared, append-only trail of steps for one scenario
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    entries: Arc<Mutex<Vec<StepEntry>>>,
    redactor: Arc<Redactor>,
}

impl ActionLog {
    /// Create an empty log
    #[must_use]
    pub fn new(redactor: Redactor) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            redactor: Arc::new(redactor),
        }
    }

    /// Redaction rules in effect
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Append one step and emit it as a tracing event
    pub fn record(
        &self,
        session: &str,
        step: &str,
        params: &[(&str, &str)],
        outcome: StepOutcome,
    ) -> StepEntry {
        let params: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), self.redactor.redact(k, v)))
            .collect();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = StepEntry {
            seq: entries.len() + 1,
            session: session.to_string(),
            step: step.to_string(),
            params,
            outcome,
            timestamp: Utc::now(),
        };
        let rendered: Vec<String> = entry
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        match &entry.outcome {
            StepOutcome::Ok => tracing::info!(
                target: "pagewright::step",
                seq = entry.seq,
                session = %entry.session,
                step = %entry.step,
                params = %rendered.join(" "),
                "step ok"
            ),
            StepOutcome::Failed { message } => tracing::warn!(
                target: "pagewright::step",
                seq = entry.seq,
                session = %entry.session,
                step = %entry.step,
                params = %rendered.join(" "),
                error = %message,
                "step failed"
            ),
        }
        entries.push(entry.clone());
        entry
    }

    /// Snapshot of all entries
    #[must_use]
    pub fn entries(&self) -> Vec<StepEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was logged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent failed step
    #[must_use]
    pub fn last_failure(&self) -> Option<StepEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|e| !e.outcome.is_ok())
            .cloned()
    }

    /// One line per step
    #[must_use]
    pub fn render(&self) -> String {
        self.entries()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

//! Result and error types for pagewright.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for pagewright operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors that can occur while driving a scenario
#[derive(Debug, Error)]
pub enum ProbeError {
    /// A singular locator resolved to no element
    #[error("Element '{name}' not found (scope: {scope})")]
    ElementNotFound {
        /// Logical locator name
        name: String,
        /// Rendered scope chain
        scope: String,
    },

    /// A singular locator resolved to more than one element
    #[error("Element '{name}' matched {count} elements, expected exactly one (scope: {scope})")]
    ElementAmbiguous {
        /// Logical locator name
        name: String,
        /// Rendered scope chain
        scope: String,
        /// Number of matches
        count: usize,
    },

    /// The element resolved but cannot take the action
    #[error("Element '{name}' is not interactable: {reason}")]
    ElementNotInteractable {
        /// Logical locator name
        name: String,
        /// Why the action was refused
        reason: String,
    },

    /// An eventual condition did not hold before its deadline
    #[error("Timed out after {elapsed:?} waiting for {description}")]
    ConditionTimeout {
        /// What was awaited
        description: String,
        /// Time spent polling
        elapsed: Duration,
    },

    /// Expected and observed outcome differ
    #[error("Assertion failed: {context}: expected {expected:?}, got {actual:?}")]
    AssertionFailed {
        /// What was being checked
        context: String,
        /// Expected value, verbatim
        expected: String,
        /// Observed value, verbatim
        actual: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Browser engine failure
    #[error("Browser engine error: {message}")]
    Engine {
        /// Error message
        message: String,
    },

    /// Mailbox collaborator failure
    #[error("Mailbox error: {message}")]
    Mailbox {
        /// Error message
        message: String,
    },

    /// Missing or invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Locator map or locator reference rejected
    #[error("Invalid locator: {message}")]
    InvalidLocator {
        /// Error message
        message: String,
    },

    /// Test data table rejected
    #[error("Invalid test data: {message}")]
    InvalidData {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Regex error
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

/// Coarse classification of a [`ProbeError`], kept on scenario results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Locator resolved to zero or many elements
    ElementNotFound,
    /// Element refused the action
    ElementNotInteractable,
    /// Eventual condition expired
    ConditionTimeout,
    /// Business-level mismatch
    AssertionFailed,
    /// Engine, mailbox, config or I/O failure
    Infrastructure,
}

impl ProbeError {
    /// Build an [`ProbeError::AssertionFailed`]
    pub fn assertion(
        context: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::AssertionFailed {
            context: context.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Build an [`ProbeError::Engine`]
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Whether the error only means "not observable yet".
    ///
    /// Only these are swallowed by eventual conditions; everything else
    /// aborts a poll.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ElementNotFound { .. }
                | Self::ElementAmbiguous { .. }
                | Self::ElementNotInteractable { .. }
        )
    }

    /// Classify the error
    #[must_use]
    pub const fn category(&self) -> FailureCategory {
        match self {
            Self::ElementNotFound { .. } | Self::ElementAmbiguous { .. } => {
                FailureCategory::ElementNotFound
            }
            Self::ElementNotInteractable { .. } => FailureCategory::ElementNotInteractable,
            Self::ConditionTimeout { .. } => FailureCategory::ConditionTimeout,
            Self::AssertionFailed { .. } => FailureCategory::AssertionFailed,
            _ => FailureCategory::Infrastructure,
        }
    }
}

//! Test data records and tables.
//!
//! A [`TestDataRecord`] pairs form input with the outcome it must produce.
//! Records are immutable once built; derived copies (placeholder
//! substitution) are new values. A [`DataTable`] is an ordered, validated
//! collection of records, usually loaded from YAML or JSON:
//!
//! ```yaml
//! name: create_user
//! records:
//!   - id: valid-editor
//!     input: { name: "Jane {uid}", email: "jane+{uid}@example.test", role: Editor }
//!     expected: { success: true, message_pattern: "created" }
//!   - id: bad-email
//!     input: { name: Bob, email: not-an-email }
//!     expected:
//!       success: false
//!       error: { kind: field, field: email }
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::result::{ProbeError, ProbeResult};

/// Which error indicator a negative record expects
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Error attached to one form field
    Field {
        /// Field (record input key) in error
        field: String,
    },
    /// Form-level error banner
    Generic,
}

/// Expected state of a form control after the action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FieldState {
    /// Visible and enabled
    Enabled,
    /// Visible and disabled
    Disabled,
    /// Not visible
    Hidden,
    /// Holds exactly this value
    Value {
        /// Expected value
        value: String,
    },
}

impl FieldState {
    /// Shorthand for [`FieldState::Value`]
    #[must_use]
    pub fn value(value: impl Into<String>) -> Self {
        Self::Value {
            value: value.into(),
        }
    }
}

/// What a record must produce
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    /// Whether the operation must succeed
    pub success: bool,
    /// Regex the feedback message must match; may reference inputs as `{key}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_pattern: Option<String>,
    /// Error indicator expected on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Form control states to check afterwards
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_states: BTreeMap<String, FieldState>,
}

/// One input/expected-outcome pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDataRecord {
    id: String,
    #[serde(default)]
    input: BTreeMap<String, String>,
    expected: ExpectedOutcome,
}

impl TestDataRecord {
    /// Start a record that must succeed
    #[must_use]
    pub fn positive(id: impl Into<String>) -> RecordBuilder {
        RecordBuilder::new(id.into(), true)
    }

    /// Start a record that must be rejected
    #[must_use]
    pub fn negative(id: impl Into<String>) -> RecordBuilder {
        RecordBuilder::new(id.into(), false)
    }

    /// Record identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Input value by key
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&str> {
        self.input.get(key).map(String::as_str)
    }

    /// Input value that must be present
    pub fn require(&self, key: &str) -> ProbeResult<&str> {
        self.input(key).ok_or_else(|| ProbeError::InvalidData {
            message: format!("record '{}' has no input '{key}'", self.id),
        })
    }

    /// All inputs
    #[must_use]
    pub const fn inputs(&self) -> &BTreeMap<String, String> {
        &self.input
    }

    /// Expected outcome
    #[must_use]
    pub const fn expected(&self) -> &ExpectedOutcome {
        &self.expected
    }

    /// Whether the record expects success
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.expected.success
    }

    /// A copy with `placeholder` replaced by `value` in every input
    #[must_use]
    pub fn substitute(&self, placeholder: &str, value: &str) -> Self {
        Self {
            id: self.id.clone(),
            input: self
                .input
                .iter()
                .map(|(k, v)| (k.clone(), v.replace(placeholder, value)))
                .collect(),
            expected: self.expected.clone(),
        }
    }

    /// Replace `{key}` in `template` with the regex-escaped input value
    #[must_use]
    pub fn expand(&self, template: &str) -> String {
        self.input.iter().fold(template.to_string(), |acc, (k, v)| {
            acc.replace(&format!("{{{k}}}"), &regex::escape(v))
        })
    }

    /// Compiled message pattern, placeholders expanded
    pub fn message_regex(&self) -> ProbeResult<Option<Regex>> {
        self.expected
            .message_pattern
            .as_deref()
            .map(|p| Regex::new(&self.expand(p)))
            .transpose()
            .map_err(|e| ProbeError::InvalidData {
                message: format!("record '{}': bad message pattern: {e}", self.id),
            })
    }

    /// Check internal consistency
    pub fn validate(&self) -> ProbeResult<()> {
        let invalid = |why: &str| {
            Err(ProbeError::InvalidData {
                message: format!("record '{}': {why}", self.id),
            })
        };
        if self.id.trim().is_empty() {
            return invalid("empty id");
        }
        if self.expected.success && self.expected.error.is_some() {
            return invalid("positive record names an error kind");
        }
        if !self.expected.success
            && self.expected.error.is_none()
            && self.expected.message_pattern.is_none()
        {
            return invalid("negative record needs an error kind or message pattern");
        }
        let _ = self.message_regex()?;
        Ok(())
    }
}

/// Builder for [`TestDataRecord`]
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    id: String,
    input: BTreeMap<String, String>,
    expected: ExpectedOutcome,
}

impl RecordBuilder {
    fn new(id: String, success: bool) -> Self {
        Self {
            id,
            input: BTreeMap::new(),
            expected: ExpectedOutcome {
                success,
                ..ExpectedOutcome::default()
            },
        }
    }

    /// Add an input value
    #[must_use]
    pub fn input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.input.insert(key.into(), value.into());
        self
    }

    /// Expect a feedback message matching `pattern`
    #[must_use]
    pub fn message(mut self, pattern: impl Into<String>) -> Self {
        self.expected.message_pattern = Some(pattern.into());
        self
    }

    /// Expect an error on `field`
    #[must_use]
    pub fn field_error(mut self, field: impl Into<String>) -> Self {
        self.expected.error = Some(ErrorKind::Field {
            field: field.into(),
        });
        self
    }

    /// Expect a form-level error
    #[must_use]
    pub fn generic_error(mut self) -> Self {
        self.expected.error = Some(ErrorKind::Generic);
        self
    }

    /// Expect a control state afterwards
    #[must_use]
    pub fn field_state(mut self, field: impl Into<String>, state: FieldState) -> Self {
        let _ = self.expected.field_states.insert(field.into(), state);
        self
    }

    /// Finish the record
    #[must_use]
    pub fn build(self) -> TestDataRecord {
        TestDataRecord {
            id: self.id,
            input: self.input,
            expected: self.expected,
        }
    }
}

/// Ordered, validated collection of records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTable {
    #[serde(default)]
    name: String,
    records: Vec<TestDataRecord>,
}

impl DataTable {
    /// Build and validate a table
    pub fn new(name: impl Into<String>, records: Vec<TestDataRecord>) -> ProbeResult<Self> {
        let table = Self {
            name: name.into(),
            records,
        };
        table.validate()?;
        Ok(table)
    }

    /// Parse from YAML
    pub fn from_yaml(yaml: &str) -> ProbeResult<Self> {
        let table: Self = serde_yaml_ng::from_str(yaml)?;
        table.validate()?;
        Ok(table)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> ProbeResult<Self> {
        let table: Self = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_path(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("yaml" | "yml") => Self::from_yaml(&text),
            other => Err(ProbeError::InvalidData {
                message: format!("unsupported data file extension {other:?}"),
            }),
        }
    }

    /// Check every record and id uniqueness
    pub fn validate(&self) -> ProbeResult<()> {
        let mut seen = HashSet::new();
        for record in &self.records {
            record.validate()?;
            if !seen.insert(record.id()) {
                return Err(ProbeError::InvalidData {
                    message: format!("duplicate record id '{}'", record.id()),
                });
            }
        }
        Ok(())
    }

    /// Table name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records in order
    #[must_use]
    pub fn records(&self) -> &[TestDataRecord] {
        &self.records
    }

    /// Record by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TestDataRecord> {
        self.records.iter().find(|r| r.id() == id)
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records expecting success
    pub fn positives(&self) -> impl Iterator<Item = &TestDataRecord> {
        self.records.iter().filter(|r| r.is_positive())
    }

    /// Records expecting rejection
    pub fn negatives(&self) -> impl Iterator<Item = &TestDataRecord> {
        self.records.iter().filter(|r| !r.is_positive())
    }
}

/// Short random token for per-scenario fixtures
#[must_use]
pub fn unique_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Per-scenario address, e.g. `qa+3f2a9c1be0d4@example.test`
#[must_use]
pub fn unique_email(prefix: &str, domain: &str) -> String {
    format!("{prefix}+{}@{domain}", unique_suffix())
}

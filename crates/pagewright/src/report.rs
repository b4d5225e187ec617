//! Suite reporting: text, JSON and JUnit XML.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

use crate::result::ProbeResult;
use crate::scenario::ScenarioResult;

/// Results of running one scenario over a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    suite: String,
    results: Vec<ScenarioResult>,
    duration_ms: u64,
}

impl SuiteReport {
    /// Build a report from finished results
    #[must_use]
    pub fn new(suite: impl Into<String>, results: Vec<ScenarioResult>, duration_ms: u64) -> Self {
        Self {
            suite: suite.into(),
            results,
            duration_ms,
        }
    }

    /// Append another result (e.g. from a second scenario)
    pub fn push(&mut self, result: ScenarioResult) {
        self.duration_ms += result.duration_ms();
        self.results.push(result);
    }

    /// Suite name
    #[must_use]
    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// Results in run order
    #[must_use]
    pub fn results(&self) -> &[ScenarioResult] {
        &self.results
    }

    /// Wall time of the suite
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Get number of passed scenarios
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    /// Get number of failed scenarios
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.total_count() - self.passed_count()
    }

    /// Get total scenario count
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.results.len()
    }

    /// Get pass rate (0.0 to 1.0)
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 1.0;
        }
        self.passed_count() as f64 / self.results.len() as f64
    }

    /// Check if all scenarios passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    /// Get failing results
    #[must_use]
    pub fn failures(&self) -> Vec<&ScenarioResult> {
        self.results.iter().filter(|r| !r.passed()).collect()
    }

    /// Outcome per record id, in run order
    #[must_use]
    pub fn outcomes(&self) -> Vec<(&str, bool)> {
        self.results
            .iter()
            .map(|r| (r.record_id(), r.passed()))
            .collect()
    }

    /// Generate summary string
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} passed ({:.1}%)",
            self.suite,
            self.passed_count(),
            self.total_count(),
            self.pass_rate() * 100.0
        )
    }

    /// One line per scenario; failures add the error and the indented
    /// step trail
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            let status = if result.passed() { "PASS" } else { "FAIL" };
            let _ = writeln!(
                out,
                "{status} {} [{}] ({} ms)",
                result.scenario(),
                result.record_id(),
                result.duration_ms()
            );
            if result.passed() {
                continue;
            }
            if let (Some(phase), Some(error)) = (result.failed_phase(), result.error()) {
                let _ = writeln!(out, "    {phase}: {error}");
            }
            if let Some(teardown) = result.teardown_error() {
                let _ = writeln!(out, "    teardown: {teardown}");
            }
            if let Some(text) = result.last_error_text() {
                let _ = writeln!(out, "    on screen: {text}");
            }
            for step in result.log() {
                let _ = writeln!(out, "      {step}");
            }
        }
        let _ = writeln!(out, "{}", self.summary());
        out
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> ProbeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Render JUnit XML content
    #[must_use]
    pub fn render_junit(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        let _ = writeln!(
            xml,
            r#"<testsuite name="{}" tests="{}" failures="{}" time="{:.3}">"#,
            escape_xml(&self.suite),
            self.total_count(),
            self.failed_count(),
            self.duration_ms as f64 / 1000.0
        );
        for result in &self.results {
            let _ = writeln!(
                xml,
                r#"  <testcase classname="{}" name="{}" time="{:.3}">"#,
                escape_xml(result.scenario()),
                escape_xml(result.record_id()),
                result.duration_ms() as f64 / 1000.0
            );
            if let Some(error) = result.error() {
                let _ = writeln!(
                    xml,
                    r#"    <failure message="{}">{}</failure>"#,
                    escape_xml(error),
                    escape_xml(&result.trail())
                );
            }
            xml.push_str("  </testcase>\n");
        }
        xml.push_str("</testsuite>\n");
        xml
    }

    /// Write JUnit XML for CI integration
    ///
    /// # Errors
    ///
    /// Returns error if file writing fails
    pub fn write_junit(&self, output_path: &Path) -> ProbeResult<()> {
        std::fs::write(output_path, self.render_junit())?;
        Ok(())
    }
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

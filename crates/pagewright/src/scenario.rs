//! Scenario Runner.
//!
//! A scenario runs one [`TestDataRecord`] through four phases:
//!
//! ```text
//! Setup ──► Act ──► Verify ──► Teardown
//!   │        │        │           ▲
//!   └────────┴────────┴── error ──┘
//! ```
//!
//! The first error in Setup, Act or Verify marks the result failed and
//! jumps to Teardown. Teardown always runs, and every session the scenario
//! opened is closed afterwards, failure or not. Failed assertions are never
//! retried; only eventual conditions poll.
//!
//! Every run gets a fresh [`ScenarioContext`]: new sessions, a new action
//! log, and fresh `State`. Nothing is shared between runs except the
//! engine, the immutable config and the mailbox, so a table's records can
//! run in any order with the same outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::Instrument;

use crate::action_log::{ActionLog, StepEntry, StepOutcome};
use crate::config::SuiteConfig;
use crate::data::{DataTable, TestDataRecord};
use crate::driver::{BrowserEngine, BrowserSession};
use crate::mailbox::{MailArrival, MailMessage, Mailbox};
use crate::page_object::{Page, PageSpec};
use crate::report::SuiteReport;
use crate::result::{FailureCategory, ProbeError, ProbeResult};
use crate::verify::Verifier;
use crate::wait::poll_until;

/// Scenario lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Preconditions (login, create fixtures)
    Setup,
    /// The operation under test
    Act,
    /// Outcome checks
    Verify,
    /// Cleanup
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Act => "act",
            Self::Verify => "verify",
            Self::Teardown => "teardown",
        })
    }
}

/// Per-run resources handed to every phase
pub struct ScenarioContext {
    engine: Arc<dyn BrowserEngine>,
    primary: Arc<dyn BrowserSession>,
    secondary: Vec<Arc<dyn BrowserSession>>,
    log: ActionLog,
    config: Arc<SuiteConfig>,
    mailbox: Option<Arc<dyn Mailbox>>,
    last_error_text: Option<String>,
}

impl fmt::Debug for ScenarioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioContext")
            .field("primary", &self.primary.label())
            .field(
                "secondary",
                &self.secondary.iter().map(|s| s.label()).collect::<Vec<_>>(),
            )
            .field("steps", &self.log.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScenarioContext {
    /// Primary session
    #[must_use]
    pub fn primary(&self) -> &Arc<dyn BrowserSession> {
        &self.primary
    }

    /// Suite configuration
    #[must_use]
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Action log of this run
    #[must_use]
    pub const fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Bind a page spec to the primary session
    #[must_use]
    pub fn page(&self, spec: &Arc<PageSpec>) -> Page {
        self.page_on(spec, &self.primary)
    }

    /// Bind a page spec to another session of this run
    #[must_use]
    pub fn page_on(&self, spec: &Arc<PageSpec>, session: &Arc<dyn BrowserSession>) -> Page {
        Page::new(
            Arc::clone(spec),
            Arc::clone(session),
            self.log.clone(),
            self.config.base_url.clone(),
        )
        .with_settle_timeout(self.config.ui_poll.timeout())
    }

    /// Verifier bound to `page` and this run's config
    #[must_use]
    pub fn verifier<'a>(&'a self, page: &'a Page) -> Verifier<'a> {
        Verifier::new(page, &self.config)
    }

    /// Open another independent session (a second actor). It is closed
    /// with the primary session after teardown.
    pub async fn open_secondary(&mut self, label: &str) -> ProbeResult<Arc<dyn BrowserSession>> {
        let session = self.engine.new_session(label).await?;
        let _ = self
            .log
            .record(label, "open_session", &[], StepOutcome::Ok);
        self.secondary.push(Arc::clone(&session));
        Ok(session)
    }

    /// Configured mailbox
    pub fn mailbox(&self) -> ProbeResult<Arc<dyn Mailbox>> {
        self.mailbox.clone().ok_or_else(|| ProbeError::Config {
            message: "scenario needs a mailbox but none is configured".to_string(),
        })
    }

    /// Wait for mail with the mail poll settings, logged as one step
    pub async fn await_mail(&self, recipient: &str, subject: &str) -> ProbeResult<MailMessage> {
        let arrival = MailArrival::new(self.mailbox()?, recipient, subject);
        let result = poll_until(&arrival, self.config.mail_poll)
            .await
            .map(|p| p.witness);
        let outcome = match &result {
            Ok(_) => StepOutcome::Ok,
            Err(err) => StepOutcome::Failed {
                message: err.to_string(),
            },
        };
        let _ = self.log.record(
            "mailbox",
            "await_mail",
            &[("to", recipient), ("subject", subject)],
            outcome,
        );
        result
    }

    /// Remember the last error text seen on screen for the result
    pub fn note_error_text(&mut self, text: impl Into<String>) {
        self.last_error_text = Some(text.into());
    }

    /// Last error text noted by the scenario
    #[must_use]
    pub fn last_error_text(&self) -> Option<&str> {
        self.last_error_text.as_deref()
    }

    async fn close_all(&mut self) -> ProbeResult<()> {
        let mut first_error = None;
        for session in self.secondary.drain(..).rev() {
            if let Err(err) = session.close().await {
                tracing::warn!(session = session.label(), error = %err, "close failed");
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.primary.close().await {
            tracing::warn!(session = self.primary.label(), error = %err, "close failed");
            first_error.get_or_insert(err);
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// One user-facing flow, parametrized by a test data record.
///
/// `State` carries values between phases of one run (e.g. the listing count
/// before the action); it is created fresh for every run.
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Per-run state passed between phases
    type State: Default + Send;

    /// Scenario name used in results and logs
    fn name(&self) -> &str;

    /// Establish preconditions
    ///
    /// # Errors
    ///
    /// A failure skips Act and Verify.
    async fn setup(
        &self,
        ctx: &mut ScenarioContext,
        record: &TestDataRecord,
        state: &mut Self::State,
    ) -> ProbeResult<()> {
        let _ = (ctx, record, state);
        Ok(())
    }

    /// Perform the operation under test
    async fn act(
        &self,
        ctx: &mut ScenarioContext,
        record: &TestDataRecord,
        state: &mut Self::State,
    ) -> ProbeResult<()>;

    /// Check the outcome against `record.expected()`
    async fn verify(
        &self,
        ctx: &mut ScenarioContext,
        record: &TestDataRecord,
        state: &mut Self::State,
    ) -> ProbeResult<()>;

    /// Clean up; runs whatever happened before
    async fn teardown(
        &self,
        ctx: &mut ScenarioContext,
        record: &TestDataRecord,
        state: &mut Self::State,
    ) -> ProbeResult<()> {
        let _ = (ctx, record, state);
        Ok(())
    }
}

/// Outcome of one scenario run for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    scenario: String,
    record_id: String,
    passed: bool,
    failed_phase: Option<Phase>,
    category: Option<FailureCategory>,
    error: Option<String>,
    teardown_error: Option<String>,
    last_error_text: Option<String>,
    log: Vec<StepEntry>,
    started_at: DateTime<Utc>,
    duration_ms: u64,
}

impl ScenarioResult {
    /// Scenario name
    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// Record id
    #[must_use]
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Whether every phase succeeded
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.passed
    }

    /// Phase that failed first
    #[must_use]
    pub const fn failed_phase(&self) -> Option<Phase> {
        self.failed_phase
    }

    /// Classification of the failure
    #[must_use]
    pub const fn category(&self) -> Option<FailureCategory> {
        self.category
    }

    /// Rendered error of the failed phase
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Teardown or close error that occurred after an earlier failure
    #[must_use]
    pub fn teardown_error(&self) -> Option<&str> {
        self.teardown_error.as_deref()
    }

    /// Last error text the scenario saw on screen
    #[must_use]
    pub fn last_error_text(&self) -> Option<&str> {
        self.last_error_text.as_deref()
    }

    /// Full step trail
    #[must_use]
    pub fn log(&self) -> &[StepEntry] {
        &self.log
    }

    /// Start time
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall time of the run in milliseconds
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Step trail, one line per step
    #[must_use]
    pub fn trail(&self) -> String {
        self.log
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `Ok` when passed, otherwise the failure with its narrative
    pub fn into_result(self) -> Result<(), ScenarioFailure> {
        if self.passed {
            return Ok(());
        }
        let trail = self.trail();
        Err(ScenarioFailure {
            scenario: self.scenario,
            record_id: self.record_id,
            phase: self.failed_phase.unwrap_or(Phase::Verify),
            error: self.error.unwrap_or_default(),
            trail,
        })
    }
}

/// A failed scenario, re-raised with its step trail
#[derive(Debug, Clone, Error)]
#[error("scenario '{scenario}' [{record_id}] failed in {phase}: {error}\nsteps:\n{trail}")]
pub struct ScenarioFailure {
    /// Scenario name
    pub scenario: String,
    /// Record id
    pub record_id: String,
    /// Failed phase
    pub phase: Phase,
    /// Rendered error
    pub error: String,
    /// Step trail
    pub trail: String,
}

/// Runs scenarios against an engine
#[derive(Clone)]
pub struct ScenarioRunner {
    engine: Arc<dyn BrowserEngine>,
    config: Arc<SuiteConfig>,
    mailbox: Option<Arc<dyn Mailbox>>,
}

impl fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("config", &self.config)
            .field("mailbox", &self.mailbox.is_some())
            .finish_non_exhaustive()
    }
}

impl ScenarioRunner {
    /// Create a runner
    #[must_use]
    pub fn new(engine: Arc<dyn BrowserEngine>, config: SuiteConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            mailbox: None,
        }
    }

    /// Attach a mailbox for scenarios that check mail
    #[must_use]
    pub fn with_mailbox(mut self, mailbox: Arc<dyn Mailbox>) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    /// Suite configuration
    #[must_use]
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Run one record through all phases
    pub async fn run<S: Scenario>(&self, scenario: &S, record: &TestDataRecord) -> ScenarioResult {
        let span = tracing::info_span!(
            "scenario",
            scenario = scenario.name(),
            record = record.id()
        );
        self.run_inner(scenario, record).instrument(span).await
    }

    async fn run_inner<S: Scenario>(
        &self,
        scenario: &S,
        record: &TestDataRecord,
    ) -> ScenarioResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let log = ActionLog::new(self.config.redactor());

        let primary = match self.engine.new_session("primary").await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "could not open session");
                return ScenarioResult {
                    scenario: scenario.name().to_string(),
                    record_id: record.id().to_string(),
                    passed: false,
                    failed_phase: Some(Phase::Setup),
                    category: Some(err.category()),
                    error: Some(err.to_string()),
                    teardown_error: None,
                    last_error_text: None,
                    log: log.entries(),
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                };
            }
        };

        let mut ctx = ScenarioContext {
            engine: Arc::clone(&self.engine),
            primary,
            secondary: Vec::new(),
            log,
            config: Arc::clone(&self.config),
            mailbox: self.mailbox.clone(),
            last_error_text: None,
        };
        let mut state = S::State::default();

        let mut failure: Option<(Phase, ProbeError)> = None;
        if let Err(err) = scenario.setup(&mut ctx, record, &mut state).await {
            failure = Some((Phase::Setup, err));
        }
        if failure.is_none() {
            if let Err(err) = scenario.act(&mut ctx, record, &mut state).await {
                failure = Some((Phase::Act, err));
            }
        }
        if failure.is_none() {
            if let Err(err) = scenario.verify(&mut ctx, record, &mut state).await {
                failure = Some((Phase::Verify, err));
            }
        }

        let teardown = scenario.teardown(&mut ctx, record, &mut state).await;
        let closed = ctx.close_all().await;
        let mut teardown_error = teardown.err().or_else(|| closed.err());
        if failure.is_none() {
            failure = teardown_error.take().map(|err| (Phase::Teardown, err));
        }

        let duration_ms = clock.elapsed().as_millis() as u64;
        match &failure {
            Some((phase, err)) => {
                tracing::warn!(%phase, error = %err, duration_ms, "scenario failed");
            }
            None => tracing::info!(duration_ms, "scenario passed"),
        }

        ScenarioResult {
            scenario: scenario.name().to_string(),
            record_id: record.id().to_string(),
            passed: failure.is_none(),
            failed_phase: failure.as_ref().map(|(phase, _)| *phase),
            category: failure.as_ref().map(|(_, err)| err.category()),
            error: failure.as_ref().map(|(_, err)| err.to_string()),
            teardown_error: teardown_error.map(|err| err.to_string()),
            last_error_text: ctx.last_error_text.take(),
            log: ctx.log.entries(),
            started_at,
            duration_ms,
        }
    }

    /// Run every record of a table; a failure never stops its siblings
    pub async fn run_table<S: Scenario>(&self, scenario: &S, table: &DataTable) -> SuiteReport {
        let clock = Instant::now();
        let suite = if table.name().is_empty() {
            scenario.name().to_string()
        } else {
            format!("{}/{}", scenario.name(), table.name())
        };
        let mut results = Vec::with_capacity(table.len());
        for record in table.records() {
            results.push(self.run(scenario, record).await);
        }
        SuiteReport::new(suite, results, clock.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDom, MemoryElement, MemoryEngine, StaticApp};
    use std::sync::Mutex;

    fn engine() -> MemoryEngine {
        let mut dom = MemoryDom::new();
        let root = dom.root();
        let _ = dom.append(root, MemoryElement::new("h1").test_id("title").text("Home"));
        MemoryEngine::new("http://app.test", StaticApp::new().page("/", dom))
    }

    fn runner(engine: &MemoryEngine) -> ScenarioRunner {
        ScenarioRunner::new(Arc::new(engine.clone()), SuiteConfig::new("http://app.test"))
    }

    /// Fails in the phase named by the record's `fail_in` input
    struct PhaseRecorder {
        phases: Arc<Mutex<Vec<String>>>,
    }

    impl PhaseRecorder {
        fn new() -> Self {
            Self {
                phases: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn mark(&self, record: &TestDataRecord, phase: &str) -> ProbeResult<()> {
            self.phases.lock().unwrap().push(phase.to_string());
            if record.input("fail_in") == Some(phase) {
                return Err(ProbeError::assertion(phase, "ok", "boom"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Scenario for PhaseRecorder {
        type State = u32;

        fn name(&self) -> &str {
            "phases"
        }

        async fn setup(
            &self,
            ctx: &mut ScenarioContext,
            record: &TestDataRecord,
            state: &mut u32,
        ) -> ProbeResult<()> {
            *state += 1;
            let spec = Arc::new(PageSpec::new("home", "/"));
            ctx.page(&spec).goto().await?;
            let _ = ctx.open_secondary("other").await?;
            self.mark(record, "setup")
        }

        async fn act(
            &self,
            _ctx: &mut ScenarioContext,
            record: &TestDataRecord,
            state: &mut u32,
        ) -> ProbeResult<()> {
            assert_eq!(*state, 1);
            self.mark(record, "act")
        }

        async fn verify(
            &self,
            ctx: &mut ScenarioContext,
            record: &TestDataRecord,
            _state: &mut u32,
        ) -> ProbeResult<()> {
            ctx.note_error_text("seen");
            self.mark(record, "verify")
        }

        async fn teardown(
            &self,
            _ctx: &mut ScenarioContext,
            record: &TestDataRecord,
            _state: &mut u32,
        ) -> ProbeResult<()> {
            self.mark(record, "teardown")
        }
    }

    fn record(id: &str, fail_in: Option<&str>) -> TestDataRecord {
        let builder = TestDataRecord::positive(id);
        match fail_in {
            Some(phase) => builder.input("fail_in", phase).build(),
            None => builder.build(),
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[tokio::test]
        async fn test_passing_run() {
            let engine = engine();
            let recorder = PhaseRecorder::new();
            let result = runner(&engine).run(&recorder, &record("ok", None)).await;

            assert!(result.passed());
            assert_eq!(result.failed_phase(), None);
            assert_eq!(result.last_error_text(), Some("seen"));
            assert_eq!(*recorder.phases.lock().unwrap(), ["setup", "act", "verify", "teardown"]);
            assert_eq!(engine.sessions_opened(), 2);
            assert_eq!(engine.open_sessions(), 0);
            assert!(result.into_result().is_ok());
        }

        #[tokio::test]
        async fn test_setup_failure_skips_to_teardown() {
            let engine = engine();
            let recorder = PhaseRecorder::new();
            let result = runner(&engine).run(&recorder, &record("bad", Some("setup"))).await;

            assert!(!result.passed());
            assert_eq!(result.failed_phase(), Some(Phase::Setup));
            assert_eq!(result.category(), Some(FailureCategory::AssertionFailed));
            assert_eq!(*recorder.phases.lock().unwrap(), ["setup", "teardown"]);
            assert_eq!(engine.open_sessions(), 0);
        }

        #[tokio::test]
        async fn test_verify_failure_keeps_trail() {
            let engine = engine();
            let recorder = PhaseRecorder::new();
            let result = runner(&engine).run(&recorder, &record("bad", Some("verify"))).await;

            assert_eq!(result.failed_phase(), Some(Phase::Verify));
            assert!(result.log().iter().any(|e| e.step == "goto"));
            let failure = result.into_result().unwrap_err();
            let message = failure.to_string();
            assert!(message.contains("failed in verify"));
            assert!(message.contains("[primary] goto"));
        }

        #[tokio::test]
        async fn test_teardown_failure_fails_passing_run() {
            let engine = engine();
            let recorder = PhaseRecorder::new();
            let result = runner(&engine).run(&recorder, &record("td", Some("teardown"))).await;
            assert_eq!(result.failed_phase(), Some(Phase::Teardown));
            assert_eq!(engine.open_sessions(), 0);
        }
    }

    mod table_tests {
        use super::*;

        #[tokio::test]
        async fn test_failure_does_not_block_siblings() {
            let engine = engine();
            let table = DataTable::new(
                "t",
                vec![
                    record("a", Some("act")),
                    record("b", None),
                    record("c", Some("verify")),
                ],
            )
            .unwrap();
            let report = runner(&engine).run_table(&PhaseRecorder::new(), &table).await;

            assert_eq!(report.total_count(), 3);
            assert_eq!(report.passed_count(), 1);
            assert_eq!(report.suite(), "phases/t");
            assert_eq!(engine.sessions_opened(), 6);
            assert_eq!(engine.open_sessions(), 0);
        }
    }

    #[tokio::test]
    async fn test_missing_mailbox_is_config_error() {
        let engine = engine();
        let ctx = ScenarioContext {
            engine: Arc::new(engine.clone()),
            primary: engine.new_session("primary").await.unwrap(),
            secondary: Vec::new(),
            log: ActionLog::default(),
            config: Arc::new(SuiteConfig::new("http://app.test")),
            mailbox: None,
            last_error_text: None,
        };
        assert!(matches!(ctx.mailbox(), Err(ProbeError::Config { .. })));
    }
}

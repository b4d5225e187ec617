//! Pagewright: page objects, data-driven scenarios and bounded polling for
//! UI tests.
//!
//! A scenario applies one test data record to a web UI through page objects
//! and checks the outcome, waiting on eventual conditions where an effect
//! is asynchronous (a banner after a re-render, a notification mail).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ DataTable    │──►│ ScenarioRunner│──►│ Page (spec + │──►│ BrowserEngine│
//! │ (YAML/JSON)  │   │ Setup/Act/    │   │ session)     │   │ memory | CDP │
//! └──────────────┘   │ Verify/Teardn │   └──────┬───────┘   └──────────────┘
//!                    └──────┬────────┘          │
//!                           ▼                   ▼
//!                    ┌──────────────┐   ┌───────────────┐
//!                    │ SuiteReport  │   │ poll_until    │
//!                    │ + ActionLog  │   │ (conditions,  │
//!                    └──────────────┘   │  mailbox)     │
//!                                       └───────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pagewright::{admin::CreateUser, DataTable, MemoryMailbox, ScenarioRunner, SuiteConfig};
//! use std::sync::Arc;
//!
//! # async fn run(engine: Arc<dyn pagewright::BrowserEngine>) -> pagewright::ProbeResult<()> {
//! let config = SuiteConfig::from_env()?;
//! let table = DataTable::from_path("tests/data/create_user.yaml")?;
//! let runner = ScenarioRunner::new(engine, config).with_mailbox(Arc::new(MemoryMailbox::new()));
//! let report = runner.run_table(&CreateUser::new()?, &table).await;
//! println!("{}", report.render_text());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod action_log;
pub mod admin;
#[cfg(feature = "browser")]
pub mod cdp;
pub mod conditions;
pub mod config;
pub mod data;
pub mod driver;
pub mod locator;
pub mod logging;
pub mod mailbox;
pub mod memory;
pub mod page_object;
pub mod report;
pub mod result;
pub mod scenario;
pub mod verify;
pub mod wait;

pub use action_log::{ActionLog, Redactor, StepEntry, StepOutcome};
#[cfg(feature = "browser")]
pub use cdp::{CdpEngine, CdpSession};
pub use conditions::{CountAtLeast, Hidden, TextContains, TextMatches, Visible};
pub use config::{MessagePatterns, SuiteConfig};
pub use data::{
    unique_email, unique_suffix, DataTable, ErrorKind, ExpectedOutcome, FieldState,
    RecordBuilder, TestDataRecord,
};
pub use driver::{
    resolve, resolve_one, BrowserEngine, BrowserSession, DriverConfig, ElementRef,
    ElementSnapshot,
};
pub use locator::{Cardinality, Locator, Scope, Strategy};
pub use logging::init_tracing;
#[cfg(feature = "http-mailbox")]
pub use mailbox::HttpMailbox;
pub use mailbox::{MailArrival, MailMessage, Mailbox, MemoryMailbox};
pub use memory::{AppResponse, MemoryApp, MemoryDom, MemoryElement, MemoryEngine, StaticApp};
pub use page_object::{
    FieldKind, FormField, LocatorDef, Page, PageObject, PageRegistry, PageSpec, UrlMatcher,
};
pub use report::SuiteReport;
pub use result::{FailureCategory, ProbeError, ProbeResult};
pub use scenario::{
    Phase, Scenario, ScenarioContext, ScenarioFailure, ScenarioResult, ScenarioRunner,
};
pub use verify::Verifier;
pub use wait::{eventually, poll_until, EventualCondition, FnCondition, PollConfig, Polled};

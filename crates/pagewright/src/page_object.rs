//! Page Object Model support.
//!
//! A [`PageSpec`] is the declarative part of a page: its URL pattern and a
//! map from logical element names to locators, usually loaded from YAML. A
//! [`Page`] binds a spec to one browser session and the scenario's action
//! log; it holds no other state and is constructed fresh per scenario.
//!
//! ```yaml
//! name: users
//! url_pattern: /users
//! ready: [users_table]
//! locators:
//!   users_table:
//!     find: { by: test_id, value: users }
//!   user_row:
//!     find: { by: css, value: tr.user-row }
//!     within: users_table
//!   delete_button:
//!     find: { by: role, role: button, name: Delete }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::action_log::{ActionLog, StepOutcome, REDACTED};
use crate::data::TestDataRecord;
use crate::driver::{resolve, resolve_one, BrowserSession, ElementRef, ElementSnapshot};
use crate::locator::{Locator, Strategy};
use crate::result::{ProbeError, ProbeResult};
use crate::wait::{poll_until, EventualCondition, PollConfig};

/// One locator entry in a YAML page spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocatorDef {
    /// How to find the element
    pub find: Strategy,
    /// Name of another entry to resolve first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within: Option<String>,
    /// Keep only elements containing a match for this strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has: Option<Strategy>,
    /// Accept any number of matches
    #[serde(default)]
    pub many: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PageSpecDef {
    name: String,
    url_pattern: String,
    #[serde(default)]
    ready: Vec<String>,
    #[serde(default)]
    locators: BTreeMap<String, LocatorDef>,
}

/// Declarative description of one page
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "PageSpecDef")]
pub struct PageSpec {
    name: String,
    url: UrlMatcher,
    locators: BTreeMap<String, Locator>,
    ready: Vec<String>,
}

impl TryFrom<PageSpecDef> for PageSpec {
    type Error = ProbeError;

    fn try_from(def: PageSpecDef) -> ProbeResult<Self> {
        let locators = build_locators(&def.name, &def.locators)?;
        let spec = Self {
            name: def.name,
            url: UrlMatcher::new(&def.url_pattern),
            locators,
            ready: def.ready,
        };
        spec.validate()?;
        Ok(spec)
    }
}

fn build_locators(
    page: &str,
    defs: &BTreeMap<String, LocatorDef>,
) -> ProbeResult<BTreeMap<String, Locator>> {
    let mut built = BTreeMap::new();
    for name in defs.keys() {
        let _ = build_one(page, name, defs, &mut built, &mut Vec::new())?;
    }
    Ok(built)
}

fn build_one(
    page: &str,
    name: &str,
    defs: &BTreeMap<String, LocatorDef>,
    built: &mut BTreeMap<String, Locator>,
    stack: &mut Vec<String>,
) -> ProbeResult<Locator> {
    if let Some(done) = built.get(name) {
        return Ok(done.clone());
    }
    if stack.iter().any(|s| s == name) {
        stack.push(name.to_string());
        return Err(ProbeError::InvalidLocator {
            message: format!("page '{page}': cyclic 'within' chain {}", stack.join(" -> ")),
        });
    }
    let def = defs.get(name).ok_or_else(|| ProbeError::InvalidLocator {
        message: format!("page '{page}': unknown locator '{name}'"),
    })?;

    stack.push(name.to_string());
    let mut locator = Locator::new(name, def.find.clone());
    if let Some(has) = &def.has {
        locator = locator.has(Locator::from_strategy(has.clone()));
    }
    if let Some(parent) = &def.within {
        if !defs.contains_key(parent) {
            return Err(ProbeError::InvalidLocator {
                message: format!("page '{page}': '{name}' is within unknown locator '{parent}'"),
            });
        }
        locator = locator.within(build_one(page, parent, defs, built, stack)?);
    }
    if def.many {
        locator = locator.all();
    }
    let _ = stack.pop();
    let _ = built.insert(name.to_string(), locator.clone());
    Ok(locator)
}

impl PageSpec {
    /// Create an empty spec
    #[must_use]
    pub fn new(name: impl Into<String>, url_pattern: &str) -> Self {
        Self {
            name: name.into(),
            url: UrlMatcher::new(url_pattern),
            locators: BTreeMap::new(),
            ready: Vec::new(),
        }
    }

    /// Add a locator; it is stored under `name` and renamed to it
    #[must_use]
    pub fn with_locator(mut self, name: impl Into<String>, locator: Locator) -> Self {
        let name = name.into();
        let _ = self.locators.insert(name.clone(), locator.named(name));
        self
    }

    /// Require a locator to be visible for the page to count as loaded
    #[must_use]
    pub fn with_ready(mut self, name: impl Into<String>) -> Self {
        self.ready.push(name.into());
        self
    }

    /// Parse and validate one page from YAML
    pub fn from_yaml(yaml: &str) -> ProbeResult<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Check that every `ready` entry names a locator
    pub fn validate(&self) -> ProbeResult<()> {
        for name in &self.ready {
            if !self.locators.contains_key(name) {
                return Err(ProbeError::InvalidLocator {
                    message: format!("page '{}': ready entry '{name}' is not a locator", self.name),
                });
            }
        }
        Ok(())
    }

    /// Page name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL pattern
    #[must_use]
    pub fn url_pattern(&self) -> &str {
        self.url.pattern()
    }

    /// URL matcher
    #[must_use]
    pub const fn url_matcher(&self) -> &UrlMatcher {
        &self.url
    }

    /// Locator by logical name
    pub fn locator(&self, name: &str) -> ProbeResult<&Locator> {
        self.locators
            .get(name)
            .ok_or_else(|| ProbeError::InvalidLocator {
                message: format!("page '{}' has no locator '{name}'", self.name),
            })
    }

    /// All logical names
    #[must_use]
    pub fn locator_names(&self) -> Vec<&str> {
        self.locators.keys().map(String::as_str).collect()
    }

    /// Names that must be visible once loaded
    #[must_use]
    pub fn ready(&self) -> &[String] {
        &self.ready
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDoc {
    pages: Vec<PageSpec>,
}

/// Named catalogue of page specs
#[derive(Debug, Clone, Default)]
pub struct PageRegistry {
    pages: BTreeMap<String, Arc<PageSpec>>,
}

impl PageRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML document with a top-level `pages` list
    pub fn from_yaml(yaml: &str) -> ProbeResult<Self> {
        let doc: RegistryDoc = serde_yaml_ng::from_str(yaml)?;
        let mut registry = Self::new();
        for page in doc.pages {
            registry.register(page)?;
        }
        Ok(registry)
    }

    /// Add a page; names must be unique
    pub fn register(&mut self, spec: PageSpec) -> ProbeResult<()> {
        spec.validate()?;
        if self.pages.contains_key(spec.name()) {
            return Err(ProbeError::InvalidLocator {
                message: format!("duplicate page '{}'", spec.name()),
            });
        }
        let _ = self.pages.insert(spec.name().to_string(), Arc::new(spec));
        Ok(())
    }

    /// Page by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<PageSpec>> {
        self.pages.get(name).cloned()
    }

    /// Page by name, or an error naming the missing page
    pub fn require(&self, name: &str) -> ProbeResult<Arc<PageSpec>> {
        self.get(name).ok_or_else(|| ProbeError::Config {
            message: format!("no page spec named '{name}'"),
        })
    }

    /// First page whose URL pattern matches `url`
    #[must_use]
    pub fn page_for_url(&self, url: &str) -> Option<Arc<PageSpec>> {
        let path = url_path(url);
        self.pages
            .values()
            .find(|p| p.url_matcher().matches(&path))
            .cloned()
    }

    /// Registered names
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        self.pages.keys().map(String::as_str).collect()
    }

    /// Number of pages
    #[must_use]
    pub fn count(&self) -> usize {
        self.pages.len()
    }
}

/// URL pattern matcher for page objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMatcher {
    pattern: String,
    segments: Vec<UrlSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UrlSegment {
    Literal(String),
    Wildcard,
    Parameter(String),
}

impl UrlMatcher {
    /// Create a new URL matcher from a pattern
    ///
    /// Patterns support:
    /// - Literal segments: `/login`
    /// - Wildcards: `/users/*`
    /// - Named parameters: `/users/:id`
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "*" {
                    UrlSegment::Wildcard
                } else if let Some(name) = s.strip_prefix(':') {
                    UrlSegment::Parameter(name.to_string())
                } else {
                    UrlSegment::Literal(s.to_string())
                }
            })
            .collect();

        Self {
            pattern: pattern.to_string(),
            segments,
        }
    }

    /// Check if a path matches the pattern
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        parts.len() == self.segments.len()
            && self.segments.iter().zip(&parts).all(|(segment, part)| match segment {
                UrlSegment::Literal(lit) => lit == part,
                UrlSegment::Wildcard | UrlSegment::Parameter(_) => true,
            })
    }

    /// Extract named parameters from a path
    #[must_use]
    pub fn extract_params(&self, path: &str) -> HashMap<String, String> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.segments
            .iter()
            .zip(&parts)
            .filter_map(|(segment, part)| match segment {
                UrlSegment::Parameter(name) => Some((name.clone(), (*part).to_string())),
                _ => None,
            })
            .collect()
    }

    /// Whether the pattern is a plain path that can be navigated to
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, UrlSegment::Literal(_)))
    }

    /// Get the original pattern
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Path part of an absolute or relative URL, without query or fragment
#[must_use]
pub fn url_path(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = if url.contains("://") {
        rest.find('/').map_or("/", |i| &rest[i..])
    } else {
        rest
    };
    let end = path.find(['?', '#']).unwrap_or(path.len());
    path[..end].to_string()
}

/// How [`Page::fill_form`] enters one record field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Text input
    Text,
    /// Select box
    Select,
    /// Checkbox (`true`/`yes`/`on`/`1` check it)
    Checkbox,
}

/// One field of a form, in entry order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    /// Key in the record input
    pub key: String,
    /// Locator name on the page (defaults to `key`)
    pub locator: String,
    /// How to enter it
    pub kind: FieldKind,
}

impl FormField {
    fn new(key: &str, kind: FieldKind) -> Self {
        Self {
            key: key.to_string(),
            locator: key.to_string(),
            kind,
        }
    }

    /// Text input
    #[must_use]
    pub fn text(key: &str) -> Self {
        Self::new(key, FieldKind::Text)
    }

    /// Select box
    #[must_use]
    pub fn select(key: &str) -> Self {
        Self::new(key, FieldKind::Select)
    }

    /// Checkbox
    #[must_use]
    pub fn checkbox(key: &str) -> Self {
        Self::new(key, FieldKind::Checkbox)
    }

    /// Use a locator name different from the record key
    #[must_use]
    pub fn at(mut self, locator: &str) -> Self {
        self.locator = locator.to_string();
        self
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1" | "checked"
    )
}

/// A page spec bound to one session
#[derive(Clone)]
pub struct Page {
    spec: Arc<PageSpec>,
    session: Arc<dyn BrowserSession>,
    log: ActionLog,
    base_url: String,
    settle_timeout: Duration,
}

/// How long navigation and clicks wait for the page to settle by default
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("page", &self.spec.name())
            .field("session", &self.session.label())
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Page {
    /// Bind a spec to a session
    #[must_use]
    pub fn new(
        spec: Arc<PageSpec>,
        session: Arc<dyn BrowserSession>,
        log: ActionLog,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            spec,
            session,
            log,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }

    /// Bound on the network-idle wait after `goto` and clicks
    #[must_use]
    pub const fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Underlying spec
    #[must_use]
    pub fn spec(&self) -> &PageSpec {
        &self.spec
    }

    /// Bound session
    #[must_use]
    pub fn session(&self) -> &Arc<dyn BrowserSession> {
        &self.session
    }

    /// Scenario action log
    #[must_use]
    pub const fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Locator by logical name
    pub fn locator(&self, name: &str) -> ProbeResult<Locator> {
        self.spec.locator(name).cloned()
    }

    /// A singular locator: `name` restricted to elements containing `text`
    pub fn filtered(&self, name: &str, text: &str) -> ProbeResult<Locator> {
        Ok(self
            .locator(name)?
            .has(Locator::text(text))
            .named(format!("{name}({text})"))
            .one())
    }

    /// `child` resolved inside the single element matched by `parent`
    pub fn child_of(&self, child: &str, parent: Locator) -> ProbeResult<Locator> {
        Ok(self.locator(child)?.within(parent))
    }

    async fn step<T, F>(&self, step: &str, params: &[(&str, &str)], action: F) -> ProbeResult<T>
    where
        F: Future<Output = ProbeResult<T>> + Send,
    {
        let result = action.await;
        let outcome = match &result {
            Ok(_) => StepOutcome::Ok,
            Err(err) => StepOutcome::Failed {
                message: err.to_string(),
            },
        };
        let _ = self
            .log
            .record(self.session.label(), step, params, outcome);
        result
    }

    async fn interactable(&self, locator: &Locator, text_entry: bool) -> ProbeResult<ElementRef> {
        let element = resolve_one(self.session.as_ref(), locator).await?;
        let snapshot = self.session.snapshot(&element).await?;
        let refuse = |reason: &str| ProbeError::ElementNotInteractable {
            name: locator.name().to_string(),
            reason: reason.to_string(),
        };
        if !snapshot.visible {
            return Err(refuse("hidden"));
        }
        if !snapshot.enabled {
            return Err(refuse("disabled"));
        }
        if text_entry && snapshot.is_read_only() {
            return Err(refuse("read-only"));
        }
        Ok(element)
    }

    /// Navigate to this page's URL
    pub async fn goto(&self) -> ProbeResult<()> {
        let url = format!("{}{}", self.base_url, self.spec.url_pattern());
        self.step("goto", &[("url", url.as_str())], async {
            if !self.spec.url_matcher().is_literal() {
                return Err(ProbeError::Config {
                    message: format!(
                        "page '{}' has a parameterized url '{}'",
                        self.spec.name(),
                        self.spec.url_pattern()
                    ),
                });
            }
            self.session.navigate(&url).await?;
            self.session.wait_for_network_idle(self.settle_timeout).await
        })
        .await
    }

    /// Replace the value of a named input
    pub async fn fill(&self, name: &str, value: &str) -> ProbeResult<()> {
        let locator = self.locator(name)?;
        self.fill_at(&locator, value).await
    }

    /// Replace the value of the input matched by `locator`
    pub async fn fill_at(&self, locator: &Locator, value: &str) -> ProbeResult<()> {
        self.fill_as(locator.name(), locator, value).await
    }

    /// The value to log for a field known as `key` and located by `locator`
    fn shown(&self, key: &str, locator: &str, value: &str) -> String {
        let redactor = self.log.redactor();
        if redactor.is_sensitive(key) || redactor.is_sensitive(locator) {
            REDACTED.to_string()
        } else {
            value.to_string()
        }
    }

    async fn fill_as(&self, key: &str, locator: &Locator, value: &str) -> ProbeResult<()> {
        let shown = self.shown(key, locator.name(), value);
        self.step(
            "fill",
            &[("element", locator.name()), ("value", shown.as_str())],
            async {
                let element = self.interactable(locator, true).await?;
                self.session.fill(&element, value).await
            },
        )
        .await
    }

    /// Click a named element
    pub async fn click(&self, name: &str) -> ProbeResult<()> {
        let locator = self.locator(name)?;
        self.click_at(&locator).await
    }

    /// Click the named element inside `parent` ("delete within this row")
    pub async fn click_within(&self, name: &str, parent: Locator) -> ProbeResult<()> {
        let locator = self.child_of(name, parent)?;
        self.click_at(&locator).await
    }

    /// Click the element matched by `locator`
    pub async fn click_at(&self, locator: &Locator) -> ProbeResult<()> {
        let scope = locator.scope_description();
        self.step(
            "click",
            &[("element", locator.name()), ("scope", scope.as_str())],
            async {
                let element = self.interactable(locator, false).await?;
                self.session.click(&element).await?;
                self.session.wait_for_network_idle(self.settle_timeout).await
            },
        )
        .await
    }

    /// Choose an option of a named select box
    pub async fn select(&self, name: &str, option: &str) -> ProbeResult<()> {
        self.select_as(name, name, option).await
    }

    async fn select_as(&self, key: &str, name: &str, option: &str) -> ProbeResult<()> {
        let locator = self.locator(name)?;
        let shown = self.shown(key, name, option);
        self.step("select", &[("element", name), ("option", shown.as_str())], async {
            let element = self.interactable(&locator, false).await?;
            self.session.select_option(&element, option).await
        })
        .await
    }

    /// Set a named checkbox
    pub async fn check(&self, name: &str, checked: bool) -> ProbeResult<()> {
        let locator = self.locator(name)?;
        let state = checked.to_string();
        self.step("check", &[("element", name), ("checked", state.as_str())], async {
            let element = self.interactable(&locator, false).await?;
            self.session.set_checked(&element, checked).await
        })
        .await
    }

    /// Enter record fields in the given order; keys absent from the record
    /// are skipped
    pub async fn fill_form(
        &self,
        record: &TestDataRecord,
        fields: &[FormField],
    ) -> ProbeResult<()> {
        for field in fields {
            let Some(value) = record.input(&field.key) else {
                continue;
            };
            match field.kind {
                FieldKind::Text => {
                    let locator = self.locator(&field.locator)?;
                    self.fill_as(&field.key, &locator, value).await?;
                }
                FieldKind::Select => self.select_as(&field.key, &field.locator, value).await?,
                FieldKind::Checkbox => self.check(&field.locator, truthy(value)).await?,
            }
        }
        Ok(())
    }

    /// Text of a named element
    pub async fn read_text(&self, name: &str) -> ProbeResult<String> {
        let locator = self.locator(name)?;
        self.step("read_text", &[("element", name)], async {
            let element = resolve_one(self.session.as_ref(), &locator).await?;
            Ok(self.session.snapshot(&element).await?.text)
        })
        .await
    }

    /// Current value of a named form control
    pub async fn read_value(&self, name: &str) -> ProbeResult<String> {
        let locator = self.locator(name)?;
        self.step("read_value", &[("element", name)], async {
            let element = resolve_one(self.session.as_ref(), &locator).await?;
            Ok(self.session.snapshot(&element).await?.value.unwrap_or_default())
        })
        .await
    }

    /// Whether a named element is present and visible. Plural locators are
    /// visible when any match is.
    pub async fn is_visible(&self, name: &str) -> ProbeResult<bool> {
        let locator = self.locator(name)?;
        self.is_visible_at(&locator).await
    }

    /// Whether the element matched by `locator` is present and visible
    pub async fn is_visible_at(&self, locator: &Locator) -> ProbeResult<bool> {
        self.step("is_visible", &[("element", locator.name())], async {
            Ok(self.observe(locator).await?.iter().any(|s| s.visible))
        })
        .await
    }

    /// Whether a named element is enabled
    pub async fn is_enabled(&self, name: &str) -> ProbeResult<bool> {
        let locator = self.locator(name)?;
        self.step("is_enabled", &[("element", name)], async {
            let element = resolve_one(self.session.as_ref(), &locator).await?;
            Ok(self.session.snapshot(&element).await?.enabled)
        })
        .await
    }

    /// Number of matches for a named locator
    pub async fn count(&self, name: &str) -> ProbeResult<usize> {
        let locator = self.locator(name)?.all();
        self.step("count", &[("element", name)], async {
            Ok(resolve(self.session.as_ref(), &locator).await?.len())
        })
        .await
    }

    /// Text of every match for a named locator
    pub async fn texts(&self, name: &str) -> ProbeResult<Vec<String>> {
        let locator = self.locator(name)?.all();
        self.step("texts", &[("element", name)], async {
            Ok(self
                .observe(&locator)
                .await?
                .into_iter()
                .map(|s| s.text)
                .collect())
        })
        .await
    }

    /// Whether the session's URL matches this page's pattern
    pub async fn is_current(&self) -> ProbeResult<bool> {
        let url = self.session.current_url().await?;
        Ok(self.spec.url_matcher().matches(&url_path(&url)))
    }

    /// Parameters of the current URL (`/users/:id`)
    pub async fn url_params(&self) -> ProbeResult<HashMap<String, String>> {
        let url = self.session.current_url().await?;
        Ok(self.spec.url_matcher().extract_params(&url_path(&url)))
    }

    /// Snapshots of every match, honoring cardinality. Not logged; used by
    /// conditions while polling.
    pub async fn observe(&self, locator: &Locator) -> ProbeResult<Vec<ElementSnapshot>> {
        let found = resolve(self.session.as_ref(), locator).await?;
        if !locator.is_plural() && found.len() > 1 {
            return Err(ProbeError::ElementAmbiguous {
                name: locator.name().to_string(),
                scope: locator.scope_description(),
                count: found.len(),
            });
        }
        let mut snapshots = Vec::with_capacity(found.len());
        for element in &found {
            snapshots.push(self.session.snapshot(element).await?);
        }
        Ok(snapshots)
    }

    /// Poll a condition, logging one `await` step for the whole wait
    pub async fn wait_for<C>(&self, condition: &C, config: PollConfig) -> ProbeResult<C::Witness>
    where
        C: EventualCondition + ?Sized,
    {
        let description = condition.description();
        let timeout = config.timeout_ms.to_string();
        self.step(
            "await",
            &[("condition", description.as_str()), ("timeout_ms", timeout.as_str())],
            async { poll_until(condition, config).await.map(|p| p.witness) },
        )
        .await
    }

    /// Wait until the session is on this page and every `ready` locator is
    /// visible
    pub async fn wait_until_ready(&self, config: PollConfig) -> ProbeResult<()> {
        let ready = PageReady { page: self };
        self.wait_for(&ready, config).await
    }
}

struct PageReady<'a> {
    page: &'a Page,
}

#[async_trait]
impl EventualCondition for PageReady<'_> {
    type Witness = ();

    fn description(&self) -> String {
        format!("page '{}' ready", self.page.spec.name())
    }

    async fn probe(&self) -> ProbeResult<Option<()>> {
        if !self.page.is_current().await? {
            return Ok(None);
        }
        for name in self.page.spec.ready() {
            let locator = self.page.locator(name)?;
            if !self.page.observe(&locator).await?.iter().any(|s| s.visible) {
                return Ok(None);
            }
        }
        Ok(Some(()))
    }
}

/// Typed page objects built over a [`Page`]
#[async_trait]
pub trait PageObject: Send + Sync {
    /// Bound page
    fn page(&self) -> &Page;

    /// URL pattern this page object handles
    fn url_pattern(&self) -> &str {
        self.page().spec().url_pattern()
    }

    /// Name of the page object for debugging
    fn page_name(&self) -> &str {
        self.page().spec().name()
    }

    /// How long to wait for the page to load
    fn load_timeout(&self) -> PollConfig {
        PollConfig::fast()
    }

    /// Navigate and wait until loaded
    async fn open(&self) -> ProbeResult<()> {
        self.page().goto().await?;
        self.page().wait_until_ready(self.load_timeout()).await
    }

    /// Whether the session is currently on this page
    async fn is_loaded(&self) -> ProbeResult<bool> {
        self.page().is_current().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BrowserEngine;
    use crate::memory::{MemoryDom, MemoryElement, MemoryEngine, StaticApp};

    const USERS_YAML: &str = r"
name: users
url_pattern: /users
ready: [users_table]
locators:
  users_table:
    find: { by: test_id, value: users }
  user_row:
    find: { by: css, value: tr.user-row }
    within: users_table
  delete_button:
    find: { by: role, role: button, name: Delete }
  name_input:
    find: { by: name, value: name }
  password:
    find: { by: name, value: password }
  banner:
    find: { by: test_id, value: banner }
  save:
    find: { by: role, role: button, name: Save }
";

    fn users_dom() -> MemoryDom {
        let mut dom = MemoryDom::new();
        let root = dom.root();
        let table = dom.append(root, MemoryElement::new("table").test_id("users"));
        for (name, email) in [("Jane Doe", "jane@x.test"), ("John Smith", "john@x.test")] {
            let row = dom.append(table, MemoryElement::new("tr").attr("class", "user-row"));
            let _ = dom.append(row, MemoryElement::new("td").text(name));
            let _ = dom.append(row, MemoryElement::new("td").text(email));
            let _ = dom.append(row, MemoryElement::new("button").text("Delete"));
        }
        let _ = dom.append(root, MemoryElement::new("input").attr("name", "name"));
        let _ = dom.append(root, MemoryElement::new("input").attr("name", "password"));
        let _ = dom.append(root, MemoryElement::new("div").test_id("banner").hidden());
        let _ = dom.append(root, MemoryElement::new("button").text("Save").disabled());
        dom
    }

    async fn users_page() -> (Page, MemoryEngine) {
        let engine = MemoryEngine::new(
            "http://admin.test",
            StaticApp::new().page("/users", users_dom()),
        );
        let session = engine.new_session("primary").await.unwrap();
        let spec = Arc::new(PageSpec::from_yaml(USERS_YAML).unwrap());
        let page = Page::new(spec, session, ActionLog::default(), "http://admin.test/");
        page.goto().await.unwrap();
        (page, engine)
    }

    mod spec_tests {
        use super::*;

        #[test]
        fn test_yaml_builds_scoped_locators() {
            let spec = PageSpec::from_yaml(USERS_YAML).unwrap();
            let row = spec.locator("user_row").unwrap();
            assert_eq!(row.scope_description(), "root > users_table");
            assert_eq!(spec.ready(), ["users_table".to_string()]);
            assert!(spec.locator_names().contains(&"delete_button"));
        }

        #[test]
        fn test_unknown_within_rejected() {
            let yaml = "name: p\nurl_pattern: /p\nlocators:
  a:
    find: { by: css, value: a }
    within: ghost
";
            let err = PageSpec::from_yaml(yaml).unwrap_err();
            assert!(err.to_string().contains("ghost"));
        }

        #[test]
        fn test_cycle_rejected() {
            let yaml = "name: p\nurl_pattern: /p\nlocators:
  a:
    find: { by: css, value: a }
    within: b
  b:
    find: { by: css, value: b }
    within: a
";
            let err = PageSpec::from_yaml(yaml).unwrap_err();
            assert!(err.to_string().contains("cyclic"));
        }

        #[test]
        fn test_unknown_ready_rejected() {
            let yaml = "name: p\nurl_pattern: /p\nready: [missing]\n";
            assert!(PageSpec::from_yaml(yaml).is_err());
        }

        #[test]
        fn test_builder_renames_locators() {
            let spec = PageSpec::new("login", "/login")
                .with_locator("submit", Locator::role_named("button", "Sign in"))
                .with_ready("submit");
            assert!(spec.validate().is_ok());
            assert_eq!(spec.locator("submit").unwrap().name(), "submit");
            assert!(spec.locator("nope").is_err());
        }

        #[test]
        fn test_registry() {
            let yaml = format!("pages:\n  - {}", USERS_YAML.trim().replace('\n', "\n    "));
            let mut registry = PageRegistry::from_yaml(&yaml).unwrap();
            assert_eq!(registry.count(), 1);
            assert_eq!(registry.list(), vec!["users"]);
            assert!(registry.require("users").is_ok());
            assert!(registry.require("login").is_err());
            assert_eq!(
                registry.page_for_url("http://admin.test/users?page=2").unwrap().name(),
                "users"
            );
            let dup = PageSpec::new("users", "/other");
            assert!(registry.register(dup).is_err());
        }
    }

    mod url_matcher_tests {
        use super::*;

        #[test]
        fn test_literal_match() {
            let matcher = UrlMatcher::new("/login");
            assert!(matcher.matches("/login"));
            assert!(!matcher.matches("/register"));
            assert!(!matcher.matches("/login/extra"));
            assert!(matcher.is_literal());
        }

        #[test]
        fn test_wildcard_and_parameter() {
            let matcher = UrlMatcher::new("/users/:id");
            assert!(matcher.matches("/users/42"));
            assert!(!matcher.matches("/users"));
            assert!(!matcher.is_literal());
            assert_eq!(
                matcher.extract_params("/users/42").get("id").map(String::as_str),
                Some("42")
            );
            assert!(UrlMatcher::new("/users/*").matches("/users/abc"));
        }

        #[test]
        fn test_url_path() {
            assert_eq!(url_path("https://h.test/users?x=1"), "/users");
            assert_eq!(url_path("https://h.test"), "/");
            assert_eq!(url_path("/login#f"), "/login");
        }
    }

    mod page_tests {
        use super::*;

        #[tokio::test]
        async fn test_goto_and_is_current() {
            let (page, engine) = users_page().await;
            assert!(page.is_current().await.unwrap());
            assert!(engine.was_called("primary:navigate:http://admin.test/users"));
        }

        #[tokio::test]
        async fn test_click_within_filtered_row() {
            let (page, _engine) = users_page().await;
            let row = page.filtered("user_row", "john@x.test").unwrap();
            page.click_within("delete_button", row).await.unwrap();

            let last = page.log().entries().pop().unwrap();
            assert_eq!(last.step, "click");
            assert_eq!(last.params["scope"], "root > users_table > user_row(john@x.test)");
        }

        #[tokio::test]
        async fn test_ambiguous_click_fails() {
            let (page, _engine) = users_page().await;
            let err = page.click("delete_button").await.unwrap_err();
            assert!(matches!(err, ProbeError::ElementAmbiguous { count: 2, .. }));
            assert!(!page.log().entries().last().unwrap().outcome.is_ok());
        }

        #[tokio::test]
        async fn test_disabled_and_hidden_refuse_actions() {
            let (page, _engine) = users_page().await;
            let err = page.click("save").await.unwrap_err();
            assert!(matches!(
                err,
                ProbeError::ElementNotInteractable { ref reason, .. } if reason == "disabled"
            ));
            let err = page.click("banner").await.unwrap_err();
            assert!(matches!(
                err,
                ProbeError::ElementNotInteractable { ref reason, .. } if reason == "hidden"
            ));
        }

        #[tokio::test]
        async fn test_fill_redacts_sensitive_fields() {
            let (page, _engine) = users_page().await;
            page.fill("name_input", "Jane").await.unwrap();
            page.fill("password", "hunter2").await.unwrap();
            assert_eq!(page.read_value("name_input").await.unwrap(), "Jane");

            let rendered = page.log().render();
            assert!(rendered.contains("value=\"Jane\""));
            assert!(!rendered.contains("hunter2"));
        }

        #[tokio::test]
        async fn test_fill_form_redacts_by_record_key() {
            let (page, _engine) = users_page().await;
            let record = TestDataRecord::positive("r1")
                .input("password", "hunter2")
                .build();
            page.fill_form(&record, &[FormField::text("password").at("name_input")])
                .await
                .unwrap();
            assert_eq!(page.read_value("name_input").await.unwrap(), "hunter2");

            let fill = page.log().entries().into_iter().find(|e| e.step == "fill").unwrap();
            assert_eq!(fill.params["element"], "name_input");
            assert_eq!(fill.params["value"], REDACTED);
            assert!(!page.log().render().contains("hunter2"));
        }

        #[tokio::test]
        async fn test_goto_and_click_wait_for_idle() {
            let (page, engine) = users_page().await;
            assert!(engine.was_called("primary:network_idle"));
            let idle_before = engine
                .history()
                .iter()
                .filter(|c| c.ends_with("network_idle"))
                .count();
            let row = page.filtered("user_row", "jane@x.test").unwrap();
            page.click_within("delete_button", row).await.unwrap();
            let idle_after = engine
                .history()
                .iter()
                .filter(|c| c.ends_with("network_idle"))
                .count();
            assert_eq!(idle_after, idle_before + 1);
            assert_eq!(page.log().entries().last().unwrap().step, "click");
        }

        #[tokio::test]
        async fn test_fill_form_skips_absent_keys() {
            let (page, _engine) = users_page().await;
            let record = TestDataRecord::positive("r1").input("name", "Ann").build();
            let before = page.log().len();
            page.fill_form(
                &record,
                &[FormField::text("name").at("name_input"), FormField::text("password")],
            )
            .await
            .unwrap();
            assert_eq!(page.log().len(), before + 1);
        }

        #[tokio::test]
        async fn test_queries() {
            let (page, _engine) = users_page().await;
            assert_eq!(page.count("user_row").await.unwrap(), 2);
            assert_eq!(page.texts("user_row").await.unwrap().len(), 2);
            assert!(!page.is_visible("banner").await.unwrap());
            assert!(page.is_visible("users_table").await.unwrap());
            assert!(!page.is_enabled("save").await.unwrap());
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_until_ready_logs_one_step() {
            let (page, _engine) = users_page().await;
            let before = page.log().len();
            page.wait_until_ready(PollConfig::fast()).await.unwrap();
            let entries = page.log().entries();
            assert_eq!(entries.len(), before + 1);
            assert_eq!(entries.last().unwrap().step, "await");
        }
    }
}

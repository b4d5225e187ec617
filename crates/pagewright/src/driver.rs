//! Browser engine contract.
//!
//! The engine is an external collaborator: pagewright only needs
//! navigate/find/click/fill/read/wait primitives. Implementations:
//!
//! - [`crate::memory::MemoryEngine`]: in-memory DOM for unit tests
//! - `CdpEngine` (feature `browser`): Chromium over CDP via chromiumoxide
//!
//! Sessions take `&self` everywhere so a scenario can hold several page
//! objects bound to the same session at once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::locator::{implicit_role, normalize_ws, Locator};
use crate::result::{ProbeError, ProbeResult};

/// Opaque handle to one resolved element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    /// Engine-specific identifier
    pub id: String,
    /// Logical name of the locator it was resolved for
    pub name: String,
}

impl ElementRef {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Observable state of an element at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    /// Lowercase tag name
    pub tag: String,
    /// Text content including descendants
    pub text: String,
    /// Attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Accessible label (`aria-label` or associated `<label>`)
    #[serde(default)]
    pub label: Option<String>,
    /// Current form value
    #[serde(default)]
    pub value: Option<String>,
    /// Rendered and not hidden
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
    /// Checkbox / radio state
    #[serde(default)]
    pub checked: bool,
}

impl ElementSnapshot {
    /// Attribute value
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Explicit or implicit ARIA role
    #[must_use]
    pub fn role(&self) -> String {
        self.attribute("role").map_or_else(
            || {
                implicit_role(
                    &self.tag,
                    self.attribute("type"),
                    self.attribute("href").is_some(),
                )
                .to_string()
            },
            str::to_string,
        )
    }

    /// Accessible name: label if present, otherwise text
    #[must_use]
    pub fn accessible_name(&self) -> String {
        match self.label.as_deref() {
            Some(label) if !label.trim().is_empty() => normalize_ws(label),
            _ => normalize_ws(&self.text),
        }
    }

    /// Whether the element is read-only
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.attributes.contains_key("readonly")
    }
}

/// Browser configuration for engines that launch a browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Disable the Chromium sandbox
    pub sandbox: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Timeout for navigation in milliseconds
    pub navigation_timeout_ms: u64,
    /// Executable path override
    pub executable_path: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            viewport_width: 1280,
            viewport_height: 800,
            navigation_timeout_ms: 30_000,
            executable_path: None,
        }
    }
}

impl DriverConfig {
    /// Create new config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set headless mode
    #[must_use]
    pub const fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set sandbox mode
    #[must_use]
    pub const fn sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Set viewport dimensions
    #[must_use]
    pub const fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set executable path
    #[must_use]
    pub fn executable(mut self, path: impl Into<String>) -> Self {
        self.executable_path = Some(path.into());
        self
    }

    /// Navigation timeout as a duration
    #[must_use]
    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

/// One browser context/page acting as one actor
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Label used in step logs (e.g. `primary`, `deleted-user`)
    fn label(&self) -> &str;

    /// Navigate to an absolute URL
    async fn navigate(&self, url: &str) -> ProbeResult<()>;

    /// Current URL
    async fn current_url(&self) -> ProbeResult<String>;

    /// Resolve the locator's own strategy and `has` filter, below `parent`
    /// or from the document root. Scope is handled by [`resolve`].
    async fn query(
        &self,
        locator: &Locator,
        parent: Option<&ElementRef>,
    ) -> ProbeResult<Vec<ElementRef>>;

    /// Read the current state of an element
    async fn snapshot(&self, element: &ElementRef) -> ProbeResult<ElementSnapshot>;

    /// Click an element
    async fn click(&self, element: &ElementRef) -> ProbeResult<()>;

    /// Replace an input's value
    async fn fill(&self, element: &ElementRef, value: &str) -> ProbeResult<()>;

    /// Select an option by value or visible text
    async fn select_option(&self, element: &ElementRef, option: &str) -> ProbeResult<()>;

    /// Set a checkbox state
    async fn set_checked(&self, element: &ElementRef, checked: bool) -> ProbeResult<()>;

    /// Wait until in-flight navigation and requests settle
    async fn wait_for_network_idle(&self, timeout: Duration) -> ProbeResult<()>;

    /// Release the session
    async fn close(&self) -> ProbeResult<()>;
}

/// Factory for independent sessions
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Open a new isolated session
    async fn new_session(&self, label: &str) -> ProbeResult<Arc<dyn BrowserSession>>;
}

/// Resolve a locator, walking its scope chain from the outermost parent.
///
/// Every ancestor must resolve to exactly one element.
pub async fn resolve(
    session: &dyn BrowserSession,
    locator: &Locator,
) -> ProbeResult<Vec<ElementRef>> {
    let mut parent: Option<ElementRef> = None;
    for ancestor in locator.scope_chain() {
        let found = session.query(ancestor, parent.as_ref()).await?;
        parent = Some(exactly_one(ancestor, found)?);
    }
    session.query(locator, parent.as_ref()).await
}

/// Resolve a locator that must match exactly one element
pub async fn resolve_one(
    session: &dyn BrowserSession,
    locator: &Locator,
) -> ProbeResult<ElementRef> {
    let found = resolve(session, locator).await?;
    exactly_one(locator, found)
}

fn exactly_one(locator: &Locator, mut found: Vec<ElementRef>) -> ProbeResult<ElementRef> {
    match found.len() {
        0 => Err(ProbeError::ElementNotFound {
            name: locator.name().to_string(),
            scope: locator.scope_description(),
        }),
        1 => Ok(found.remove(0)),
        count => Err(ProbeError::ElementAmbiguous {
            name: locator.name().to_string(),
            scope: locator.scope_description(),
            count,
        }),
    }
}

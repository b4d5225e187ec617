//! In-memory browser engine.
//!
//! A small DOM plus an application callback, enough to exercise page objects,
//! conditions and scenarios without a browser. Each session is an independent
//! actor with its own page and session data; all sessions share the one
//! [`MemoryApp`], which plays the server.
//!
//! Click semantics:
//! - `href` navigates
//! - `data-action` posts the enclosing form (plus the element's other
//!   `data-*` attributes) to [`MemoryApp::action`]
//! - checkboxes toggle

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::driver::{BrowserEngine, BrowserSession, ElementRef, ElementSnapshot};
use crate::locator::{normalize_ws, Locator, Strategy};
use crate::result::{ProbeError, ProbeResult};

/// Index of a node inside a [`MemoryDom`]
pub type NodeId = usize;

/// Per-session key/value storage (cookies, flash messages)
pub type SessionData = BTreeMap<String, String>;

/// Submitted form fields
pub type FormData = BTreeMap<String, String>;

/// One element to insert into a [`MemoryDom`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryElement {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    visible: bool,
    value: Option<String>,
    checked: bool,
}

impl MemoryElement {
    /// Create an element
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            text: String::new(),
            visible: true,
            value: None,
            checked: false,
        }
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.attributes.insert(name.into(), value.into());
        self
    }

    /// Shorthand for `data-testid`
    #[must_use]
    pub fn test_id(self, id: impl Into<String>) -> Self {
        self.attr("data-testid", id)
    }

    /// Set own text
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Render hidden
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Mark disabled
    #[must_use]
    pub fn disabled(self) -> Self {
        self.attr("disabled", "")
    }

    /// Initial form value
    #[must_use]
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Initial checkbox state
    #[must_use]
    pub const fn checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    element: MemoryElement,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A tree of elements rooted at `body`
#[derive(Debug, Clone)]
pub struct MemoryDom {
    nodes: Vec<Node>,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    /// Create a document with an empty `body`
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                element: MemoryElement::new("body"),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// The `body` node
    #[must_use]
    pub const fn root(&self) -> NodeId {
        0
    }

    /// Append `element` as the last child of `parent`
    pub fn append(&mut self, parent: NodeId, element: MemoryElement) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            element,
            parent: Some(parent),
            children: Vec::new(),
        });
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(id);
        }
        id
    }

    /// Number of nodes, `body` included
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only `body` exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Element by id
    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<&MemoryElement> {
        self.nodes.get(id).map(|n| &n.element)
    }

    /// First node carrying `attr=value`
    #[must_use]
    pub fn find_by_attr(&self, attr: &str, value: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.element.attributes.get(attr).map(String::as_str) == Some(value))
    }

    /// Descendants of `id` in document order, `id` excluded
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(id)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = self.nodes.get(next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes.get(id).and_then(|n| n.parent), move |&p| {
            self.nodes.get(p).and_then(|n| n.parent)
        })
    }

    /// Own text plus descendant text
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        if let Some(node) = self.nodes.get(id) {
            parts.push(node.element.text.clone());
        }
        for d in self.descendants(id) {
            parts.push(self.nodes[d].element.text.clone());
        }
        normalize_ws(&parts.join(" "))
    }

    /// Visible when the node and all ancestors are visible
    #[must_use]
    pub fn is_visible(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.element.visible)
            && self.ancestors(id).all(|a| self.nodes[a].element.visible)
    }

    fn label_for(&self, id: NodeId) -> Option<String> {
        let element = &self.nodes.get(id)?.element;
        if let Some(label) = element.attributes.get("aria-label") {
            return Some(label.clone());
        }
        let own_id = element.attributes.get("id")?;
        self.nodes
            .iter()
            .enumerate()
            .find(|(_, n)| {
                n.element.tag == "label" && n.element.attributes.get("for") == Some(own_id)
            })
            .map(|(label_id, _)| self.text_content(label_id))
    }

    /// Snapshot a node
    #[must_use]
    pub fn snapshot(&self, id: NodeId) -> Option<ElementSnapshot> {
        let element = &self.nodes.get(id)?.element;
        Some(ElementSnapshot {
            tag: element.tag.clone(),
            text: self.text_content(id),
            attributes: element.attributes.clone(),
            label: self.label_for(id),
            value: element.value.clone(),
            visible: self.is_visible(id),
            enabled: !element.attributes.contains_key("disabled"),
            checked: element.checked,
        })
    }

    /// Nodes matching the locator's strategy and `has` filter below `parent`
    #[must_use]
    pub fn query(&self, locator: &Locator, parent: Option<NodeId>) -> Vec<NodeId> {
        let scope = parent.unwrap_or_else(|| self.root());
        let mut matched: Vec<NodeId> = self
            .descendants(scope)
            .into_iter()
            .filter(|&id| self.matches(locator, id))
            .collect();
        if matches!(locator.strategy(), Strategy::Text { .. }) {
            // innermost element wins, ancestors share its text
            let set: HashSet<NodeId> = matched.iter().copied().collect();
            matched.retain(|&id| !self.descendants(id).iter().any(|d| set.contains(d)));
        }
        matched
    }

    fn matches(&self, locator: &Locator, id: NodeId) -> bool {
        let Some(snapshot) = self.snapshot(id) else {
            return false;
        };
        locator.matches(&snapshot)
            && locator
                .has_filter()
                .map_or(true, |child| !self.query(child, Some(id)).is_empty())
    }

    fn enclosing_form(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id).find(|&a| self.nodes[a].element.tag == "form")
    }

    /// Named control values below `scope`
    #[must_use]
    pub fn form_values(&self, scope: NodeId) -> FormData {
        let mut data = FormData::new();
        for id in self.descendants(scope) {
            let element = &self.nodes[id].element;
            if !matches!(element.tag.as_str(), "input" | "select" | "textarea") {
                continue;
            }
            let Some(name) = element.attributes.get("name") else {
                continue;
            };
            let value = if element.attributes.get("type").map(String::as_str) == Some("checkbox")
            {
                element.checked.to_string()
            } else {
                element.value.clone().unwrap_or_default()
            };
            let _ = data.insert(name.clone(), value);
        }
        data
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut MemoryElement> {
        self.nodes.get_mut(id).map(|n| &mut n.element)
    }
}

/// What the application does after an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppResponse {
    /// Leave the page as is
    Stay,
    /// Re-render the current path
    Render,
    /// Navigate to a path
    Redirect(String),
}

/// Application under test, as seen by the in-memory engine
pub trait MemoryApp: Send {
    /// Render the page at `path`; `None` means not found
    fn render(&self, path: &str, session: &SessionData) -> Option<MemoryDom>;

    /// Handle a `data-action` click
    fn action(&mut self, action: &str, form: &FormData, session: &mut SessionData) -> AppResponse {
        let _ = (action, form, session);
        AppResponse::Stay
    }
}

/// Fixed pages keyed by path
#[derive(Debug, Clone, Default)]
pub struct StaticApp {
    pages: HashMap<String, MemoryDom>,
}

impl StaticApp {
    /// Create an empty app
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page
    #[must_use]
    pub fn page(mut self, path: impl Into<String>, dom: MemoryDom) -> Self {
        let _ = self.pages.insert(path.into(), dom);
        self
    }
}

impl MemoryApp for StaticApp {
    fn render(&self, path: &str, _session: &SessionData) -> Option<MemoryDom> {
        self.pages.get(path).cloned()
    }
}

type SharedApp = Arc<Mutex<Box<dyn MemoryApp>>>;

fn lock<'a, T: ?Sized>(mutex: &'a Mutex<T>, what: &str) -> ProbeResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| ProbeError::engine(format!("{what} lock poisoned")))
}

/// Engine handing out [`MemorySession`]s over one shared application
#[derive(Clone)]
pub struct MemoryEngine {
    origin: String,
    app: SharedApp,
    history: Arc<Mutex<Vec<String>>>,
    sessions: Arc<Mutex<Vec<Arc<MemorySession>>>>,
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Create an engine serving `app` under `origin` (e.g. `http://admin.test`)
    #[must_use]
    pub fn new(origin: impl Into<String>, app: impl MemoryApp + 'static) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            app: Arc::new(Mutex::new(Box::new(app))),
            history: Arc::new(Mutex::new(Vec::new())),
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Origin all paths are served under
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Every engine call so far, as `label:method[:arg]`
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Whether any recorded call contains `needle`
    #[must_use]
    pub fn was_called(&self, needle: &str) -> bool {
        self.history().iter().any(|c| c.contains(needle))
    }

    /// Sessions opened and not yet closed
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions
            .lock()
            .map(|s| s.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or_default()
    }

    /// Sessions opened in total
    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl BrowserEngine for MemoryEngine {
    async fn new_session(&self, label: &str) -> ProbeResult<Arc<dyn BrowserSession>> {
        let session = Arc::new(MemorySession {
            label: label.to_string(),
            origin: self.origin.clone(),
            app: Arc::clone(&self.app),
            history: Arc::clone(&self.history),
            state: Mutex::new(SessionState::default()),
        });
        lock(&self.sessions, "session list")?.push(Arc::clone(&session));
        lock(&self.history, "history")?.push(format!("{label}:open"));
        Ok(session)
    }
}

#[derive(Debug)]
struct SessionState {
    url: String,
    dom: MemoryDom,
    data: SessionData,
    generation: u64,
    closed: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            url: "about:blank".to_string(),
            dom: MemoryDom::new(),
            data: SessionData::new(),
            generation: 0,
            closed: false,
        }
    }
}

/// One actor in the in-memory engine
pub struct MemorySession {
    label: String,
    origin: String,
    app: SharedApp,
    history: Arc<Mutex<Vec<String>>>,
    state: Mutex<SessionState>,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl MemorySession {
    fn is_closed(&self) -> bool {
        self.state.lock().map_or(true, |s| s.closed)
    }

    fn record(&self, call: String) {
        if let Ok(mut history) = self.history.lock() {
            history.push(format!("{}:{call}", self.label));
        }
    }

    fn open_state(&self) -> ProbeResult<MutexGuard<'_, SessionState>> {
        let state = lock(&self.state, "session")?;
        if state.closed {
            return Err(ProbeError::engine(format!(
                "session '{}' is closed",
                self.label
            )));
        }
        Ok(state)
    }

    fn absolute(&self, href: &str) -> String {
        if href.contains("://") {
            href.to_string()
        } else if href.starts_with('/') {
            format!("{}{href}", self.origin)
        } else {
            format!("{}/{href}", self.origin)
        }
    }

    fn node_of(&self, state: &SessionState, element: &ElementRef) -> ProbeResult<NodeId> {
        let stale = || ProbeError::ElementNotFound {
            name: element.name.clone(),
            scope: "detached (page changed since resolution)".to_string(),
        };
        let (generation, node) = element.id.split_once(':').ok_or_else(stale)?;
        let generation: u64 = generation.parse().map_err(|_| stale())?;
        let node: NodeId = node.parse().map_err(|_| stale())?;
        if generation != state.generation || node >= state.dom.len() {
            return Err(stale());
        }
        Ok(node)
    }

    fn load(&self, url: &str) -> ProbeResult<()> {
        let mut state = self.open_state()?;
        let path = path_of(url);
        let dom = {
            let app = lock(&self.app, "app")?;
            app.render(&path, &state.data)
        }
        .ok_or_else(|| ProbeError::Navigation {
            url: url.to_string(),
            message: "404 not found".to_string(),
        })?;
        state.url = url.to_string();
        state.dom = dom;
        state.generation += 1;
        Ok(())
    }

    fn with_element<R>(
        &self,
        element: &ElementRef,
        f: impl FnOnce(&mut MemoryDom, NodeId) -> ProbeResult<R>,
    ) -> ProbeResult<R> {
        let mut state = self.open_state()?;
        let node = self.node_of(&state, element)?;
        f(&mut state.dom, node)
    }
}

fn path_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .find('/')
        .map_or("/", |i| &without_scheme[i..]);
    let end = path.find(['?', '#']).unwrap_or(path.len());
    path[..end].to_string()
}

fn not_interactable(element: &ElementRef, reason: impl Into<String>) -> ProbeError {
    ProbeError::ElementNotInteractable {
        name: element.name.clone(),
        reason: reason.into(),
    }
}

#[async_trait]
impl BrowserSession for MemorySession {
    fn label(&self) -> &str {
        &self.label
    }

    async fn navigate(&self, url: &str) -> ProbeResult<()> {
        self.record(format!("navigate:{url}"));
        self.load(&self.absolute(url))
    }

    async fn current_url(&self) -> ProbeResult<String> {
        Ok(self.open_state()?.url.clone())
    }

    async fn query(
        &self,
        locator: &Locator,
        parent: Option<&ElementRef>,
    ) -> ProbeResult<Vec<ElementRef>> {
        let state = self.open_state()?;
        let parent = parent.map(|p| self.node_of(&state, p)).transpose()?;
        Ok(state
            .dom
            .query(locator, parent)
            .into_iter()
            .map(|node| ElementRef::new(format!("{}:{node}", state.generation), locator.name()))
            .collect())
    }

    async fn snapshot(&self, element: &ElementRef) -> ProbeResult<ElementSnapshot> {
        let state = self.open_state()?;
        let node = self.node_of(&state, element)?;
        state
            .dom
            .snapshot(node)
            .ok_or_else(|| ProbeError::engine("node vanished"))
    }

    async fn click(&self, element: &ElementRef) -> ProbeResult<()> {
        self.record(format!("click:{}", element.name));
        enum Effect {
            Navigate(String),
            Action(String, FormData),
            Nothing,
        }
        let effect = self.with_element(element, |dom, node| {
            let Some(el) = dom.element(node).cloned() else {
                return Ok(Effect::Nothing);
            };
            if let Some(href) = el.attributes.get("href") {
                return Ok(Effect::Navigate(href.clone()));
            }
            if let Some(action) = el.attributes.get("data-action") {
                let mut form = dom
                    .enclosing_form(node)
                    .map(|f| dom.form_values(f))
                    .unwrap_or_default();
                for (key, value) in &el.attributes {
                    if let Some(param) = key.strip_prefix("data-") {
                        if param != "action" && param != "testid" {
                            let _ = form.insert(param.to_string(), value.clone());
                        }
                    }
                }
                return Ok(Effect::Action(action.clone(), form));
            }
            if el.attributes.get("type").map(String::as_str) == Some("checkbox") {
                if let Some(target) = dom.element_mut(node) {
                    target.checked = !target.checked;
                }
            }
            Ok(Effect::Nothing)
        })?;

        match effect {
            Effect::Navigate(href) => self.load(&self.absolute(&href)),
            Effect::Action(action, form) => {
                let (response, url) = {
                    let mut state = self.open_state()?;
                    let mut app = lock(&self.app, "app")?;
                    (
                        app.action(&action, &form, &mut state.data),
                        state.url.clone(),
                    )
                };
                match response {
                    AppResponse::Stay => Ok(()),
                    AppResponse::Render => self.load(&url),
                    AppResponse::Redirect(path) => self.load(&self.absolute(&path)),
                }
            }
            Effect::Nothing => Ok(()),
        }
    }

    async fn fill(&self, element: &ElementRef, value: &str) -> ProbeResult<()> {
        self.record(format!("fill:{}", element.name));
        self.with_element(element, |dom, node| {
            let target = dom
                .element_mut(node)
                .ok_or_else(|| ProbeError::engine("node vanished"))?;
            if !matches!(target.tag.as_str(), "input" | "textarea") {
                return Err(not_interactable(element, "not a text input"));
            }
            target.value = Some(value.to_string());
            Ok(())
        })
    }

    async fn select_option(&self, element: &ElementRef, option: &str) -> ProbeResult<()> {
        self.record(format!("select:{}", element.name));
        self.with_element(element, |dom, node| {
            if dom.element(node).map(|e| e.tag.as_str()) != Some("select") {
                return Err(not_interactable(element, "not a select"));
            }
            let chosen = dom
                .descendants(node)
                .into_iter()
                .filter(|&o| dom.element(o).is_some_and(|e| e.tag == "option"))
                .find_map(|o| {
                    let opt = dom.element(o)?;
                    let value = opt
                        .attributes
                        .get("value")
                        .cloned()
                        .unwrap_or_else(|| normalize_ws(&opt.text));
                    (value == option || normalize_ws(&opt.text) == normalize_ws(option))
                        .then_some(value)
                })
                .ok_or_else(|| not_interactable(element, format!("no option '{option}'")))?;
            if let Some(select) = dom.element_mut(node) {
                select.value = Some(chosen);
            }
            Ok(())
        })
    }

    async fn set_checked(&self, element: &ElementRef, checked: bool) -> ProbeResult<()> {
        self.record(format!("check:{}:{checked}", element.name));
        self.with_element(element, |dom, node| {
            let target = dom
                .element_mut(node)
                .ok_or_else(|| ProbeError::engine("node vanished"))?;
            let kind = target.attributes.get("type").map(String::as_str);
            if target.tag != "input" || !matches!(kind, Some("checkbox" | "radio")) {
                return Err(not_interactable(element, "not a checkbox"));
            }
            target.checked = checked;
            Ok(())
        })
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> ProbeResult<()> {
        self.record("network_idle".to_string());
        drop(self.open_state()?);
        Ok(())
    }

    async fn close(&self) -> ProbeResult<()> {
        self.record("close".to_string());
        lock(&self.state, "session")?.closed = true;
        Ok(())
    }
}

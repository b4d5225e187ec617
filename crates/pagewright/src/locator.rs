//! Locator abstraction for element selection.
//!
//! A [`Locator`] maps a logical element name to a way of finding it:
//! attribute, text, role, compound (`has`) and relative (`within`) matches.
//!
//! # Design
//!
//! - **Lazy**: building a locator touches no page; resolution happens when an
//!   action runs, and no retrying happens at this layer.
//! - **Strict**: singular locators must resolve to exactly one element;
//!   plural locators (`.all()`) accept any count.
//! - **Scoped**: `within` resolves the parent first, then the child relative
//!   to it ("the delete button within this table row").

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::driver::ElementSnapshot;

/// Selection strategy for one element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Strategy {
    /// `id` attribute
    Id {
        /// Attribute value
        value: String,
    },
    /// `name` attribute (form controls)
    Name {
        /// Attribute value
        value: String,
    },
    /// CSS selector
    Css {
        /// Selector text
        value: String,
    },
    /// `data-testid` attribute
    TestId {
        /// Attribute value
        value: String,
    },
    /// Accessible label (`aria-label` or associated `<label>`)
    Label {
        /// Label text
        value: String,
    },
    /// `placeholder` attribute
    Placeholder {
        /// Attribute value
        value: String,
    },
    /// Arbitrary attribute equality
    Attribute {
        /// Attribute name
        attribute: String,
        /// Attribute value
        value: String,
    },
    /// Text content, exact or substring
    Text {
        /// Text to match
        value: String,
        /// Whole (whitespace-normalized) text must equal `value`
        #[serde(default)]
        exact: bool,
    },
    /// ARIA role, optionally with accessible name
    Role {
        /// Role name (`button`, `link`, `row`, ...)
        role: String,
        /// Accessible name, matched exactly
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl Strategy {
    /// Whether a snapshot satisfies this strategy on its own
    #[must_use]
    pub fn matches(&self, element: &ElementSnapshot) -> bool {
        match self {
            Self::Id { value } => element.attribute("id") == Some(value.as_str()),
            Self::Name { value } => element.attribute("name") == Some(value.as_str()),
            Self::TestId { value } => element.attribute("data-testid") == Some(value.as_str()),
            Self::Placeholder { value } => {
                element.attribute("placeholder") == Some(value.as_str())
            }
            Self::Attribute { attribute, value } => {
                element.attribute(attribute) == Some(value.as_str())
            }
            Self::Label { value } => element
                .label
                .as_deref()
                .is_some_and(|label| normalize_ws(label) == normalize_ws(value)),
            Self::Text { value, exact } => {
                let text = normalize_ws(&element.text);
                let wanted = normalize_ws(value);
                if *exact {
                    text == wanted
                } else {
                    text.contains(&wanted)
                }
            }
            Self::Role { role, name } => {
                element.role() == *role
                    && name
                        .as_ref()
                        .map_or(true, |n| element.accessible_name() == normalize_ws(n))
            }
            Self::Css { value } => css_matches(value, element),
        }
    }

    /// JavaScript expression yielding the matching elements below `root`
    #[must_use]
    pub fn to_query_from(&self, root: &str) -> String {
        let by_attr = |attr: &str, value: &str| {
            let css = format!("[{attr}={value:?}]");
            format!("Array.from({root}.querySelectorAll({css:?}))")
        };
        match self {
            Self::Id { value } => by_attr("id", value),
            Self::Name { value } => by_attr("name", value),
            Self::TestId { value } => by_attr("data-testid", value),
            Self::Placeholder { value } => by_attr("placeholder", value),
            Self::Attribute { attribute, value } => by_attr(attribute, value),
            Self::Css { value } => format!("Array.from({root}.querySelectorAll({value:?}))"),
            Self::Label { value } => format!(
                "Array.from({root}.querySelectorAll('input,select,textarea,[aria-label]'))\
                 .filter(el => __pwLabel(el) === {:?})",
                normalize_ws(value)
            ),
            Self::Text { value, exact } => {
                let test = if *exact {
                    format!("__pwNorm(e.textContent) === {:?}", normalize_ws(value))
                } else {
                    format!("__pwNorm(e.textContent).includes({:?})", normalize_ws(value))
                };
                format!(
                    "Array.from({root}.querySelectorAll('*'))\
                     .filter(el => ((e) => {test})(el) \
                     && !Array.from(el.children).some(c => ((e) => {test})(c)))"
                )
            }
            Self::Role { role, name } => {
                let name_test = name.as_ref().map_or_else(
                    || "true".to_string(),
                    |n| format!("__pwName(el) === {:?}", normalize_ws(n)),
                );
                format!(
                    "Array.from({root}.querySelectorAll('*'))\
                     .filter(el => __pwRole(el) === {role:?} && {name_test})"
                )
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id { value } => write!(f, "id={value}"),
            Self::Name { value } => write!(f, "name={value}"),
            Self::Css { value } => write!(f, "css={value}"),
            Self::TestId { value } => write!(f, "test_id={value}"),
            Self::Label { value } => write!(f, "label={value:?}"),
            Self::Placeholder { value } => write!(f, "placeholder={value:?}"),
            Self::Attribute { attribute, value } => write!(f, "[{attribute}={value:?}]"),
            Self::Text { value, exact: true } => write!(f, "text={value:?}"),
            Self::Text { value, exact: false } => write!(f, "text~{value:?}"),
            Self::Role { role, name: None } => write!(f, "role={role}"),
            Self::Role {
                role,
                name: Some(name),
            } => write!(f, "role={role}[name={name:?}]"),
        }
    }
}

/// Where resolution starts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// The page document
    #[default]
    Root,
    /// Inside the single element matched by the parent locator
    Within(Box<Locator>),
}

/// How many matches an action expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one element
    #[default]
    One,
    /// Zero or more elements
    Many,
}

/// A rule for finding one or more elements on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    name: String,
    strategy: Strategy,
    has: Option<Box<Locator>>,
    scope: Scope,
    cardinality: Cardinality,
}

impl Locator {
    /// Create a locator with a logical name
    #[must_use]
    pub fn new(name: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            has: None,
            scope: Scope::Root,
            cardinality: Cardinality::One,
        }
    }

    /// Create a locator named after its strategy
    #[must_use]
    pub fn from_strategy(strategy: Strategy) -> Self {
        Self::new(strategy.to_string(), strategy)
    }

    /// Match the `id` attribute
    #[must_use]
    pub fn by_id(value: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::Id {
            value: value.into(),
        })
    }

    /// Match the `name` attribute
    #[must_use]
    pub fn by_name(value: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::Name {
            value: value.into(),
        })
    }

    /// Match a CSS selector
    #[must_use]
    pub fn css(value: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::Css {
            value: value.into(),
        })
    }

    /// Match the `data-testid` attribute
    #[must_use]
    pub fn test_id(value: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::TestId {
            value: value.into(),
        })
    }

    /// Match elements whose text contains `value`
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::Text {
            value: value.into(),
            exact: false,
        })
    }

    /// Match elements whose whole text equals `value`
    #[must_use]
    pub fn text_exact(value: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::Text {
            value: value.into(),
            exact: true,
        })
    }

    /// Match by ARIA role
    #[must_use]
    pub fn role(role: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::Role {
            role: role.into(),
            name: None,
        })
    }

    /// Match by ARIA role and accessible name
    #[must_use]
    pub fn role_named(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::Role {
            role: role.into(),
            name: Some(name.into()),
        })
    }

    /// Match form controls by label
    #[must_use]
    pub fn label(value: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::Label {
            value: value.into(),
        })
    }

    /// Match an arbitrary attribute
    #[must_use]
    pub fn attribute(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::Attribute {
            attribute: attribute.into(),
            value: value.into(),
        })
    }

    /// Rename the locator
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Keep only elements that contain a descendant matching `child`
    #[must_use]
    pub fn has(mut self, child: Locator) -> Self {
        self.has = Some(Box::new(child));
        self
    }

    /// Resolve relative to the single element matched by `parent`
    #[must_use]
    pub fn within(mut self, parent: Locator) -> Self {
        self.scope = Scope::Within(Box::new(parent));
        self
    }

    /// Resolve from the page root
    #[must_use]
    pub fn at_root(mut self) -> Self {
        self.scope = Scope::Root;
        self
    }

    /// Accept any number of matches
    #[must_use]
    pub const fn all(mut self) -> Self {
        self.cardinality = Cardinality::Many;
        self
    }

    /// Require exactly one match
    #[must_use]
    pub const fn one(mut self) -> Self {
        self.cardinality = Cardinality::One;
        self
    }

    /// Logical name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Selection strategy
    #[must_use]
    pub const fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Compound child filter
    #[must_use]
    pub fn has_filter(&self) -> Option<&Locator> {
        self.has.as_deref()
    }

    /// Resolution scope
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Expected cardinality
    #[must_use]
    pub const fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Whether the locator is explicitly plural
    #[must_use]
    pub fn is_plural(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Ancestor locators, outermost first (excluding `self`)
    #[must_use]
    pub fn scope_chain(&self) -> Vec<&Locator> {
        let mut chain = Vec::new();
        let mut current = &self.scope;
        while let Scope::Within(parent) = current {
            chain.push(parent.as_ref());
            current = &parent.scope;
        }
        chain.reverse();
        chain
    }

    /// Human-readable scope, e.g. `root > users_table > row`
    #[must_use]
    pub fn scope_description(&self) -> String {
        let mut parts = vec!["root".to_string()];
        parts.extend(self.scope_chain().iter().map(|l| l.name.clone()));
        parts.join(" > ")
    }

    /// Name plus strategy, for logs and failure messages
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = format!("{} [{}", self.name, self.strategy);
        if let Some(has) = &self.has {
            out.push_str(&format!(" has {}", has.strategy));
        }
        out.push(']');
        out
    }

    /// Whether a snapshot satisfies this locator's own strategy
    #[must_use]
    pub fn matches(&self, element: &ElementSnapshot) -> bool {
        self.strategy.matches(element)
    }

    /// JavaScript expression for this locator's own part (strategy plus `has`)
    #[must_use]
    pub fn to_query_from(&self, root: &str) -> String {
        let base = self.strategy.to_query_from(root);
        match &self.has {
            Some(child) => format!(
                "{base}.filter(el => {}.length > 0)",
                child.to_query_from("el")
            ),
            None => base,
        }
    }

    /// Self-contained JavaScript expression yielding all matches, scope included
    #[must_use]
    pub fn to_query(&self) -> String {
        let mut roots = "[document]".to_string();
        for ancestor in self.scope_chain() {
            roots = format!(
                "((ps) => ps.length === 1 ? ps : [])({roots}.flatMap(r => {}))",
                ancestor.to_query_from("r")
            );
        }
        format!(
            "(() => {{ {JS_PRELUDE} return {roots}.flatMap(r => {}); }})()",
            self.to_query_from("r")
        )
    }

    /// JavaScript expression counting all matches
    #[must_use]
    pub fn to_count_query(&self) -> String {
        format!("{}.length", self.to_query())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Helper functions shared by generated queries
pub const JS_PRELUDE: &str = "\
const __pwNorm = (s) => (s || '').replace(/\\s+/g, ' ').trim(); \
const __pwLabel = (el) => __pwNorm(el.getAttribute('aria-label') || \
(el.labels && el.labels.length ? el.labels[0].textContent : '')); \
const __pwRole = (el) => el.getAttribute('role') || ({ BUTTON: 'button', \
A: el.hasAttribute('href') ? 'link' : '', SELECT: 'combobox', TEXTAREA: 'textbox', \
TABLE: 'table', TR: 'row', DIALOG: 'dialog', FORM: 'form', \
INPUT: ({ checkbox: 'checkbox', radio: 'radio', submit: 'button', button: 'button' })[el.type] || 'textbox' \
})[el.tagName] || ''; \
const __pwName = (el) => __pwLabel(el) || __pwNorm(el.textContent);";

/// Implicit ARIA role for a tag
#[must_use]
pub fn implicit_role(tag: &str, input_type: Option<&str>, has_href: bool) -> &'static str {
    match tag.to_ascii_lowercase().as_str() {
        "button" => "button",
        "a" if has_href => "link",
        "select" => "combobox",
        "textarea" => "textbox",
        "table" => "table",
        "tr" => "row",
        "dialog" => "dialog",
        "form" => "form",
        "input" => match input_type.unwrap_or("text") {
            "checkbox" => "checkbox",
            "radio" => "radio",
            "submit" | "button" => "button",
            _ => "textbox",
        },
        _ => "",
    }
}

/// Collapse runs of whitespace and trim
#[must_use]
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Match a compound CSS selector (`tag.class#id[attr=value]`, comma lists)
/// against one element. Combinators are not supported.
fn css_matches(selector: &str, element: &ElementSnapshot) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .any(|compound| compound_matches(compound, element))
}

fn compound_matches(compound: &str, element: &ElementSnapshot) -> bool {
    if compound.contains(char::is_whitespace) || compound.contains('>') {
        return false;
    }
    let mut rest = compound;
    let tag_end = rest.find(['.', '#', '[']).unwrap_or(rest.len());
    let tag = &rest[..tag_end];
    if !tag.is_empty() && tag != "*" && !tag.eq_ignore_ascii_case(&element.tag) {
        return false;
    }
    rest = &rest[tag_end..];
    while let Some(first) = rest.chars().next() {
        match first {
            '.' | '#' => {
                let end = rest[1..].find(['.', '#', '[']).map_or(rest.len(), |i| i + 1);
                let token = &rest[1..end];
                let ok = if first == '.' {
                    element
                        .attribute("class")
                        .is_some_and(|c| c.split_whitespace().any(|class| class == token))
                } else {
                    element.attribute("id") == Some(token)
                };
                if !ok {
                    return false;
                }
                rest = &rest[end..];
            }
            '[' => {
                let Some(close) = rest.find(']') else {
                    return false;
                };
                let body = &rest[1..close];
                let ok = match body.split_once('=') {
                    Some((attr, value)) => {
                        let value = value.trim_matches(|c| c == '"' || c == '\'');
                        element.attribute(attr.trim()) == Some(value)
                    }
                    None => element.attribute(body.trim()).is_some(),
                };
                if !ok {
                    return false;
                }
                rest = &rest[close + 1..];
            }
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn element(tag: &str, attrs: &[(&str, &str)], text: &str) -> ElementSnapshot {
        ElementSnapshot {
            tag: tag.to_string(),
            text: text.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            visible: true,
            enabled: true,
            ..ElementSnapshot::default()
        }
    }

    mod strategy_tests {
        use super::*;

        #[test]
        fn test_attribute_strategies() {
            let input = element(
                "input",
                &[("id", "email"), ("name", "email"), ("placeholder", "you@x")],
                "",
            );
            assert!(Locator::by_id("email").matches(&input));
            assert!(Locator::by_name("email").matches(&input));
            assert!(Locator::attribute("placeholder", "you@x").matches(&input));
            assert!(!Locator::test_id("email").matches(&input));
        }

        #[test]
        fn test_text_exact_vs_contains() {
            let cell = element("td", &[], "  Jane   Doe ");
            assert!(Locator::text("Jane Doe").matches(&cell));
            assert!(Locator::text("Jane").matches(&cell));
            assert!(Locator::text_exact("Jane Doe").matches(&cell));
            assert!(!Locator::text_exact("Jane").matches(&cell));
        }

        #[test]
        fn test_role_with_implicit_and_name() {
            let button = element("button", &[], "Delete");
            assert!(Locator::role("button").matches(&button));
            assert!(Locator::role_named("button", "Delete").matches(&button));
            assert!(!Locator::role_named("button", "Edit").matches(&button));

            let dialog = element("div", &[("role", "dialog")], "Sure?");
            assert!(Locator::role("dialog").matches(&dialog));
        }

        #[test]
        fn test_label_strategy() {
            let mut input = element("input", &[], "");
            input.label = Some("Full  name".into());
            assert!(Locator::label("Full name").matches(&input));
        }

        #[test]
        fn test_compound_css() {
            let row = element("tr", &[("class", "user-row active"), ("id", "u1")], "");
            assert!(Locator::css("tr.user-row").matches(&row));
            assert!(Locator::css("tr.user-row.active#u1").matches(&row));
            assert!(Locator::css("tr[id=u1]").matches(&row));
            assert!(Locator::css("div, tr.active").matches(&row));
            assert!(!Locator::css("tr.admin").matches(&row));
            assert!(!Locator::css("table tr").matches(&row));
        }

        #[test]
        fn test_strategy_yaml_tagging() {
            let s: Strategy =
                serde_yaml_ng::from_str("by: role\nrole: button\nname: Save\n").unwrap();
            assert_eq!(
                s,
                Strategy::Role {
                    role: "button".into(),
                    name: Some("Save".into())
                }
            );
            let t: Strategy = serde_yaml_ng::from_str("by: text\nvalue: Saved\n").unwrap();
            assert!(matches!(t, Strategy::Text { exact: false, .. }));
        }
    }

    mod locator_tests {
        use super::*;

        #[test]
        fn test_default_is_singular_root() {
            let locator = Locator::test_id("banner");
            assert_eq!(locator.cardinality(), Cardinality::One);
            assert_eq!(locator.scope(), &Scope::Root);
            assert_eq!(locator.name(), "test_id=banner");
        }

        #[test]
        fn test_scope_chain_outermost_first() {
            let table = Locator::test_id("users").named("users_table");
            let row = Locator::css("tr")
                .named("row")
                .has(Locator::text("Jane"))
                .within(table);
            let delete = Locator::role_named("button", "Delete")
                .named("delete")
                .within(row);

            let chain: Vec<&str> = delete.scope_chain().iter().map(|l| l.name()).collect();
            assert_eq!(chain, vec!["users_table", "row"]);
            assert_eq!(delete.scope_description(), "root > users_table > row");
        }

        #[test]
        fn test_all_and_one() {
            let rows = Locator::css("tr").all();
            assert!(rows.is_plural());
            assert!(!rows.one().is_plural());
        }

        #[test]
        fn test_describe_mentions_has() {
            let row = Locator::css("tr").named("row").has(Locator::text("Jane"));
            assert_eq!(row.describe(), "row [css=tr has text~\"Jane\"]");
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn test_query_wraps_prelude() {
            let query = Locator::test_id("banner").to_query();
            assert!(query.contains("__pwNorm"));
            assert!(query.contains("data-testid"));
            assert!(query.starts_with("(() =>"));
        }

        #[test]
        fn test_scoped_query_requires_single_parent() {
            let query = Locator::role("button")
                .within(Locator::css("tr.user-row"))
                .to_query();
            assert!(query.contains("ps.length === 1"));
            assert!(query.contains("tr.user-row"));
        }

        #[test]
        fn test_has_filter_in_query() {
            let query = Locator::css("tr").has(Locator::text("Jane")).to_query();
            assert!(query.contains(".filter(el => Array.from(el.querySelectorAll('*'))"));
        }

        #[test]
        fn test_count_query() {
            assert!(Locator::css("li").to_count_query().ends_with(".length"));
        }
    }

    #[test]
    fn test_implicit_roles() {
        assert_eq!(implicit_role("input", Some("checkbox"), false), "checkbox");
        assert_eq!(implicit_role("input", None, false), "textbox");
        assert_eq!(implicit_role("a", None, true), "link");
        assert_eq!(implicit_role("a", None, false), "");
        assert_eq!(implicit_role("TR", None, false), "row");
    }
}

//! Built-in eventual conditions over a [`Page`].
//!
//! A locator that does not resolve yet counts as "not yet"; engine errors
//! abort the poll. Conditions read the page without logging; the wait as a
//! whole is logged once by [`Page::wait_for`].

use async_trait::async_trait;
use regex::Regex;

use crate::driver::ElementSnapshot;
use crate::locator::Locator;
use crate::page_object::Page;
use crate::result::ProbeResult;
use crate::wait::EventualCondition;

/// Element is present and visible; witness is its snapshot
#[derive(Debug, Clone)]
pub struct Visible {
    page: Page,
    locator: Locator,
}

impl Visible {
    /// Wait for `locator` on `page`
    #[must_use]
    pub fn new(page: &Page, locator: Locator) -> Self {
        Self {
            page: page.clone(),
            locator,
        }
    }

    /// Wait for the named locator
    pub fn named(page: &Page, name: &str) -> ProbeResult<Self> {
        Ok(Self::new(page, page.locator(name)?))
    }
}

#[async_trait]
impl EventualCondition for Visible {
    type Witness = ElementSnapshot;

    fn description(&self) -> String {
        format!("{} visible", self.locator.describe())
    }

    async fn probe(&self) -> ProbeResult<Option<ElementSnapshot>> {
        Ok(self
            .page
            .observe(&self.locator)
            .await?
            .into_iter()
            .find(|s| s.visible))
    }
}

/// No match is visible. Zero matches of the target count as hidden; a
/// scope ancestor that does not resolve is an error, not absence.
#[derive(Debug, Clone)]
pub struct Hidden {
    page: Page,
    locator: Locator,
}

impl Hidden {
    /// Wait for `locator` to disappear
    #[must_use]
    pub fn new(page: &Page, locator: Locator) -> Self {
        Self {
            page: page.clone(),
            locator: locator.all(),
        }
    }

    /// Wait for the named locator to disappear
    pub fn named(page: &Page, name: &str) -> ProbeResult<Self> {
        Ok(Self::new(page, page.locator(name)?))
    }
}

#[async_trait]
impl EventualCondition for Hidden {
    type Witness = ();

    fn description(&self) -> String {
        format!("{} hidden", self.locator.describe())
    }

    async fn probe(&self) -> ProbeResult<Option<()>> {
        let found = self.page.observe(&self.locator).await?;
        Ok((!found.iter().any(|s| s.visible)).then_some(()))
    }
}

/// Visible element whose text contains a needle; witness is the full text
#[derive(Debug, Clone)]
pub struct TextContains {
    page: Page,
    locator: Locator,
    needle: String,
}

impl TextContains {
    /// Wait for `locator` to show `needle`
    #[must_use]
    pub fn new(page: &Page, locator: Locator, needle: impl Into<String>) -> Self {
        Self {
            page: page.clone(),
            locator,
            needle: needle.into(),
        }
    }
}

#[async_trait]
impl EventualCondition for TextContains {
    type Witness = String;

    fn description(&self) -> String {
        format!("{} containing {:?}", self.locator.describe(), self.needle)
    }

    async fn probe(&self) -> ProbeResult<Option<String>> {
        Ok(self
            .page
            .observe(&self.locator)
            .await?
            .into_iter()
            .find(|s| s.visible && s.text.contains(&self.needle))
            .map(|s| s.text))
    }
}

/// Visible element whose text matches a regex; witness is the full text
#[derive(Debug, Clone)]
pub struct TextMatches {
    page: Page,
    locator: Locator,
    pattern: Regex,
}

impl TextMatches {
    /// Wait for `locator` to show text matching `pattern`
    #[must_use]
    pub fn new(page: &Page, locator: Locator, pattern: Regex) -> Self {
        Self {
            page: page.clone(),
            locator,
            pattern,
        }
    }
}

#[async_trait]
impl EventualCondition for TextMatches {
    type Witness = String;

    fn description(&self) -> String {
        format!("{} matching /{}/", self.locator.describe(), self.pattern)
    }

    async fn probe(&self) -> ProbeResult<Option<String>> {
        Ok(self
            .page
            .observe(&self.locator)
            .await?
            .into_iter()
            .find(|s| s.visible && self.pattern.is_match(&s.text))
            .map(|s| s.text))
    }
}

/// At least `min` matches exist; witness is the count
#[derive(Debug, Clone)]
pub struct CountAtLeast {
    page: Page,
    locator: Locator,
    min: usize,
}

impl CountAtLeast {
    /// Wait for `min` matches of `locator`
    #[must_use]
    pub fn new(page: &Page, locator: Locator, min: usize) -> Self {
        Self {
            page: page.clone(),
            locator: locator.all(),
            min,
        }
    }
}

#[async_trait]
impl EventualCondition for CountAtLeast {
    type Witness = usize;

    fn description(&self) -> String {
        format!("at least {} of {}", self.min, self.locator.describe())
    }

    async fn probe(&self) -> ProbeResult<Option<usize>> {
        let count = self.page.observe(&self.locator).await?.len();
        Ok((count >= self.min).then_some(count))
    }
}

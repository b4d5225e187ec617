//! Outcome checks used in a scenario's Verify phase.
//!
//! Waiting for feedback goes through the poller with the suite's UI poll
//! config; once an indicator is visible, its content is checked exactly
//! once and a mismatch is an [`ProbeError::AssertionFailed`] with the
//! expected pattern and actual text verbatim.
//!
//! Indicators follow a naming convention on the page spec: a field error
//! for `email` is the locator `email_error`, anything else is
//! `error_banner`, and the submission-success banner is `flash`.

use regex::Regex;
use std::collections::BTreeMap;

use crate::conditions::{Hidden, TextContains, Visible};
use crate::config::SuiteConfig;
use crate::data::{ErrorKind, FieldState, TestDataRecord};
use crate::page_object::Page;
use crate::result::{ProbeError, ProbeResult};

/// Locator name of the form-level error indicator
pub const ERROR_BANNER: &str = "error_banner";

/// Locator name of the submission-success indicator
pub const SUCCESS_BANNER: &str = "flash";

/// Suffix of per-field error indicator locators
pub const FIELD_ERROR_SUFFIX: &str = "_error";

/// Assertions over one page
#[derive(Debug, Clone, Copy)]
pub struct Verifier<'a> {
    page: &'a Page,
    config: &'a SuiteConfig,
}

impl<'a> Verifier<'a> {
    /// Bind to a page and the suite config
    #[must_use]
    pub const fn new(page: &'a Page, config: &'a SuiteConfig) -> Self {
        Self { page, config }
    }

    /// Locator name of the indicator for an error kind. Falls back to
    /// [`ERROR_BANNER`] when the page has no field-specific indicator.
    #[must_use]
    pub fn indicator_for(&self, kind: &ErrorKind) -> String {
        match kind {
            ErrorKind::Field { field } => {
                let name = format!("{field}{FIELD_ERROR_SUFFIX}");
                if self.page.spec().locator(&name).is_ok() {
                    name
                } else {
                    ERROR_BANNER.to_string()
                }
            }
            ErrorKind::Generic => ERROR_BANNER.to_string(),
        }
    }

    /// Every error indicator the page declares
    #[must_use]
    pub fn error_indicators(&self) -> Vec<&'a str> {
        self.page
            .spec()
            .locator_names()
            .into_iter()
            .filter(|n| *n == ERROR_BANNER || n.ends_with(FIELD_ERROR_SUFFIX))
            .collect()
    }

    /// The success indicator, when the page declares one
    #[must_use]
    pub fn success_indicators(&self) -> Vec<&'a str> {
        self.page
            .spec()
            .locator_names()
            .into_iter()
            .filter(|n| *n == SUCCESS_BANNER)
            .collect()
    }

    /// Wait for `indicator`, check its text against `pattern`, then assert
    /// no error indicator is showing. Returns the indicator text.
    pub async fn expect_success(&self, indicator: &str, pattern: &Regex) -> ProbeResult<String> {
        let text = self.expect_indicator(indicator, pattern).await?;
        self.assert_absent(&self.error_indicators()).await?;
        Ok(text)
    }

    /// Fail if any of the named indicators is visible
    pub async fn assert_absent(&self, indicators: &[&str]) -> ProbeResult<()> {
        for name in indicators {
            let locator = self.page.locator(name)?.all();
            if self.page.is_visible_at(&locator).await? {
                let shown = self
                    .page
                    .observe(&locator)
                    .await?
                    .into_iter()
                    .filter(|s| s.visible)
                    .map(|s| s.text)
                    .collect::<Vec<_>>()
                    .join(" | ");
                return Err(ProbeError::assertion(
                    format!("{name} absent"),
                    "no visible indicator",
                    shown,
                ));
            }
        }
        Ok(())
    }

    /// Wait for the error indicator the record expects and check its text
    /// against the record's pattern, or the configured category pattern
    /// when the record has none. Returns the error text.
    pub async fn expect_error(&self, record: &TestDataRecord) -> ProbeResult<String> {
        let kind = record.expected().error.clone().unwrap_or(ErrorKind::Generic);
        let indicator = self.indicator_for(&kind);
        let pattern = match record.message_regex()? {
            Some(pattern) => pattern,
            None => match &kind {
                ErrorKind::Field { field } => self.config.messages.field_error_for(field)?,
                ErrorKind::Generic => self.config.messages.generic_error()?,
            },
        };

        self.expect_indicator(&indicator, &pattern).await
    }

    /// Wait for `indicator` and check its text against `pattern` once.
    /// Returns the indicator text.
    pub async fn expect_indicator(&self, indicator: &str, pattern: &Regex) -> ProbeResult<String> {
        let visible = Visible::named(self.page, indicator)?;
        let shown = self.page.wait_for(&visible, self.config.ui_poll).await?;
        if pattern.is_match(&shown.text) {
            Ok(shown.text)
        } else {
            Err(ProbeError::assertion(
                format!("{indicator} message"),
                pattern.as_str(),
                shown.text,
            ))
        }
    }

    /// [`expect_error`](Self::expect_error), then assert no success banner
    /// shows and the `rows` listing on `listing` still has `before`
    /// entries. Navigates to the listing first if the session is elsewhere.
    pub async fn expect_rejected(
        &self,
        record: &TestDataRecord,
        listing: &Page,
        rows: &str,
        before: usize,
    ) -> ProbeResult<String> {
        let text = self.expect_error(record).await?;
        self.assert_absent(&self.success_indicators()).await?;
        let on_listing = Verifier::new(listing, self.config);
        if !listing.is_current().await? {
            listing.goto().await?;
            listing.wait_until_ready(self.config.ui_poll).await?;
        }
        on_listing
            .assert_absent(&on_listing.success_indicators())
            .await?;
        let after = listing.count(rows).await?;
        if after != before {
            return Err(ProbeError::assertion(
                format!("{rows} count after rejected '{}'", record.id()),
                before.to_string(),
                after.to_string(),
            ));
        }
        Ok(text)
    }

    /// Wait until some `rows` entry contains `text`
    pub async fn expect_listed(&self, rows: &str, text: &str) -> ProbeResult<()> {
        let present = TextContains::new(self.page, self.page.locator(rows)?.all(), text);
        self.page
            .wait_for(&present, self.config.ui_poll)
            .await
            .map(|_| ())
    }

    /// Wait until no `rows` entry contains `text`
    pub async fn expect_unlisted(&self, rows: &str, text: &str) -> ProbeResult<()> {
        let gone = Hidden::new(self.page, self.page.filtered(rows, text)?);
        self.page.wait_for(&gone, self.config.ui_poll).await
    }

    /// Check each named control against its expected state
    pub async fn assert_field_states(
        &self,
        states: &BTreeMap<String, FieldState>,
    ) -> ProbeResult<()> {
        for (name, expected) in states {
            let (want, actual) = match expected {
                FieldState::Enabled | FieldState::Disabled => {
                    let enabled = self.page.is_enabled(name).await?;
                    let want = matches!(expected, FieldState::Enabled);
                    (
                        if want { "enabled" } else { "disabled" }.to_string(),
                        if enabled { "enabled" } else { "disabled" }.to_string(),
                    )
                }
                FieldState::Hidden => {
                    let visible = self.page.is_visible(name).await?;
                    (
                        "hidden".to_string(),
                        if visible { "visible" } else { "hidden" }.to_string(),
                    )
                }
                FieldState::Value { value } => (value.clone(), self.page.read_value(name).await?),
            };
            if want != actual {
                return Err(ProbeError::assertion(format!("{name} state"), want, actual));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_log::ActionLog;
    use crate::driver::BrowserEngine;
    use crate::locator::Locator;
    use crate::memory::{MemoryDom, MemoryElement, MemoryEngine, StaticApp};
    use crate::page_object::PageSpec;
    use std::sync::Arc;

    fn form_dom(
        error: Option<&str>,
        email_error: Option<&str>,
        success: Option<&str>,
    ) -> MemoryDom {
        let mut dom = MemoryDom::new();
        let root = dom.root();
        let form = dom.append(root, MemoryElement::new("form"));
        let name = MemoryElement::new("input").attr("name", "name").value("Jane");
        let _ = dom.append(form, name);
        let role = MemoryElement::new("input").attr("name", "role").value("viewer");
        let _ = dom.append(form, role.disabled());
        let _ = dom.append(form, MemoryElement::new("input").attr("name", "secret").hidden());
        let banner = |id: &str, text: Option<&str>| match text {
            Some(t) => MemoryElement::new("div").test_id(id).text(t),
            None => MemoryElement::new("div").test_id(id).hidden(),
        };
        let _ = dom.append(root, banner("error-banner", error));
        let _ = dom.append(root, banner("email-error", email_error));
        let _ = dom.append(root, banner("flash", success));
        let list = dom.append(root, MemoryElement::new("ul"));
        for email in ["jane@x.test", "bob@x.test"] {
            let row = dom.append(list, MemoryElement::new("li").attr("class", "row"));
            let _ = dom.append(row, MemoryElement::new("span").text(email));
        }
        dom
    }

    fn spec() -> PageSpec {
        PageSpec::new("form", "/")
            .with_locator("name", Locator::by_name("name"))
            .with_locator("role", Locator::by_name("role"))
            .with_locator("secret", Locator::by_name("secret"))
            .with_locator(ERROR_BANNER, Locator::test_id("error-banner"))
            .with_locator("email_error", Locator::test_id("email-error"))
            .with_locator("flash", Locator::test_id("flash"))
            .with_locator("rows", Locator::css("li.row").all())
    }

    async fn page(dom: MemoryDom) -> Page {
        let engine = MemoryEngine::new("http://app.test", StaticApp::new().page("/", dom));
        let session = engine.new_session("primary").await.unwrap();
        let page = Page::new(Arc::new(spec()), session, ActionLog::default(), "http://app.test");
        page.goto().await.unwrap();
        page
    }

    fn config() -> SuiteConfig {
        SuiteConfig::new("http://app.test")
    }

    mod success_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_success_banner_matches() {
            let page = page(form_dom(None, None, Some("User Jane created"))).await;
            let config = config();
            let verifier = Verifier::new(&page, &config);
            let pattern = config.messages.success_for("Jane").unwrap();
            let text = verifier.expect_success("flash", &pattern).await.unwrap();
            assert_eq!(text, "User Jane created");
        }

        #[tokio::test(start_paused = true)]
        async fn test_success_with_error_showing_fails() {
            let page = page(form_dom(Some("Server error"), None, Some("User Jane created"))).await;
            let config = config();
            let err = Verifier::new(&page, &config)
                .expect_success("flash", &Regex::new("created").unwrap())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                ProbeError::AssertionFailed { ref actual, .. } if actual == "Server error"
            ));
        }

        #[tokio::test(start_paused = true)]
        async fn test_wrong_message_is_assertion() {
            let page = page(form_dom(None, None, Some("Saved draft"))).await;
            let config = config();
            let err = Verifier::new(&page, &config)
                .expect_success("flash", &Regex::new("Jane").unwrap())
                .await
                .unwrap_err();
            match err {
                ProbeError::AssertionFailed { expected, actual, .. } => {
                    assert_eq!(expected, "Jane");
                    assert_eq!(actual, "Saved draft");
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_listing_checks() {
            let page = page(form_dom(None, None, None)).await;
            let config = config();
            let verifier = Verifier::new(&page, &config);
            verifier.expect_listed("rows", "jane@x.test").await.unwrap();
            verifier.expect_unlisted("rows", "carol@x.test").await.unwrap();
            assert!(matches!(
                verifier.expect_listed("rows", "carol@x.test").await,
                Err(ProbeError::ConditionTimeout { .. })
            ));
        }
    }

    mod rejection_tests {
        use super::*;

        #[tokio::test]
        async fn test_indicator_fallback() {
            let page = page(form_dom(None, None, None)).await;
            let config = config();
            let verifier = Verifier::new(&page, &config);
            let email = ErrorKind::Field { field: "email".into() };
            let name = ErrorKind::Field { field: "name".into() };
            assert_eq!(verifier.indicator_for(&email), "email_error");
            assert_eq!(verifier.indicator_for(&name), ERROR_BANNER);
            assert_eq!(verifier.indicator_for(&ErrorKind::Generic), ERROR_BANNER);
        }

        #[tokio::test(start_paused = true)]
        async fn test_field_error_uses_category_pattern() {
            let page = page(form_dom(None, Some("Email is invalid"), None)).await;
            let config = config();
            let record = TestDataRecord::negative("bad-email").field_error("email").build();
            let text = Verifier::new(&page, &config)
                .expect_rejected(&record, &page, "rows", 2)
                .await
                .unwrap();
            assert_eq!(text, "Email is invalid");
        }

        #[tokio::test(start_paused = true)]
        async fn test_success_banner_fails_rejection() {
            let dom = form_dom(None, Some("Email is invalid"), Some("User Jane created"));
            let page = page(dom).await;
            let config = config();
            let record = TestDataRecord::negative("bad-email").field_error("email").build();
            let err = Verifier::new(&page, &config)
                .expect_rejected(&record, &page, "rows", 2)
                .await
                .unwrap_err();
            match err {
                ProbeError::AssertionFailed {
                    context, actual, ..
                } => {
                    assert_eq!(context, "flash absent");
                    assert_eq!(actual, "User Jane created");
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_unlisted_needs_the_listing() {
            let page = page(form_dom(None, None, None)).await;
            let config = config().with_ui_poll(crate::wait::PollConfig::from_millis(300, 100));
            let spec = PageSpec::new("users", "/")
                .with_locator("users_table", Locator::test_id("users"))
                .with_locator(
                    "rows",
                    Locator::css("li.row")
                        .within(Locator::test_id("users"))
                        .all(),
                );
            let listing = Page::new(
                Arc::new(spec),
                Arc::clone(page.session()),
                ActionLog::default(),
                "http://app.test",
            );
            let err = Verifier::new(&listing, &config)
                .expect_unlisted("rows", "carol@x.test")
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::ConditionTimeout { .. }));
        }

        #[tokio::test(start_paused = true)]
        async fn test_listing_change_fails_rejection() {
            let page = page(form_dom(Some("Could not save"), None, None)).await;
            let config = config();
            let record = TestDataRecord::negative("generic").generic_error().build();
            let err = Verifier::new(&page, &config)
                .expect_rejected(&record, &page, "rows", 1)
                .await
                .unwrap_err();
            match err {
                ProbeError::AssertionFailed {
                    expected, actual, ..
                } => {
                    assert_eq!(expected, "1");
                    assert_eq!(actual, "2");
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_record_pattern_wins() {
            let page = page(form_dom(Some("Name is required"), None, None)).await;
            let config = config();
            let record = TestDataRecord::negative("empty-name")
                .generic_error()
                .message("(?i)required")
                .build();
            assert!(Verifier::new(&page, &config).expect_error(&record).await.is_ok());
        }

        #[tokio::test(start_paused = true)]
        async fn test_missing_indicator_times_out() {
            let page = page(form_dom(None, None, None)).await;
            let config = config().with_ui_poll(crate::wait::PollConfig::from_millis(300, 100));
            let record = TestDataRecord::negative("nothing").generic_error().build();
            assert!(matches!(
                Verifier::new(&page, &config).expect_error(&record).await,
                Err(ProbeError::ConditionTimeout { .. })
            ));
        }
    }

    mod field_state_tests {
        use super::*;

        #[tokio::test]
        async fn test_states() {
            let page = page(form_dom(None, None, None)).await;
            let config = config();
            let verifier = Verifier::new(&page, &config);

            let mut ok = BTreeMap::new();
            let _ = ok.insert("name".to_string(), FieldState::Enabled);
            let _ = ok.insert("role".to_string(), FieldState::Disabled);
            let _ = ok.insert("secret".to_string(), FieldState::Hidden);
            verifier.assert_field_states(&ok).await.unwrap();

            let mut value = BTreeMap::new();
            let _ = value.insert("name".to_string(), FieldState::value("Jane"));
            verifier.assert_field_states(&value).await.unwrap();

            let mut bad = BTreeMap::new();
            let _ = bad.insert("role".to_string(), FieldState::Enabled);
            let err = verifier.assert_field_states(&bad).await.unwrap_err();
            assert!(matches!(
                err,
                ProbeError::AssertionFailed { ref actual, .. } if actual == "disabled"
            ));
        }
    }
}

//! Reference scenarios for a user administration UI.
//!
//! Page specs live in `pages/admin.yaml` and are embedded at compile time.
//! The scenarios use nothing but the public core: page objects over
//! [`Page`], the [`Verifier`](crate::verify::Verifier), the mailbox and the scenario context.
//!
//! Inputs in the tables may carry the `{uid}` placeholder; each run
//! replaces it with a fresh token so records never share fixtures.

use async_trait::async_trait;
use std::sync::Arc;

use crate::data::{unique_suffix, TestDataRecord};
use crate::locator::Locator;
use crate::page_object::{FormField, Page, PageObject, PageRegistry, PageSpec};
use crate::result::{ProbeError, ProbeResult};
use crate::scenario::{Scenario, ScenarioContext};
use crate::verify::{ERROR_BANNER, SUCCESS_BANNER};

/// Embedded page specs
pub const ADMIN_PAGES_YAML: &str = include_str!("../pages/admin.yaml");

/// Replaced by a fresh token in every run
pub const UNIQUE_PLACEHOLDER: &str = "{uid}";

/// Subject of the account-created notification
pub const ACCOUNT_CREATED_SUBJECT: &str = "Account Created";

/// Rows of the users listing
const USER_ROWS: &str = "user_row";

/// The four admin page specs
#[derive(Debug, Clone)]
pub struct AdminPages {
    /// Sign-in page
    pub login: Arc<PageSpec>,
    /// Users listing
    pub users: Arc<PageSpec>,
    /// New-user form
    pub user_form: Arc<PageSpec>,
    /// Delete confirmation dialog on the listing
    pub confirm_dialog: Arc<PageSpec>,
}

impl AdminPages {
    /// Parse the embedded specs
    pub fn load() -> ProbeResult<Self> {
        Self::from_registry(&PageRegistry::from_yaml(ADMIN_PAGES_YAML)?)
    }

    /// Take the admin pages out of a registry
    pub fn from_registry(registry: &PageRegistry) -> ProbeResult<Self> {
        Ok(Self {
            login: registry.require("login")?,
            users: registry.require("users")?,
            user_form: registry.require("user_form")?,
            confirm_dialog: registry.require("confirm_dialog")?,
        })
    }
}

/// Sign-in page
#[derive(Debug, Clone)]
pub struct LoginPage {
    page: Page,
}

impl LoginPage {
    /// Wrap a bound page
    #[must_use]
    pub const fn new(page: Page) -> Self {
        Self { page }
    }

    /// Submit credentials
    pub async fn sign_in(&self, user: &str, password: &str) -> ProbeResult<()> {
        self.page.fill("username", user).await?;
        self.page.fill("password", password).await?;
        self.page.click("submit").await
    }
}

impl PageObject for LoginPage {
    fn page(&self) -> &Page {
        &self.page
    }
}

/// Users listing
#[derive(Debug, Clone)]
pub struct UsersPage {
    page: Page,
}

impl UsersPage {
    /// Wrap a bound page
    #[must_use]
    pub const fn new(page: Page) -> Self {
        Self { page }
    }

    /// The listing row containing `text`
    pub fn row(&self, text: &str) -> ProbeResult<Locator> {
        self.page.filtered(USER_ROWS, text)
    }

    /// Number of rows in the listing
    pub async fn row_count(&self) -> ProbeResult<usize> {
        self.page.count(USER_ROWS).await
    }

    /// Whether a row contains `text`
    pub async fn has_user(&self, text: &str) -> ProbeResult<bool> {
        let row = self.row(text)?.all();
        self.page.is_visible_at(&row).await
    }

    /// Open the new-user form
    pub async fn open_new_user(&self) -> ProbeResult<()> {
        self.page.click("new_user").await
    }

    /// Click Delete in the row containing `text`
    pub async fn request_delete(&self, text: &str) -> ProbeResult<()> {
        self.page.click_within("delete_button", self.row(text)?).await
    }
}

impl PageObject for UsersPage {
    fn page(&self) -> &Page {
        &self.page
    }
}

/// New-user form
#[derive(Debug, Clone)]
pub struct UserFormPage {
    page: Page,
}

impl UserFormPage {
    /// Wrap a bound page
    #[must_use]
    pub const fn new(page: Page) -> Self {
        Self { page }
    }

    /// Fields in the order a user fills them
    #[must_use]
    pub fn fields() -> Vec<FormField> {
        vec![
            FormField::text("name"),
            FormField::text("email"),
            FormField::select("role"),
            FormField::select("access_level"),
            FormField::text("password"),
            FormField::checkbox("notify"),
        ]
    }

    /// Fill the form from a record and save
    pub async fn submit(&self, record: &TestDataRecord) -> ProbeResult<()> {
        self.page.fill_form(record, &Self::fields()).await?;
        self.page.click("save").await
    }
}

impl PageObject for UserFormPage {
    fn page(&self) -> &Page {
        &self.page
    }
}

/// Delete confirmation dialog
#[derive(Debug, Clone)]
pub struct ConfirmDialog {
    page: Page,
}

impl ConfirmDialog {
    /// Wrap a bound page
    #[must_use]
    pub const fn new(page: Page) -> Self {
        Self { page }
    }

    /// Wait for the dialog and confirm
    pub async fn confirm(&self, ctx: &ScenarioContext) -> ProbeResult<()> {
        self.page.wait_until_ready(ctx.config().ui_poll).await?;
        self.page.click("confirm").await
    }
}

impl PageObject for ConfirmDialog {
    fn page(&self) -> &Page {
        &self.page
    }
}

/// Sign in as the configured admin on the primary session and wait for
/// the users listing
pub async fn logged_in(ctx: &ScenarioContext, pages: &AdminPages) -> ProbeResult<UsersPage> {
    let login = LoginPage::new(ctx.page(&pages.login));
    login.open().await?;
    let config = ctx.config();
    login
        .sign_in(&config.admin_user, &config.admin_password)
        .await?;
    let users = UsersPage::new(ctx.page(&pages.users));
    users.page().wait_until_ready(config.ui_poll).await?;
    Ok(users)
}

/// Create a user through the form; the listing must show it afterwards
async fn create_through_form(
    ctx: &ScenarioContext,
    pages: &AdminPages,
    users: &UsersPage,
    record: &TestDataRecord,
) -> ProbeResult<()> {
    users.open_new_user().await?;
    let form = UserFormPage::new(ctx.page(&pages.user_form));
    form.page().wait_until_ready(ctx.config().ui_poll).await?;
    form.submit(record).await?;
    ctx.verifier(users.page())
        .expect_listed(USER_ROWS, record.require("email")?)
        .await
}

fn truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "yes" | "on" | "1")
    )
}

/// Per-run state of [`CreateUser`]
#[derive(Debug, Default)]
pub struct CreateUserState {
    record: Option<TestDataRecord>,
    before: usize,
}

impl CreateUserState {
    fn record(&self) -> ProbeResult<&TestDataRecord> {
        self.record.as_ref().ok_or_else(|| ProbeError::InvalidData {
            message: "record not prepared in setup".to_string(),
        })
    }
}

/// Create a user via the form.
///
/// Positive records: the success banner names the user, the listing shows
/// the email, and with `notify` set an "Account Created" mail arrives
/// whose body names the user. Negative records: the expected error
/// indicator shows and the listing is unchanged.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pages: AdminPages,
}

impl CreateUser {
    /// Create the scenario with the embedded pages
    pub fn new() -> ProbeResult<Self> {
        Ok(Self::with_pages(AdminPages::load()?))
    }

    /// Create the scenario with custom page specs
    #[must_use]
    pub const fn with_pages(pages: AdminPages) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl Scenario for CreateUser {
    type State = CreateUserState;

    fn name(&self) -> &str {
        "create_user"
    }

    async fn setup(
        &self,
        ctx: &mut ScenarioContext,
        record: &TestDataRecord,
        state: &mut CreateUserState,
    ) -> ProbeResult<()> {
        state.record = Some(record.substitute(UNIQUE_PLACEHOLDER, &unique_suffix()));
        let users = logged_in(ctx, &self.pages).await?;
        state.before = users.row_count().await?;
        Ok(())
    }

    async fn act(
        &self,
        ctx: &mut ScenarioContext,
        _record: &TestDataRecord,
        state: &mut CreateUserState,
    ) -> ProbeResult<()> {
        let users = UsersPage::new(ctx.page(&self.pages.users));
        users.open_new_user().await?;
        let form = UserFormPage::new(ctx.page(&self.pages.user_form));
        form.page().wait_until_ready(ctx.config().ui_poll).await?;
        form.submit(state.record()?).await
    }

    async fn verify(
        &self,
        ctx: &mut ScenarioContext,
        _record: &TestDataRecord,
        state: &mut CreateUserState,
    ) -> ProbeResult<()> {
        let record = state.record()?.clone();
        let users = UsersPage::new(ctx.page(&self.pages.users));

        if !record.is_positive() {
            let form = ctx.page(&self.pages.user_form);
            let verifier = ctx.verifier(&form);
            verifier
                .assert_field_states(&record.expected().field_states)
                .await?;
            let text = verifier
                .expect_rejected(&record, users.page(), USER_ROWS, state.before)
                .await;
            if let Ok(text) = &text {
                ctx.note_error_text(text.clone());
            }
            return text.map(|_| ());
        }

        let name = record.require("name")?;
        let email = record.require("email")?;
        let pattern = match record.message_regex()? {
            Some(pattern) => pattern,
            None => ctx.config().messages.success_for(name)?,
        };
        let verifier = ctx.verifier(users.page());
        let banner = verifier.expect_success(SUCCESS_BANNER, &pattern).await?;
        if !banner.contains(name) {
            return Err(ProbeError::assertion("success banner", name, banner));
        }
        verifier.expect_listed(USER_ROWS, email).await?;

        if truthy(record.input("notify")) {
            let mail = ctx.await_mail(email, ACCOUNT_CREATED_SUBJECT).await?;
            if !mail.body.contains(name) {
                return Err(ProbeError::assertion(
                    format!("'{ACCOUNT_CREATED_SUBJECT}' mail body"),
                    name,
                    mail.body,
                ));
            }
        }
        Ok(())
    }
}

/// Per-run state of [`DeleteUser`]
#[derive(Debug, Default)]
pub struct DeleteUserState {
    record: Option<TestDataRecord>,
    before: usize,
    delete_issued: bool,
    precondition: Option<String>,
}

impl DeleteUserState {
    fn record(&self) -> ProbeResult<&TestDataRecord> {
        self.record.as_ref().ok_or_else(|| ProbeError::InvalidData {
            message: "record not prepared in setup".to_string(),
        })
    }
}

/// Delete a user and prove the account is gone.
///
/// Positive records create their own user in setup, delete it with
/// confirmation, then a second session signs in with the deleted
/// credentials and must be denied. Negative records describe a user that
/// does not exist: the precondition check finds no row, no delete is
/// issued, and the record's message pattern is matched against the
/// precondition finding.
#[derive(Debug, Clone)]
pub struct DeleteUser {
    pages: AdminPages,
}

impl DeleteUser {
    /// Create the scenario with the embedded pages
    pub fn new() -> ProbeResult<Self> {
        Ok(Self::with_pages(AdminPages::load()?))
    }

    /// Create the scenario with custom page specs
    #[must_use]
    pub const fn with_pages(pages: AdminPages) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl Scenario for DeleteUser {
    type State = DeleteUserState;

    fn name(&self) -> &str {
        "delete_user"
    }

    async fn setup(
        &self,
        ctx: &mut ScenarioContext,
        record: &TestDataRecord,
        state: &mut DeleteUserState,
    ) -> ProbeResult<()> {
        let record = record.substitute(UNIQUE_PLACEHOLDER, &unique_suffix());
        let users = logged_in(ctx, &self.pages).await?;
        if record.is_positive() {
            create_through_form(ctx, &self.pages, &users, &record).await?;
        }
        state.before = users.row_count().await?;
        state.record = Some(record);
        Ok(())
    }

    async fn act(
        &self,
        ctx: &mut ScenarioContext,
        _record: &TestDataRecord,
        state: &mut DeleteUserState,
    ) -> ProbeResult<()> {
        let email = state.record()?.require("email")?.to_string();
        let users = UsersPage::new(ctx.page(&self.pages.users));
        if !users.has_user(&email).await? {
            let finding = format!("user {email} not found");
            ctx.note_error_text(finding.clone());
            state.precondition = Some(finding);
            return Ok(());
        }
        users.request_delete(&email).await?;
        state.delete_issued = true;
        ConfirmDialog::new(ctx.page(&self.pages.confirm_dialog))
            .confirm(ctx)
            .await
    }

    async fn verify(
        &self,
        ctx: &mut ScenarioContext,
        _record: &TestDataRecord,
        state: &mut DeleteUserState,
    ) -> ProbeResult<()> {
        let record = state.record()?.clone();
        let email = record.require("email")?;
        let users = UsersPage::new(ctx.page(&self.pages.users));
        let verifier = ctx.verifier(users.page());

        if !record.is_positive() {
            if state.delete_issued {
                return Err(ProbeError::assertion(
                    "delete precondition",
                    format!("no row for {email}"),
                    "row present, delete issued",
                ));
            }
            let finding = state.precondition.clone().unwrap_or_default();
            if let Some(pattern) = record.message_regex()? {
                if !pattern.is_match(&finding) {
                    return Err(ProbeError::assertion("precondition", pattern.as_str(), finding));
                }
            }
            verifier.assert_absent(&[ERROR_BANNER]).await?;
            let after = users.row_count().await?;
            if after != state.before {
                return Err(ProbeError::assertion(
                    "users count",
                    state.before.to_string(),
                    after.to_string(),
                ));
            }
            return Ok(());
        }

        verifier.expect_unlisted(USER_ROWS, email).await?;
        let after = users.row_count().await?;
        if after + 1 != state.before {
            return Err(ProbeError::assertion(
                "users count after delete",
                state.before.saturating_sub(1).to_string(),
                after.to_string(),
            ));
        }

        let password = record.require("password")?;
        let session = ctx.open_secondary("deleted_user").await?;
        let login = LoginPage::new(ctx.page_on(&self.pages.login, &session));
        login.open().await?;
        login.sign_in(email, password).await?;
        let users = UsersPage::new(ctx.page_on(&self.pages.users, &session));
        expect_login_denied(ctx, &login, &users).await
    }
}

/// After a sign-in attempt, the session must be unauthenticated. The app
/// may say so with the error banner or just send the user back to the
/// login form; reaching the users listing is a failure either way.
async fn expect_login_denied(
    ctx: &mut ScenarioContext,
    login: &LoginPage,
    users: &UsersPage,
) -> ProbeResult<()> {
    let session = login.page().session();
    if users.page().is_visible("users_table").await? {
        return Err(ProbeError::assertion(
            "deleted user login",
            "denied",
            format!("signed in at {}", session.current_url().await?),
        ));
    }
    if login.page().is_visible(ERROR_BANNER).await? {
        let denied = ctx.config().messages.login_denied()?;
        let text = ctx
            .verifier(login.page())
            .expect_indicator(ERROR_BANNER, &denied)
            .await?;
        ctx.note_error_text(text);
        return Ok(());
    }
    if login.page().is_visible("login_form").await? {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let url = session.current_url().await?;
            tracing::debug!(url = %url, "login denied without a banner");
        }
        return Ok(());
    }
    Err(ProbeError::assertion(
        "deleted user login",
        "error banner or login form",
        session.current_url().await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_pages_load() {
        let pages = AdminPages::load().unwrap();
        assert_eq!(pages.users.url_pattern(), "/users");
        assert_eq!(pages.user_form.ready(), ["user_form".to_string()]);
        let confirm = pages.confirm_dialog.locator("confirm").unwrap();
        assert_eq!(confirm.scope_description(), "root > dialog");
        assert!(pages.users.locator(USER_ROWS).unwrap().is_plural());
    }

    #[test]
    fn test_form_order() {
        let keys: Vec<String> = UserFormPage::fields().into_iter().map(|f| f.key).collect();
        assert_eq!(keys[..4], ["name", "email", "role", "access_level"]);
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(Some("Yes")));
        assert!(!truthy(Some("no")));
        assert!(!truthy(None));
    }
}

//! Fake user-administration app for the in-memory engine.

#![allow(dead_code)]

use pagewright::memory::{FormData, NodeId, SessionData};
use pagewright::{
    AppResponse, MemoryApp, MemoryDom, MemoryElement, MemoryEngine, MemoryMailbox, SuiteConfig,
};
use std::time::Duration;

pub const ORIGIN: &str = "http://admin.test";
pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "s3cret-admin";

/// Seeded account every run can rely on (used for duplicate-email checks)
pub const SEEDED_EMAIL: &str = "ada@example.com";

#[derive(Debug, Clone)]
struct User {
    name: String,
    email: String,
    role: String,
    password: String,
}

/// How the app answers a failed sign-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginDenial {
    /// Re-render the login form with an error banner
    Banner,
    /// Redirect back to the login form, no banner
    Redirect,
}

/// Server side of the admin UI
pub struct AdminApp {
    users: Vec<User>,
    mailbox: MemoryMailbox,
    mail_delay: Duration,
    denial: LoginDenial,
    flash_on_reject: bool,
}

impl AdminApp {
    pub fn new(mailbox: MemoryMailbox) -> Self {
        Self {
            users: vec![User {
                name: "Ada Lovelace".to_string(),
                email: SEEDED_EMAIL.to_string(),
                role: "Admin".to_string(),
                password: "ada-pass".to_string(),
            }],
            mailbox,
            mail_delay: Duration::from_secs(3),
            denial: LoginDenial::Banner,
            flash_on_reject: false,
        }
    }

    pub fn with_denial(mut self, denial: LoginDenial) -> Self {
        self.denial = denial;
        self
    }

    /// Buggy variant: a rejected form also shows the success banner
    pub fn flashing_on_reject(mut self) -> Self {
        self.flash_on_reject = true;
        self
    }

    fn login_page(session: &SessionData) -> MemoryDom {
        let mut dom = MemoryDom::new();
        let root = dom.root();
        let form = dom.append(root, MemoryElement::new("form").test_id("login-form"));
        let _ = dom.append(form, MemoryElement::new("input").attr("name", "username"));
        let _ = dom.append(
            form,
            MemoryElement::new("input")
                .attr("name", "password")
                .attr("type", "password"),
        );
        let _ = dom.append(
            form,
            MemoryElement::new("button")
                .text("Sign in")
                .attr("data-action", "login"),
        );
        banner(&mut dom, root, "error-banner", session.get("login_error"));
        dom
    }

    fn users_page(&self, session: &SessionData) -> MemoryDom {
        let mut dom = MemoryDom::new();
        let root = dom.root();
        let _ = dom.append(
            root,
            MemoryElement::new("span")
                .test_id("current-user")
                .text(session.get("user").cloned().unwrap_or_default()),
        );
        let _ = dom.append(
            root,
            MemoryElement::new("a").attr("href", "/users/new").text("New user"),
        );
        banner(&mut dom, root, "flash", session.get("flash"));
        banner(&mut dom, root, "error-banner", session.get("error"));

        let table = dom.append(root, MemoryElement::new("table").test_id("users"));
        for user in &self.users {
            let row = dom.append(table, MemoryElement::new("tr").attr("class", "user-row"));
            let _ = dom.append(row, MemoryElement::new("td").text(&user.name));
            let _ = dom.append(row, MemoryElement::new("td").text(&user.email));
            let _ = dom.append(row, MemoryElement::new("td").text(&user.role));
            let cell = dom.append(row, MemoryElement::new("td"));
            let _ = dom.append(
                cell,
                MemoryElement::new("button")
                    .text("Delete")
                    .attr("data-action", "ask_delete")
                    .attr("data-email", &user.email),
            );
        }

        if let Some(email) = session.get("confirm_delete") {
            let dialog = dom.append(root, MemoryElement::new("div").test_id("confirm-dialog"));
            let _ = dom.append(
                dialog,
                MemoryElement::new("p")
                    .test_id("confirm-message")
                    .text(format!("Delete {email}?")),
            );
            let _ = dom.append(
                dialog,
                MemoryElement::new("button")
                    .text("Confirm")
                    .attr("data-action", "delete")
                    .attr("data-email", email),
            );
            let _ = dom.append(
                dialog,
                MemoryElement::new("button")
                    .text("Cancel")
                    .attr("data-action", "cancel"),
            );
        }
        dom
    }

    fn form_page(session: &SessionData) -> MemoryDom {
        let kept = |key: &str| session.get(&format!("form:{key}")).cloned().unwrap_or_default();
        let mut dom = MemoryDom::new();
        let root = dom.root();
        banner(&mut dom, root, "flash", session.get("flash"));
        banner(&mut dom, root, "error-banner", session.get("error"));
        let form = dom.append(root, MemoryElement::new("form").test_id("user-form"));

        for key in ["name", "email"] {
            let input = MemoryElement::new("input").attr("name", key).value(kept(key));
            let _ = dom.append(form, input);
            let error = session.get(&format!("{key}_error"));
            banner(&mut dom, form, &format!("{key}-error"), error);
        }

        for (name, options) in [
            ("role", ["Viewer", "Editor", "Admin"].as_slice()),
            ("access_level", ["Full", "Restricted"].as_slice()),
        ] {
            let select = dom.append(form, MemoryElement::new("select").attr("name", name));
            for option in options {
                let _ = dom.append(
                    select,
                    MemoryElement::new("option").attr("value", *option).text(*option),
                );
            }
        }
        let _ = dom.append(
            form,
            MemoryElement::new("input")
                .attr("name", "password")
                .attr("type", "password"),
        );
        let _ = dom.append(
            form,
            MemoryElement::new("input")
                .attr("name", "notify")
                .attr("type", "checkbox"),
        );
        let _ = dom.append(
            form,
            MemoryElement::new("button")
                .text("Save")
                .attr("data-action", "create_user"),
        );
        dom
    }

    fn create(&mut self, form: &FormData, session: &mut SessionData) -> AppResponse {
        let field = |key: &str| form.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let (name, email) = (field("name"), field("email"));

        let mut invalid = false;
        if name.is_empty() {
            let _ = session.insert("name_error".into(), "Name is required".into());
            invalid = true;
        }
        if !valid_email(&email) {
            let _ = session.insert("email_error".into(), "Email is invalid".into());
            invalid = true;
        } else if self.users.iter().any(|u| u.email.eq_ignore_ascii_case(&email)) {
            let _ = session.insert("email_error".into(), "Email already exists".into());
            invalid = true;
        }
        if invalid {
            for (key, value) in form {
                let _ = session.insert(format!("form:{key}"), value.clone());
            }
            if self.flash_on_reject {
                let _ = session.insert("flash".into(), format!("User {name} created"));
            }
            return AppResponse::Render;
        }

        self.users.push(User {
            name: name.clone(),
            email: email.clone(),
            role: field("role"),
            password: field("password"),
        });
        if form.get("notify").map(String::as_str) == Some("true") {
            self.mailbox.deliver_later(
                self.mail_delay,
                &email,
                "Account Created",
                &format!("Hello {name}, your account has been created."),
            );
        }
        let _ = session.insert("flash".into(), format!("User {name} created"));
        AppResponse::Redirect("/users".into())
    }
}

fn valid_email(email: &str) -> bool {
    email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
}

fn banner(dom: &mut MemoryDom, parent: NodeId, test_id: &str, text: Option<&String>) {
    let element = MemoryElement::new("div").test_id(test_id);
    let _ = dom.append(
        parent,
        match text {
            Some(text) => element.text(text),
            None => element.hidden(),
        },
    );
}

impl MemoryApp for AdminApp {
    fn render(&self, path: &str, session: &SessionData) -> Option<MemoryDom> {
        let signed_in = session.contains_key("user");
        match path {
            "/login" => Some(Self::login_page(session)),
            "/users" if signed_in => Some(self.users_page(session)),
            "/users/new" if signed_in => Some(Self::form_page(session)),
            "/users" | "/users/new" => Some(Self::login_page(session)),
            _ => None,
        }
    }

    fn action(&mut self, action: &str, form: &FormData, session: &mut SessionData) -> AppResponse {
        session.retain(|key, _| key == "user" || key == "confirm_delete");
        let value = |key: &str| form.get(key).cloned().unwrap_or_default();
        match action {
            "login" => {
                let (user, password) = (value("username"), value("password"));
                let admin = user == ADMIN_USER && password == ADMIN_PASSWORD;
                let member = self
                    .users
                    .iter()
                    .any(|u| u.email == user && u.password == password && !password.is_empty());
                if admin || member {
                    let _ = session.insert("user".into(), user);
                    AppResponse::Redirect("/users".into())
                } else if self.denial == LoginDenial::Redirect {
                    AppResponse::Redirect("/login".into())
                } else {
                    let error = "Invalid username or password".to_string();
                    let _ = session.insert("login_error".into(), error);
                    AppResponse::Render
                }
            }
            "create_user" => self.create(form, session),
            "ask_delete" => {
                let _ = session.insert("confirm_delete".into(), value("email"));
                AppResponse::Render
            }
            "delete" => {
                let email = value("email");
                let _ = session.remove("confirm_delete");
                match self.users.iter().position(|u| u.email == email) {
                    Some(index) => {
                        let user = self.users.remove(index);
                        let flash = format!("User {} deleted", user.name);
                        let _ = session.insert("flash".into(), flash);
                    }
                    None => {
                        let _ = session.insert("error".into(), "User could not be found".into());
                    }
                }
                AppResponse::Render
            }
            "cancel" => {
                let _ = session.remove("confirm_delete");
                AppResponse::Render
            }
            _ => AppResponse::Stay,
        }
    }
}

/// Engine over a fresh app and its mailbox
pub fn admin_engine() -> (MemoryEngine, MemoryMailbox) {
    admin_engine_with(|app| app)
}

/// Engine over a fresh app adjusted by `configure`
pub fn admin_engine_with(
    configure: impl FnOnce(AdminApp) -> AdminApp,
) -> (MemoryEngine, MemoryMailbox) {
    let mailbox = MemoryMailbox::new();
    let engine = MemoryEngine::new(ORIGIN, configure(AdminApp::new(mailbox.clone())));
    (engine, mailbox)
}

pub fn suite_config() -> SuiteConfig {
    SuiteConfig::new(ORIGIN).with_admin(ADMIN_USER, ADMIN_PASSWORD)
}

//! Chromium engine over the DevTools protocol.
//!
//! Locators are resolved by evaluating [`Locator::to_query_from`] in the
//! page. Every match is tagged with a `data-pw-ref` attribute; the tag is
//! the [`ElementRef`] id, so later actions address the same node until the
//! page replaces it.
//!
//! Each session gets its own browser context, so two sessions share no
//! cookies or storage.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::driver::{BrowserEngine, BrowserSession, DriverConfig, ElementRef, ElementSnapshot};
use crate::locator::{Locator, JS_PRELUDE};
use crate::result::{ProbeError, ProbeResult};

/// Attribute carrying the element handle id
pub const REF_ATTRIBUTE: &str = "data-pw-ref";

fn engine_error(context: &str) -> impl Fn(chromiumoxide::error::CdpError) -> ProbeError + '_ {
    move |e| ProbeError::engine(format!("{context}: {e}"))
}

/// A launched Chromium
#[derive(Debug)]
pub struct CdpEngine {
    config: DriverConfig,
    browser: Arc<Mutex<Browser>>,
    handle: tokio::task::JoinHandle<()>,
}

impl CdpEngine {
    /// Launch Chromium
    ///
    /// # Errors
    ///
    /// Returns error if the browser cannot be launched
    pub async fn launch(config: DriverConfig) -> ProbeResult<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .request_timeout(config.navigation_timeout());
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.executable_path {
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder.build().map_err(ProbeError::engine)?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(engine_error("launch"))?;
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        tracing::info!(headless = config.headless, "chromium launched");

        Ok(Self {
            config,
            browser: Arc::new(Mutex::new(browser)),
            handle,
        })
    }

    /// Launch configuration
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Close the browser and stop the event handler
    pub async fn shutdown(self) -> ProbeResult<()> {
        let mut browser = self.browser.lock().await;
        let _ = browser.close().await.map_err(engine_error("close"))?;
        self.handle.abort();
        Ok(())
    }
}

#[async_trait]
impl BrowserEngine for CdpEngine {
    async fn new_session(&self, label: &str) -> ProbeResult<Arc<dyn BrowserSession>> {
        let mut browser = self.browser.lock().await;
        let context = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(engine_error("browser context"))?;
        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context)
            .build()
            .map_err(ProbeError::engine)?;
        let page = browser
            .new_page(target)
            .await
            .map_err(engine_error("new page"))?;
        Ok(Arc::new(CdpSession {
            label: label.to_string(),
            navigation_timeout: self.config.navigation_timeout(),
            page: Mutex::new(Some(page)),
        }))
    }
}

/// One Chromium page in its own browser context
#[derive(Debug)]
pub struct CdpSession {
    label: String,
    navigation_timeout: Duration,
    page: Mutex<Option<CdpPage>>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    tag: String,
    text: String,
    attributes: BTreeMap<String, String>,
    label: Option<String>,
    value: Option<String>,
    visible: bool,
    enabled: bool,
    checked: bool,
}

impl From<RawSnapshot> for ElementSnapshot {
    fn from(raw: RawSnapshot) -> Self {
        Self {
            tag: raw.tag.to_ascii_lowercase(),
            text: raw.text,
            attributes: raw.attributes,
            label: raw.label.filter(|l| !l.is_empty()),
            value: raw.value,
            visible: raw.visible,
            enabled: raw.enabled,
            checked: raw.checked,
        }
    }
}

/// Script tagging every match of `locator` below `parent` and returning
/// the tags
fn query_script(locator: &Locator, parent: Option<&ElementRef>) -> String {
    let roots = match parent {
        Some(p) => format!(
            "[document.querySelector('[{REF_ATTRIBUTE}=\"{}\"]')].filter(Boolean)",
            p.id
        ),
        None => "[document]".to_string(),
    };
    format!(
        "(() => {{ {JS_PRELUDE} \
         return {roots}.flatMap(r => {}).map(el => {{ \
           if (!el.getAttribute('{REF_ATTRIBUTE}')) {{ \
             window.__pwSeq = (window.__pwSeq || 0) + 1; \
             el.setAttribute('{REF_ATTRIBUTE}', String(window.__pwSeq)); \
           }} \
           return el.getAttribute('{REF_ATTRIBUTE}'); \
         }}); }})()",
        locator.to_query_from("r")
    )
}

fn element_expr(element: &ElementRef) -> String {
    format!("document.querySelector('[{REF_ATTRIBUTE}=\"{}\"]')", element.id)
}

fn snapshot_script(element: &ElementRef) -> String {
    format!(
        "(() => {{ {JS_PRELUDE} const el = {}; if (!el) return null; \
         const style = window.getComputedStyle(el); \
         const rect = el.getBoundingClientRect(); \
         const attributes = {{}}; \
         for (const a of el.attributes) {{ if (a.name !== '{REF_ATTRIBUTE}') attributes[a.name] = a.value; }} \
         return {{ tag: el.tagName, text: __pwNorm(el.innerText || el.textContent), attributes, \
           label: __pwLabel(el), \
           value: ('value' in el && el.tagName !== 'BUTTON') ? String(el.value) : null, \
           visible: style.visibility !== 'hidden' && style.display !== 'none' && rect.width > 0 && rect.height > 0, \
           enabled: !el.disabled, checked: !!el.checked }}; }})()",
        element_expr(element)
    )
}

fn select_script(element: &ElementRef, option: &str) -> ProbeResult<String> {
    let wanted = serde_json::to_string(option)?;
    Ok(format!(
        "(() => {{ const el = {}; if (!el || el.tagName !== 'SELECT') return false; \
         const opt = Array.from(el.options).find(o => o.value === {wanted} || o.text.trim() === {wanted}); \
         if (!opt) return false; el.value = opt.value; \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
        element_expr(element)
    ))
}

impl CdpSession {
    async fn page(&self) -> ProbeResult<CdpPage> {
        self.page
            .lock()
            .await
            .clone()
            .ok_or_else(|| ProbeError::engine(format!("session '{}' is closed", self.label)))
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> ProbeResult<T> {
        let page = self.page().await?;
        page.evaluate(script)
            .await
            .map_err(engine_error("evaluate"))?
            .into_value()
            .map_err(|e| ProbeError::engine(format!("evaluate result: {e}")))
    }

    async fn element(&self, element: &ElementRef) -> ProbeResult<Element> {
        let page = self.page().await?;
        page.find_element(format!("[{REF_ATTRIBUTE}=\"{}\"]", element.id))
            .await
            .map_err(|_| ProbeError::ElementNotFound {
                name: element.name.clone(),
                scope: "detached (page changed since resolution)".to_string(),
            })
    }
}

#[async_trait]
impl BrowserSession for CdpSession {
    fn label(&self) -> &str {
        &self.label
    }

    async fn navigate(&self, url: &str) -> ProbeResult<()> {
        let page = self.page().await?;
        let navigation = async {
            page.goto(url).await?;
            page.wait_for_navigation().await.map(|_| ())
        };
        match tokio::time::timeout(self.navigation_timeout, navigation).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ProbeError::Navigation {
                url: url.to_string(),
                message: format!("timed out after {:?}", self.navigation_timeout),
            }),
        }
    }

    async fn current_url(&self) -> ProbeResult<String> {
        let page = self.page().await?;
        Ok(page
            .url()
            .await
            .map_err(engine_error("url"))?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn query(
        &self,
        locator: &Locator,
        parent: Option<&ElementRef>,
    ) -> ProbeResult<Vec<ElementRef>> {
        let ids: Vec<String> = self.eval(query_script(locator, parent)).await?;
        Ok(ids
            .into_iter()
            .map(|id| ElementRef::new(id, locator.name()))
            .collect())
    }

    async fn snapshot(&self, element: &ElementRef) -> ProbeResult<ElementSnapshot> {
        let raw: Option<RawSnapshot> = self.eval(snapshot_script(element)).await?;
        raw.map(ElementSnapshot::from)
            .ok_or_else(|| ProbeError::ElementNotFound {
                name: element.name.clone(),
                scope: "detached (page changed since resolution)".to_string(),
            })
    }

    async fn click(&self, element: &ElementRef) -> ProbeResult<()> {
        let target = self.element(element).await?;
        let _ = target.click().await.map_err(engine_error("click"))?;
        Ok(())
    }

    async fn fill(&self, element: &ElementRef, value: &str) -> ProbeResult<()> {
        let cleared: bool = self
            .eval(format!(
                "(() => {{ const el = {}; if (!el || !('value' in el)) return false; \
                 el.focus(); el.value = ''; return true; }})()",
                element_expr(element)
            ))
            .await?;
        if !cleared {
            return Err(ProbeError::ElementNotInteractable {
                name: element.name.clone(),
                reason: "not a text input".to_string(),
            });
        }
        let target = self.element(element).await?;
        let _ = target.type_str(value).await.map_err(engine_error("type"))?;
        Ok(())
    }

    async fn select_option(&self, element: &ElementRef, option: &str) -> ProbeResult<()> {
        let chosen: bool = self.eval(select_script(element, option)?).await?;
        if chosen {
            Ok(())
        } else {
            Err(ProbeError::ElementNotInteractable {
                name: element.name.clone(),
                reason: format!("no option {option:?}"),
            })
        }
    }

    async fn set_checked(&self, element: &ElementRef, checked: bool) -> ProbeResult<()> {
        if self.snapshot(element).await?.checked != checked {
            self.click(element).await?;
        }
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> ProbeResult<()> {
        let page = self.page().await?;
        match tokio::time::timeout(timeout, page.wait_for_navigation()).await {
            Ok(result) => result.map(|_| ()).map_err(engine_error("wait for navigation")),
            Err(_) => {
                tracing::warn!(session = %self.label, ?timeout, "page did not settle");
                Ok(())
            }
        }
    }

    async fn close(&self) -> ProbeResult<()> {
        if let Some(page) = self.page.lock().await.take() {
            page.close().await.map_err(engine_error("close page"))?;
        }
        Ok(())
    }
}

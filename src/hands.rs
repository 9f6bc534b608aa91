use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::locator::Locator;

/// Opaque reference to an element in the live document. May go stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct ElementState {
    pub displayed: bool,
    pub enabled: bool,
}

/// What happens to the browser when a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Torn down on every exit path.
    #[default]
    Ephemeral,
    /// Left open for manual inspection. Leaks one browser process per run.
    Persistent,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub headless: bool,
    pub mode: SessionMode,
    pub chrome_path: Option<PathBuf>,
    pub debugger_url: Option<String>,
    pub window_size: Option<(u32, u32)>,
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: false,
            mode: SessionMode::Ephemeral,
            chrome_path: None,
            debugger_url: None,
            window_size: Some((1366, 900)),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

impl SessionConfig {
    /// Extraction always runs headless and always cleans up.
    pub fn for_extraction(&self) -> Self {
        Self {
            headless: true,
            mode: SessionMode::Ephemeral,
            debugger_url: None,
            ..self.clone()
        }
    }
}

/// The browser capabilities the engine needs. Implementations block.
pub trait BrowserSession: Send {
    fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// Block until the navigation started by `navigate` has replaced the
    /// previous document.
    fn wait_for_navigation(&self) -> Result<(), SessionError>;

    /// All current matches; an empty list is not an error.
    fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>, SessionError>;

    fn element_state(&self, element: ElementHandle) -> Result<ElementState, SessionError>;

    fn click(&self, element: ElementHandle) -> Result<(), SessionError>;

    /// Click dispatched from page script, bypassing hit-testing.
    fn force_click(&self, element: ElementHandle) -> Result<(), SessionError>;

    fn clear(&self, element: ElementHandle) -> Result<(), SessionError>;

    fn send_text(&self, element: ElementHandle, text: &str) -> Result<(), SessionError>;

    fn press_enter(&self, element: ElementHandle) -> Result<(), SessionError>;

    fn text(&self, element: ElementHandle) -> Result<String, SessionError>;

    fn inner_html(&self, element: ElementHandle) -> Result<String, SessionError>;

    fn outer_html(&self, element: ElementHandle) -> Result<String, SessionError>;

    /// True once `document.readyState` is `complete`.
    fn document_ready(&self) -> Result<bool, SessionError>;

    fn screenshot(&self) -> Result<Vec<u8>, SessionError>;

    fn page_source(&self) -> Result<String, SessionError>;

    /// Evaluates `code` as an expression and returns its value.
    fn execute_script(&self, code: &str) -> Result<Value, SessionError>;

    fn close(&mut self) -> Result<(), SessionError>;

    /// Release the handle without shutting the browser down.
    fn detach(&mut self);
}

pub trait SessionFactory: Send + Sync {
    fn open(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>, SessionError>;
}

/// Owns a session for the duration of one run and applies the configured
/// [`SessionMode`] when dropped, including during unwinding.
pub struct SessionLease {
    session: Box<dyn BrowserSession>,
    mode: SessionMode,
}

impl SessionLease {
    pub fn new(session: Box<dyn BrowserSession>, mode: SessionMode) -> Self {
        Self { session, mode }
    }

    pub fn session(&self) -> &dyn BrowserSession {
        self.session.as_ref()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        match self.mode {
            SessionMode::Ephemeral => {
                if let Err(e) = self.session.close() {
                    warn!(error = %e, "Failed to close browser session");
                } else {
                    debug!("Browser session closed");
                }
            }
            SessionMode::Persistent => {
                self.session.detach();
                info!("Browser left open for inspection; close it manually when finished");
            }
        }
    }
}

const MASK_WEBDRIVER_JS: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";

const ELEMENT_STATE_JS: &str = r#"function() {
  const rect = this.getBoundingClientRect();
  const style = window.getComputedStyle(this);
  const displayed = rect.width > 0 && rect.height > 0
    && style.visibility !== 'hidden' && style.display !== 'none';
  return JSON.stringify({ displayed, enabled: !this.disabled });
}"#;

const FORCE_CLICK_JS: &str = "function() { this.click(); }";

const CLEAR_JS: &str = r#"function() {
  if ('value' in this) { this.value = ''; } else { this.textContent = ''; }
  this.dispatchEvent(new Event('input', { bubbles: true }));
}"#;

const INNER_HTML_JS: &str = "function() { return this.innerHTML; }";

/// Launches (or attaches to) Chrome through the DevTools protocol.
#[derive(Debug, Default, Clone)]
pub struct ChromeLauncher;

impl SessionFactory for ChromeLauncher {
    fn open(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>, SessionError> {
        let session = ChromeSession::launch(config)
            .map_err(|e| SessionError::Launch(format!("{e:#}")))?;
        Ok(Box::new(session))
    }
}

pub struct ChromeSession {
    browser: Option<Browser>,
    tab: Arc<Tab>,
}

impl ChromeSession {
    pub fn launch(config: &SessionConfig) -> anyhow::Result<Self> {
        if let Some(url) = &config.debugger_url {
            info!(url = %url, "Attaching to existing Chrome");
            let browser = Browser::connect(url.clone())?;
            let tab = browser.new_tab()?;
            return Ok(Self {
                browser: Some(browser),
                tab,
            });
        }

        let user_data_dir = match config.mode {
            SessionMode::Persistent => Some(persistent_profile_dir()?),
            SessionMode::Ephemeral => None,
        };

        let mut args = vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
        ];
        if !config.headless {
            args.push(OsStr::new("--start-maximized"));
        }

        let options = LaunchOptions {
            headless: config.headless,
            path: config.chrome_path.clone(),
            user_data_dir,
            window_size: config.window_size,
            args,
            idle_browser_timeout: config.idle_timeout,
            ..Default::default()
        };

        info!(headless = config.headless, mode = ?config.mode, "Launching Chrome");
        let browser = Browser::new(options)?;
        let tab = browser.new_tab()?;
        if let Err(e) = tab.evaluate(MASK_WEBDRIVER_JS, false) {
            debug!(error = %e, "Could not mask navigator.webdriver");
        }
        debug!("Chrome ready");

        Ok(Self {
            browser: Some(browser),
            tab,
        })
    }

    fn element(&self, handle: ElementHandle) -> Result<Element<'_>, SessionError> {
        if self.browser.is_none() {
            return Err(SessionError::Closed);
        }
        Element::new(&self.tab, handle.0).map_err(|_| SessionError::StaleElement)
    }

    fn string_value(value: Option<Value>) -> String {
        value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default()
    }
}

/// Node lookups against a detached node surface as stale references.
fn classify(err: anyhow::Error) -> SessionError {
    let message = format!("{err:#}");
    let lowered = message.to_lowercase();
    if lowered.contains("no node") || lowered.contains("could not find node") {
        SessionError::StaleElement
    } else {
        SessionError::Driver(message)
    }
}

fn persistent_profile_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("no local data directory for the browser profile"))?;
    let dir = fresh_profile_dir(&base.join("browser-rpa").join("profiles"))?;
    info!(profile = %dir.display(), "Using a dedicated browser profile");
    Ok(dir)
}

/// A newly created, empty directory under `root`. A browser left open keeps
/// its profile locked, so every persistent launch needs its own.
fn fresh_profile_dir(root: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    loop {
        let dir = root.join(format!("run-{stamp}-{:08x}", rand::random::<u32>()));
        match std::fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

impl BrowserSession for ChromeSession {
    fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.tab.navigate_to(url).map_err(classify)?;
        Ok(())
    }

    fn wait_for_navigation(&self) -> Result<(), SessionError> {
        if self.browser.is_none() {
            return Err(SessionError::Closed);
        }
        self.tab.wait_until_navigated().map_err(classify)?;
        Ok(())
    }

    fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>, SessionError> {
        let found = match locator {
            Locator::Css(css) => self.tab.find_elements(css),
            Locator::Path(xpath) => self.tab.find_elements_by_xpath(xpath),
        };
        match found {
            Ok(elements) => Ok(elements.iter().map(|e| ElementHandle(e.node_id)).collect()),
            Err(e) if e.downcast_ref::<NoElementFound>().is_some() => Ok(Vec::new()),
            Err(e) => Err(classify(e)),
        }
    }

    fn element_state(&self, element: ElementHandle) -> Result<ElementState, SessionError> {
        let remote = self
            .element(element)?
            .call_js_fn(ELEMENT_STATE_JS, vec![], false)
            .map_err(classify)?;
        let raw = Self::string_value(remote.value);
        serde_json::from_str(&raw).map_err(|e| SessionError::Script(e.to_string()))
    }

    fn click(&self, element: ElementHandle) -> Result<(), SessionError> {
        self.element(element)?.click().map_err(classify)?;
        Ok(())
    }

    fn force_click(&self, element: ElementHandle) -> Result<(), SessionError> {
        self.element(element)?
            .call_js_fn(FORCE_CLICK_JS, vec![], false)
            .map_err(classify)?;
        Ok(())
    }

    fn clear(&self, element: ElementHandle) -> Result<(), SessionError> {
        self.element(element)?
            .call_js_fn(CLEAR_JS, vec![], false)
            .map_err(classify)?;
        Ok(())
    }

    fn send_text(&self, element: ElementHandle, text: &str) -> Result<(), SessionError> {
        self.element(element)?.type_into(text).map_err(classify)?;
        Ok(())
    }

    fn press_enter(&self, element: ElementHandle) -> Result<(), SessionError> {
        self.element(element)?.focus().map_err(classify)?;
        self.tab.press_key("Enter").map_err(classify)?;
        Ok(())
    }

    fn text(&self, element: ElementHandle) -> Result<String, SessionError> {
        self.element(element)?.get_inner_text().map_err(classify)
    }

    fn inner_html(&self, element: ElementHandle) -> Result<String, SessionError> {
        let remote = self
            .element(element)?
            .call_js_fn(INNER_HTML_JS, vec![], false)
            .map_err(classify)?;
        Ok(Self::string_value(remote.value))
    }

    fn outer_html(&self, element: ElementHandle) -> Result<String, SessionError> {
        self.element(element)?.get_content().map_err(classify)
    }

    fn document_ready(&self) -> Result<bool, SessionError> {
        let state = self.execute_script("document.readyState")?;
        Ok(state.as_str() == Some("complete"))
    }

    fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        if self.browser.is_none() {
            return Err(SessionError::Closed);
        }
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(classify)
    }

    fn page_source(&self) -> Result<String, SessionError> {
        if self.browser.is_none() {
            return Err(SessionError::Closed);
        }
        self.tab.get_content().map_err(classify)
    }

    fn execute_script(&self, code: &str) -> Result<Value, SessionError> {
        if self.browser.is_none() {
            return Err(SessionError::Closed);
        }
        let remote = self
            .tab
            .evaluate(code, false)
            .map_err(|e| SessionError::Script(format!("{e:#}")))?;
        Ok(remote.value.unwrap_or(Value::Null))
    }

    fn close(&mut self) -> Result<(), SessionError> {
        let Some(browser) = self.browser.take() else {
            return Ok(());
        };
        if let Err(e) = self.tab.close(true) {
            debug!(error = %e, "Tab close failed; shutting the browser down anyway");
        }
        // Dropping a launched browser kills its process.
        drop(browser);
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(browser) = self.browser.take() {
            std::mem::forget(browser);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_launches_never_share_a_profile() {
        let root = std::env::temp_dir()
            .join(format!("browser-rpa-profiles-{}", std::process::id()));

        let first = fresh_profile_dir(&root).unwrap();
        let second = fresh_profile_dir(&root).unwrap();

        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
        assert!(first.starts_with(&root) && second.starts_with(&root));
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn extraction_sessions_are_headless_and_ephemeral() {
        let automation = SessionConfig {
            headless: false,
            mode: SessionMode::Persistent,
            debugger_url: Some("ws://127.0.0.1:9222/devtools/browser/x".into()),
            ..SessionConfig::default()
        };
        let extraction = automation.for_extraction();
        assert!(extraction.headless);
        assert_eq!(extraction.mode, SessionMode::Ephemeral);
        assert!(extraction.debugger_url.is_none());
        assert_eq!(extraction.window_size, automation.window_size);
    }
}

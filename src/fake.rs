//! Scripted in-memory browser used by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::dom::{SCROLL_HEIGHT_JS, SCROLL_TO_BOTTOM_JS};
use crate::error::SessionError;
use crate::hands::{BrowserSession, ElementHandle, ElementState, SessionConfig, SessionFactory};
use crate::locator::Locator;

pub const FAKE_PNG: &[u8] = b"\x89PNG-fake";

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub css: Vec<String>,
    pub xpath: Vec<String>,
    pub displayed: bool,
    pub enabled: bool,
    pub text: String,
    pub inner_html: String,
    pub value: String,
    /// Native clicks fail (e.g. element covered by an overlay).
    pub obstructed: bool,
    /// Number of upcoming operations that report a stale reference.
    pub stale_for: usize,
    /// Number of upcoming native clicks that find the reference stale.
    pub stale_clicks: usize,
    pub clicks: usize,
    pub forced_clicks: usize,
    pub submitted: bool,
}

impl FakeElement {
    pub fn css(selector: &str) -> Self {
        Self {
            css: vec![selector.to_string()],
            xpath: Vec::new(),
            displayed: true,
            enabled: true,
            text: String::new(),
            inner_html: String::new(),
            value: String::new(),
            obstructed: false,
            stale_for: 0,
            stale_clicks: 0,
            clicks: 0,
            forced_clicks: 0,
            submitted: false,
        }
    }

    pub fn also_xpath(mut self, xpath: &str) -> Self {
        self.xpath.push(xpath.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_inner_html(mut self, html: &str) -> Self {
        self.inner_html = html.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn obstructed(mut self) -> Self {
        self.obstructed = true;
        self
    }

    pub fn stale_for(mut self, n: usize) -> Self {
        self.stale_for = n;
        self
    }

    pub fn stale_on_click(mut self, n: usize) -> Self {
        self.stale_clicks = n;
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub pages: HashMap<String, Vec<FakeElement>>,
    pub elements: Vec<FakeElement>,
    pub current_url: Option<String>,
    /// Navigation requested but not yet committed; the old document stays
    /// live (and reports ready) until `wait_for_navigation`.
    pub pending_url: Option<String>,
    /// `navigate` panics, as a driver bug would.
    pub panic_on_navigate: bool,
    pub source: String,
    /// Heights reported after 0, 1, 2... scrolls; the last one repeats.
    pub heights: Vec<u64>,
    pub scrolls: usize,
    pub ready_after: usize,
    pub ready_polls: usize,
    pub screenshot_fails: bool,
    pub closed: bool,
    pub detached: bool,
    pub calls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        let browser = Self::default();
        browser.state().source = "<html><body>fixture</body></html>".to_string();
        browser
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn page(self, url: &str, elements: Vec<FakeElement>) -> Self {
        self.state().pages.insert(url.to_string(), elements);
        self
    }

    /// Navigate a fresh session to `url` and commit it.
    pub fn load(&self, url: &str) {
        let session = self.session();
        session.navigate(url).unwrap();
        session.wait_for_navigation().unwrap();
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            state: self.state.clone(),
        }
    }

    pub fn element(&self, index: usize) -> FakeElement {
        self.state().elements[index].clone()
    }
}

pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSession {
    fn with_element<T>(
        &self,
        handle: ElementHandle,
        op: &str,
        f: impl FnOnce(&mut FakeElement) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(SessionError::Closed);
        }
        state.calls.push(format!("{op}:{}", handle.0));
        let element = state
            .elements
            .get_mut(handle.0 as usize)
            .ok_or(SessionError::StaleElement)?;
        if element.stale_for > 0 {
            element.stale_for -= 1;
            return Err(SessionError::StaleElement);
        }
        f(element)
    }

    fn live(&self) -> Result<MutexGuard<'_, FakeState>, SessionError> {
        let state = self.state.lock().unwrap();
        if state.closed {
            Err(SessionError::Closed)
        } else {
            Ok(state)
        }
    }
}

impl BrowserSession for FakeSession {
    fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let panics = self.live()?.panic_on_navigate;
        if panics {
            panic!("driver crashed while navigating to {url}");
        }
        let mut state = self.live()?;
        state.calls.push(format!("navigate:{url}"));
        if !state.pages.contains_key(url) {
            return Err(SessionError::Driver(format!("net::ERR_NAME_NOT_RESOLVED at {url}")));
        }
        state.pending_url = Some(url.to_string());
        Ok(())
    }

    fn wait_for_navigation(&self) -> Result<(), SessionError> {
        let mut state = self.live()?;
        let Some(url) = state.pending_url.take() else {
            return Ok(());
        };
        state.calls.push(format!("committed:{url}"));
        state.elements = state.pages.get(&url).cloned().unwrap_or_default();
        state.current_url = Some(url);
        state.ready_polls = 0;
        Ok(())
    }

    fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>, SessionError> {
        let state = self.live()?;
        if let Locator::Css(css) = locator {
            if css.starts_with("//") || css.starts_with(".//") {
                return Err(SessionError::Driver(format!("'{css}' is not a valid selector")));
            }
        }
        Ok(state
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| match locator {
                Locator::Css(s) => e.css.iter().any(|c| c == s),
                Locator::Path(s) => e.xpath.iter().any(|x| x == s),
            })
            .map(|(i, _)| ElementHandle(i as u32))
            .collect())
    }

    fn element_state(&self, element: ElementHandle) -> Result<ElementState, SessionError> {
        self.with_element(element, "state", |e| {
            Ok(ElementState {
                displayed: e.displayed,
                enabled: e.enabled,
            })
        })
    }

    fn click(&self, element: ElementHandle) -> Result<(), SessionError> {
        self.with_element(element, "click", |e| {
            if e.stale_clicks > 0 {
                e.stale_clicks -= 1;
                return Err(SessionError::StaleElement);
            }
            if e.obstructed {
                return Err(SessionError::Driver("element click intercepted".into()));
            }
            e.clicks += 1;
            Ok(())
        })
    }

    fn force_click(&self, element: ElementHandle) -> Result<(), SessionError> {
        self.with_element(element, "force_click", |e| {
            e.forced_clicks += 1;
            Ok(())
        })
    }

    fn clear(&self, element: ElementHandle) -> Result<(), SessionError> {
        self.with_element(element, "clear", |e| {
            e.value.clear();
            Ok(())
        })
    }

    fn send_text(&self, element: ElementHandle, text: &str) -> Result<(), SessionError> {
        self.with_element(element, "send_text", |e| {
            e.value.push_str(text);
            Ok(())
        })
    }

    fn press_enter(&self, element: ElementHandle) -> Result<(), SessionError> {
        self.with_element(element, "press_enter", |e| {
            e.submitted = true;
            Ok(())
        })
    }

    fn text(&self, element: ElementHandle) -> Result<String, SessionError> {
        self.with_element(element, "text", |e| Ok(e.text.clone()))
    }

    fn inner_html(&self, element: ElementHandle) -> Result<String, SessionError> {
        self.with_element(element, "inner_html", |e| Ok(e.inner_html.clone()))
    }

    fn outer_html(&self, element: ElementHandle) -> Result<String, SessionError> {
        self.with_element(element, "outer_html", |e| {
            Ok(format!("<el>{}</el>", e.inner_html))
        })
    }

    fn document_ready(&self) -> Result<bool, SessionError> {
        let mut state = self.live()?;
        if state.pending_url.is_some() {
            return Ok(true);
        }
        state.ready_polls += 1;
        Ok(state.ready_polls > state.ready_after)
    }

    fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        let state = self.live()?;
        if state.screenshot_fails {
            return Err(SessionError::Driver("screenshot failed".into()));
        }
        Ok(FAKE_PNG.to_vec())
    }

    fn page_source(&self) -> Result<String, SessionError> {
        Ok(self.live()?.source.clone())
    }

    fn execute_script(&self, code: &str) -> Result<Value, SessionError> {
        let mut state = self.live()?;
        if code == SCROLL_TO_BOTTOM_JS {
            state.scrolls += 1;
            Ok(Value::Null)
        } else if code == SCROLL_HEIGHT_JS {
            let height = state
                .heights
                .get(state.scrolls)
                .or(state.heights.last())
                .copied()
                .unwrap_or(0);
            Ok(Value::from(height))
        } else {
            Ok(Value::Null)
        }
    }

    fn close(&mut self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.calls.push("close".into());
        Ok(())
    }

    fn detach(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.detached = true;
        state.calls.push("detach".into());
    }
}

/// Hands out sessions over one shared [`FakeBrowser`].
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub browser: FakeBrowser,
    pub launch_error: Option<String>,
    pub opened: Arc<Mutex<Vec<SessionConfig>>>,
}

impl FakeFactory {
    pub fn new(browser: FakeBrowser) -> Self {
        Self {
            browser,
            launch_error: None,
            opened: Arc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            launch_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<SessionConfig> {
        self.opened.lock().unwrap().clone()
    }
}

impl SessionFactory for FakeFactory {
    fn open(&self, config: &SessionConfig) -> Result<Box<dyn BrowserSession>, SessionError> {
        self.opened.lock().unwrap().push(config.clone());
        if let Some(message) = &self.launch_error {
            return Err(SessionError::Launch(message.clone()));
        }
        Ok(Box::new(self.browser.session()))
    }
}

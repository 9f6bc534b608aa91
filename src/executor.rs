use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::dom::{capture, find_all_with_fallback, load_page, wait_for_document_ready};
use crate::error::{SessionError, StepError};
use crate::hands::{BrowserSession, ElementHandle};
use crate::locator::SelectorSpec;
use crate::resolver::{Interactable, SelectorResolver};
use crate::types::{
    Action, ClickParams, ExtractParams, ExtractedNode, NavigateParams, RawStep, Screenshot,
    StepOutcome, TypeParams, WaitParams,
};

/// Attempts for a click whose element goes stale between lookup and use.
const CLICK_ATTEMPTS: usize = 2;

/// What a successful step produced.
#[derive(Debug, Default)]
struct Performed {
    result: String,
    data: Option<BTreeMap<usize, ExtractedNode>>,
    screenshot: Option<Screenshot>,
}

impl Performed {
    fn said(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            ..Self::default()
        }
    }
}

/// Runs one step against a session and turns every failure into an error
/// outcome.
pub struct StepExecutor {
    config: RunnerConfig,
    resolver: SelectorResolver,
}

impl StepExecutor {
    pub fn new(config: RunnerConfig) -> Self {
        let resolver = SelectorResolver::new(config.element_timeout, config.poll_interval);
        Self { config, resolver }
    }

    pub fn execute(&self, session: &dyn BrowserSession, step: &RawStep) -> StepOutcome {
        let performed = Action::from_raw(step).and_then(|action| self.perform(session, &action));
        match performed {
            Ok(done) => {
                info!(action = %step.action, result = %done.result, "Step succeeded");
                let mut outcome = StepOutcome::success(step, done.result);
                outcome.data = done.data;
                outcome.screenshot = done.screenshot;
                outcome
            }
            Err(e) => {
                warn!(action = %step.action, error = %e, "Step failed");
                StepOutcome::failure(step, e.to_string(), capture(session))
            }
        }
    }

    fn perform(
        &self,
        session: &dyn BrowserSession,
        action: &Action,
    ) -> Result<Performed, StepError> {
        match action {
            Action::Navigate(p) => self.navigate(session, p),
            Action::Click(p) => self.click(session, p),
            Action::Type(p) => self.type_text(session, p),
            Action::Wait(p) => self.wait(session, p),
            Action::Screenshot => Ok(Performed {
                result: "Captured screenshot".into(),
                screenshot: Some(Screenshot(session.screenshot()?)),
                ..Performed::default()
            }),
            Action::Extract(p) => self.extract(session, p),
        }
    }

    fn settle(&self, session: &dyn BrowserSession) -> Result<(), SessionError> {
        wait_for_document_ready(session, self.config.ready_timeout, self.config.poll_interval)
    }

    fn navigate(
        &self,
        session: &dyn BrowserSession,
        params: &NavigateParams,
    ) -> Result<Performed, StepError> {
        let url = params.url.trim();
        if url.is_empty() {
            return Err(StepError::InvalidParams {
                action: "navigate".into(),
                reason: "url is empty".into(),
            });
        }
        load_page(session, url, self.config.ready_timeout, self.config.poll_interval)?;
        Ok(Performed::said(format!("Navigated to {url}")))
    }

    fn click(
        &self,
        session: &dyn BrowserSession,
        params: &ClickParams,
    ) -> Result<Performed, StepError> {
        let spec = SelectorSpec::parse(&params.selector)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let element = self.resolver.resolve(session, &spec, Interactable::Clickable)?;
            match click_or_force(session, element) {
                Ok(()) => break,
                Err(SessionError::StaleElement) if attempt < CLICK_ATTEMPTS => {
                    debug!(selector = %spec, attempt, "Element went stale, resolving again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.settle(session)?;
        Ok(Performed::said(format!("Clicked {spec}")))
    }

    fn type_text(
        &self,
        session: &dyn BrowserSession,
        params: &TypeParams,
    ) -> Result<Performed, StepError> {
        let spec = SelectorSpec::parse(&params.selector)?;
        let element = self.resolver.resolve(session, &spec, Interactable::Visible)?;
        session.clear(element)?;

        let mut buf = [0u8; 4];
        for ch in params.text.chars() {
            session.send_text(element, ch.encode_utf8(&mut buf))?;
            let delay = self.config.typing.next_delay();
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }

        if params.press_enter {
            session.press_enter(element)?;
            self.settle(session)?;
        }
        Ok(Performed::said(format!("Typed {}", params.text)))
    }

    fn wait(
        &self,
        session: &dyn BrowserSession,
        params: &WaitParams,
    ) -> Result<Performed, StepError> {
        if let (Some(ms), Some(delay)) = (params.time, params.sleep_for()?) {
            std::thread::sleep(delay);
            return Ok(Performed::said(format!("Waited {ms}ms")));
        }
        if let Some(selector) = &params.selector {
            let spec = SelectorSpec::parse(selector)?;
            self.resolver.resolve(session, &spec, Interactable::Present)?;
            return Ok(Performed::said("Wait condition met"));
        }
        Ok(Performed::said("No wait condition given"))
    }

    fn extract(
        &self,
        session: &dyn BrowserSession,
        params: &ExtractParams,
    ) -> Result<Performed, StepError> {
        let handles = find_all_with_fallback(session, &params.selector)?;
        let mut data = BTreeMap::new();
        for (index, handle) in handles.into_iter().enumerate() {
            match read_node(session, handle) {
                Ok(node) => {
                    data.insert(index, node);
                }
                Err(SessionError::StaleElement) => {
                    debug!(index, "Skipping element that went stale during extraction");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Performed {
            result: format!("Extracted {} element(s)", data.len()),
            data: Some(data),
            screenshot: None,
        })
    }
}

/// Native click, falling back to a script click when the native one is
/// rejected. Stale references are returned untouched so the caller can
/// re-resolve.
fn click_or_force(
    session: &dyn BrowserSession,
    element: ElementHandle,
) -> Result<(), SessionError> {
    match session.click(element) {
        Ok(()) => Ok(()),
        Err(SessionError::StaleElement) => Err(SessionError::StaleElement),
        Err(e) => {
            warn!(error = %e, "Direct click failed, forcing a script click");
            session.force_click(element)
        }
    }
}

fn read_node(
    session: &dyn BrowserSession,
    handle: ElementHandle,
) -> Result<ExtractedNode, SessionError> {
    Ok(ExtractedNode {
        text: session.text(handle)?,
        attrs: session.outer_html(handle)?,
    })
}

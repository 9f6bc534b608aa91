use std::time::Duration;

use tracing::debug;

use crate::dom::poll_until;
use crate::error::{ResolveError, SessionError, StepError};
use crate::hands::{BrowserSession, ElementHandle, ElementState};
use crate::locator::{Locator, SelectorSpec};

/// How ready an element must be before it counts as resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interactable {
    /// Displayed and enabled.
    Clickable,
    Visible,
    Present,
}

impl Interactable {
    fn accepts(self, state: ElementState) -> bool {
        match self {
            Interactable::Clickable => state.displayed && state.enabled,
            Interactable::Visible => state.displayed,
            Interactable::Present => true,
        }
    }
}

/// Walks a [`SelectorSpec`]'s candidates in order, giving each a bounded
/// wait, and returns the first element in the requested state.
#[derive(Debug, Clone, Copy)]
pub struct SelectorResolver {
    timeout: Duration,
    poll_interval: Duration,
}

impl SelectorResolver {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn resolve(
        &self,
        session: &dyn BrowserSession,
        spec: &SelectorSpec,
        mode: Interactable,
    ) -> Result<ElementHandle, StepError> {
        self.try_resolve(session, spec, mode)?.ok_or_else(|| {
            StepError::NotFound(ResolveError::NotFound {
                spec: spec.raw().to_string(),
                tried: spec.candidates().len(),
            })
        })
    }

    /// `Ok(None)` when every candidate timed out; `Err` only when the session
    /// itself is gone.
    pub fn try_resolve(
        &self,
        session: &dyn BrowserSession,
        spec: &SelectorSpec,
        mode: Interactable,
    ) -> Result<Option<ElementHandle>, SessionError> {
        for candidate in spec.candidates() {
            if let Some(found) = self.wait_for(session, candidate, mode)? {
                debug!(candidate = %candidate, ?mode, "Resolved element");
                return Ok(Some(found));
            }
            debug!(candidate = %candidate, ?mode, "Candidate timed out");
        }
        Ok(None)
    }

    fn wait_for(
        &self,
        session: &dyn BrowserSession,
        locator: &Locator,
        mode: Interactable,
    ) -> Result<Option<ElementHandle>, SessionError> {
        poll_until(self.timeout, self.poll_interval, || {
            let handles = match session.find_elements(locator) {
                Ok(handles) => handles,
                Err(SessionError::Closed) => return Err(SessionError::Closed),
                Err(e) => {
                    debug!(candidate = %locator, error = %e, "Lookup failed");
                    return Ok(None);
                }
            };
            if mode == Interactable::Present {
                return Ok(handles.into_iter().next());
            }
            for handle in handles {
                match session.element_state(handle) {
                    Ok(state) if mode.accepts(state) => return Ok(Some(handle)),
                    Ok(_) | Err(SessionError::StaleElement) => {}
                    Err(SessionError::Closed) => return Err(SessionError::Closed),
                    Err(e) => debug!(error = %e, "Element state probe failed"),
                }
            }
            Ok(None)
        })
    }
}

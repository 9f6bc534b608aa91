use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::hands::{BrowserSession, ElementHandle};
use crate::locator::Locator;
use crate::types::Screenshot;

pub const SCROLL_HEIGHT_JS: &str = "document.body.scrollHeight";
pub const SCROLL_TO_BOTTOM_JS: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Run `probe` until it yields a value or `timeout` elapses. The first probe
/// happens immediately; sleeps never overshoot the deadline.
pub fn poll_until<T>(
    timeout: Duration,
    interval: Duration,
    mut probe: impl FnMut() -> Result<Option<T>, SessionError>,
) -> Result<Option<T>, SessionError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = probe()? {
            return Ok(Some(found));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(interval.min(deadline - now));
    }
}

/// Block until `document.readyState` is `complete`.
pub fn wait_for_document_ready(
    session: &dyn BrowserSession,
    timeout: Duration,
    interval: Duration,
) -> Result<(), SessionError> {
    let ready = poll_until(timeout, interval, || match session.document_ready() {
        Ok(true) => Ok(Some(())),
        Ok(false) => Ok(None),
        Err(SessionError::Closed) => Err(SessionError::Closed),
        Err(e) => {
            debug!(error = %e, "readyState probe failed, retrying");
            Ok(None)
        }
    })?;
    ready.ok_or_else(|| SessionError::Timeout(timeout.as_millis() as u64, "document ready".into()))
}

/// Navigate, wait for the new document to commit, then for it to finish
/// loading.
pub fn load_page(
    session: &dyn BrowserSession,
    url: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<(), SessionError> {
    session.navigate(url)?;
    session.wait_for_navigation()?;
    wait_for_document_ready(session, timeout, interval)
}

/// The first `max_chars` characters of the serialized page.
pub fn page_snapshot(
    session: &dyn BrowserSession,
    max_chars: usize,
) -> Result<String, SessionError> {
    let source = session.page_source()?;
    Ok(source.chars().take(max_chars).collect())
}

/// Best-effort viewport capture for diagnostics.
pub fn capture(session: &dyn BrowserSession) -> Option<Screenshot> {
    match session.screenshot() {
        Ok(png) => Some(Screenshot(png)),
        Err(e) => {
            debug!(error = %e, "Diagnostic screenshot unavailable");
            None
        }
    }
}

fn page_height(session: &dyn BrowserSession) -> Result<u64, SessionError> {
    let value = session.execute_script(SCROLL_HEIGHT_JS)?;
    match value {
        Value::Number(n) => Ok(n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)).unwrap_or(0)),
        other => Err(SessionError::Script(format!("unexpected scrollHeight: {other}"))),
    }
}

/// Scroll to the bottom until the document stops growing, at most
/// `max_rounds` times. Returns the number of scrolls performed.
pub fn scroll_until_stable(
    session: &dyn BrowserSession,
    max_rounds: usize,
    pause: Duration,
) -> Result<usize, SessionError> {
    let mut last_height = page_height(session)?;
    let mut rounds = 0;
    while rounds < max_rounds {
        session.execute_script(SCROLL_TO_BOTTOM_JS)?;
        rounds += 1;
        std::thread::sleep(pause);
        let height = page_height(session)?;
        debug!(round = rounds, last_height, height, "Scrolled to bottom");
        if height == last_height {
            break;
        }
        last_height = height;
    }
    Ok(rounds)
}

/// Every element matching `raw` as CSS, or as a path expression when CSS
/// finds nothing.
pub fn find_all_with_fallback(
    session: &dyn BrowserSession,
    raw: &str,
) -> Result<Vec<ElementHandle>, SessionError> {
    let raw = raw.trim();
    match session.find_elements(&Locator::Css(raw.to_string())) {
        Ok(found) if !found.is_empty() => return Ok(found),
        Ok(_) => {}
        Err(SessionError::Closed) => return Err(SessionError::Closed),
        Err(e) => debug!(selector = raw, error = %e, "CSS lookup failed, trying path"),
    }
    session
        .find_elements(&Locator::Path(raw.to_string()))
        .inspect_err(|e| warn!(selector = raw, error = %e, "Path lookup failed"))
}

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};

use crate::config::RunnerConfig;
use crate::dom::{capture, find_all_with_fallback, load_page, scroll_until_stable};
use crate::error::SessionError;
use crate::hands::{BrowserSession, SessionConfig, SessionFactory, SessionLease};
use crate::types::{ExtractionPlan, ExtractionResult, FieldValue, Status};

/// Read-only pipeline: load a page, let lazy content settle, then pull
/// named fields out of it.
pub struct ExtractionRunner {
    factory: Arc<dyn SessionFactory>,
    config: RunnerConfig,
    session_config: SessionConfig,
}

impl ExtractionRunner {
    /// The session is always forced headless and ephemeral, whatever
    /// `session_config` says.
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        config: RunnerConfig,
        session_config: &SessionConfig,
    ) -> Self {
        Self {
            factory,
            config,
            session_config: session_config.for_extraction(),
        }
    }

    pub fn run(&self, plan: &ExtractionPlan) -> ExtractionResult {
        let span = info_span!("extraction", url = %plan.url, fields = plan.selectors.len());
        let _enter = span.enter();
        info!(description = %plan.description, "Starting extraction");

        let mut result = ExtractionResult {
            status: Status::Success,
            url: plan.url.clone(),
            description: plan.description.clone(),
            data: BTreeMap::new(),
            screenshot: None,
            message: None,
        };

        let lease = match self.factory.open(&self.session_config) {
            Ok(session) => SessionLease::new(session, self.session_config.mode),
            Err(e) => {
                error!(error = %e, "Could not open browser session");
                result.status = Status::Error;
                result.message = Some(e.to_string());
                return result;
            }
        };
        let session = lease.session();

        if let Err(e) = self.collect(session, plan, &mut result.data) {
            warn!(error = %e, "Extraction failed");
            result.status = Status::Error;
            result.message = Some(e.to_string());
        }
        result.screenshot = capture(session);
        result
    }

    fn collect(
        &self,
        session: &dyn BrowserSession,
        plan: &ExtractionPlan,
        data: &mut BTreeMap<String, Option<FieldValue>>,
    ) -> Result<(), SessionError> {
        load_page(session, &plan.url, self.config.ready_timeout, self.config.poll_interval)?;
        let rounds = scroll_until_stable(
            session,
            self.config.max_scroll_rounds,
            self.config.scroll_pause,
        )?;
        debug!(rounds, "Page height settled");

        for (field, selector) in &plan.selectors {
            let value = match field_values(session, selector) {
                Ok(values) => FieldValue::collapse(values),
                Err(SessionError::Closed) => return Err(SessionError::Closed),
                Err(e) => {
                    warn!(field = %field, selector = %selector, error = %e, "Field lookup failed");
                    None
                }
            };
            data.insert(field.clone(), value);
        }
        Ok(())
    }
}

/// Trimmed text of every match, or its inner markup when the text is empty.
/// Elements yielding neither are skipped.
fn field_values(session: &dyn BrowserSession, selector: &str) -> Result<Vec<String>, SessionError> {
    let mut values = Vec::new();
    for handle in find_all_with_fallback(session, selector)? {
        let content = match session.text(handle) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => session.inner_html(handle)?.trim().to_string(),
            Err(SessionError::StaleElement) => continue,
            Err(e) => return Err(e),
        };
        if !content.is_empty() {
            values.push(content);
        }
    }
    Ok(values)
}

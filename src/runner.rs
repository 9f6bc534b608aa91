use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, warn};

use crate::config::RunnerConfig;
use crate::dom::{capture, page_snapshot};
use crate::executor::StepExecutor;
use crate::hands::{SessionConfig, SessionFactory, SessionLease};
use crate::types::{ExecutionTrace, FINAL_STATE_MAX_CHARS, Plan, Screenshot, Status};

/// Progress notifications published while a run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        steps: usize,
    },
    StepFinished {
        index: usize,
        action: String,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RunFinished {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Executes a whole plan in one freshly opened browser session.
pub struct AutomationRunner {
    factory: Arc<dyn SessionFactory>,
    executor: StepExecutor,
    events: Option<broadcast::Sender<RunEvent>>,
}

impl AutomationRunner {
    pub fn new(factory: Arc<dyn SessionFactory>, config: RunnerConfig) -> Self {
        Self {
            factory,
            executor: StepExecutor::new(config),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    /// Step failures are recorded per step and never change the aggregate
    /// status; only a failure to open the session or to capture the final
    /// state does.
    pub fn run(&self, plan: &Plan, session_config: &SessionConfig) -> ExecutionTrace {
        let span = info_span!("automation", steps = plan.steps.len(), mode = ?session_config.mode);
        let _enter = span.enter();

        let mut trace = ExecutionTrace::new();
        self.emit(RunEvent::RunStarted {
            steps: plan.steps.len(),
        });

        let lease = match self.factory.open(session_config) {
            Ok(session) => SessionLease::new(session, session_config.mode),
            Err(e) => {
                error!(error = %e, "Could not open browser session");
                trace.fail(e.to_string(), None);
                self.finish(&trace);
                return trace;
            }
        };
        let session = lease.session();

        for (index, step) in plan.steps.iter().enumerate() {
            info!(index, action = %step.action, "Executing step");
            let outcome = self.executor.execute(session, step);
            self.emit(RunEvent::StepFinished {
                index,
                action: outcome.action.clone(),
                status: outcome.status,
                error: outcome.error.clone(),
            });
            trace.step_outcomes.push(outcome);
        }

        match page_snapshot(session, FINAL_STATE_MAX_CHARS)
            .and_then(|snapshot| Ok((snapshot, session.screenshot()?)))
        {
            Ok((snapshot, png)) => {
                trace.final_state_snapshot = Some(snapshot);
                trace.final_screenshot = Some(Screenshot(png));
            }
            Err(e) => {
                warn!(error = %e, "Final state capture failed");
                trace.fail(e.to_string(), capture(session));
            }
        }

        let failed = trace.step_outcomes.iter().filter(|o| !o.is_success()).count();
        info!(failed, status = ?trace.status, "Automation run finished");
        self.finish(&trace);
        trace
    }

    fn finish(&self, trace: &ExecutionTrace) {
        self.emit(RunEvent::RunFinished {
            status: trace.status,
            message: trace.failure_message.clone(),
        });
    }
}

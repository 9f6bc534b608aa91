use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::StepError;

/// Length of the page-source prefix kept as the final state of a run.
pub const FINAL_STATE_MAX_CHARS: usize = 1000;
/// Upper bound on scroll-to-bottom rounds during extraction.
pub const MAX_SCROLL_ROUNDS: usize = 3;
pub const DEFAULT_EXTRACTION_DESCRIPTION: &str = "Data extraction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// PNG bytes, base64 on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot(pub Vec<u8>);

impl Screenshot {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl Serialize for Screenshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Screenshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Screenshot)
            .map_err(serde::de::Error::custom)
    }
}

/// A step as it arrives from the generator or the HTTP caller, before
/// validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStep {
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl RawStep {
    pub fn new(action: &str, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            action: action.to_string(),
            params,
        }
    }
}

/// Ordered list of steps; order is execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<RawStep>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NavigateParams {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClickParams {
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypeParams {
    pub selector: String,
    pub text: String,
    #[serde(default)]
    pub press_enter: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WaitParams {
    /// Milliseconds to sleep.
    pub time: Option<f64>,
    pub selector: Option<String>,
}

impl WaitParams {
    /// `time` as a sleep; rejects values no `Duration` can hold.
    pub fn sleep_for(&self) -> Result<Option<Duration>, StepError> {
        self.time
            .map(|ms| {
                Duration::try_from_secs_f64(ms / 1000.0).map_err(|e| StepError::InvalidParams {
                    action: "wait".into(),
                    reason: format!(
                        "time must be a non-negative number of milliseconds, got {ms}: {e}"
                    ),
                })
            })
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractParams {
    pub selector: String,
}

/// A validated step.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigate(NavigateParams),
    Click(ClickParams),
    Type(TypeParams),
    Wait(WaitParams),
    Screenshot,
    Extract(ExtractParams),
}

impl Action {
    pub fn from_raw(raw: &RawStep) -> Result<Self, StepError> {
        let action = match raw.action.as_str() {
            "navigate" => Action::Navigate(params(raw)?),
            "click" => Action::Click(params(raw)?),
            "type" => Action::Type(params(raw)?),
            "wait" => {
                let wait: WaitParams = params(raw)?;
                wait.sleep_for()?;
                Action::Wait(wait)
            }
            "screenshot" => Action::Screenshot,
            "extract" => Action::Extract(params(raw)?),
            other => return Err(StepError::UnknownAction(other.to_string())),
        };
        Ok(action)
    }
}

fn params<T: serde::de::DeserializeOwned>(raw: &RawStep) -> Result<T, StepError> {
    serde_json::from_value(Value::Object(raw.params.clone())).map_err(|e| {
        StepError::InvalidParams {
            action: raw.action.clone(),
            reason: e.to_string(),
        }
    })
}

/// One element captured by a step-level `extract`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedNode {
    pub text: String,
    /// Serialized outer markup of the element.
    pub attrs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub action: String,
    pub params: Map<String, Value>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<usize, ExtractedNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Screenshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn success(step: &RawStep, result: impl Into<String>) -> Self {
        Self {
            action: step.action.clone(),
            params: step.params.clone(),
            status: Status::Success,
            result: Some(result.into()),
            data: None,
            screenshot: None,
            error: None,
        }
    }

    pub fn failure(
        step: &RawStep,
        error: impl Into<String>,
        screenshot: Option<Screenshot>,
    ) -> Self {
        Self {
            action: step.action.clone(),
            params: step.params.clone(),
            status: Status::Error,
            result: None,
            data: None,
            screenshot,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Per-step record of one automation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub status: Status,
    #[serde(rename = "steps_results")]
    pub step_outcomes: Vec<StepOutcome>,
    #[serde(rename = "final_state", default, skip_serializing_if = "Option::is_none")]
    pub final_state_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_screenshot: Option<Screenshot>,
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    /// Best-effort capture when the run failed outside step boundaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Screenshot>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self {
            status: Status::Success,
            step_outcomes: Vec::new(),
            final_state_snapshot: None,
            final_screenshot: None,
            failure_message: None,
            screenshot: None,
        }
    }

    pub fn fail(&mut self, message: impl Into<String>, screenshot: Option<Screenshot>) {
        self.status = Status::Error;
        self.failure_message = Some(message.into());
        self.screenshot = screenshot;
    }
}

impl Default for ExecutionTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPlan {
    pub url: String,
    pub selectors: BTreeMap<String, String>,
    #[serde(default = "default_description")]
    pub description: String,
}

fn default_description() -> String {
    DEFAULT_EXTRACTION_DESCRIPTION.to_string()
}

/// A field's extracted value: a lone match collapses to a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(String),
    Many(Vec<String>),
}

impl FieldValue {
    /// Zero values map to `None`, one to a scalar, more to a list.
    pub fn collapse(mut values: Vec<String>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(FieldValue::One),
            _ => Some(FieldValue::Many(values)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub status: Status,
    pub url: String,
    pub description: String,
    pub data: BTreeMap<String, Option<FieldValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Screenshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_steps_validate_into_typed_actions() {
        let plan: Plan = serde_json::from_value(json!({
            "steps": [
                {"action": "navigate", "params": {"url": "https://example.com"}},
                {"action": "type", "params": {"selector": "#q", "text": "hi", "press_enter": true}},
                {"action": "screenshot", "params": {"filename": "x.png"}},
                {"action": "screenshot"}
            ]
        }))
        .unwrap();

        let actions: Vec<Action> = plan
            .steps
            .iter()
            .map(|s| Action::from_raw(s).unwrap())
            .collect();
        assert_eq!(
            actions[0],
            Action::Navigate(NavigateParams {
                url: "https://example.com".into()
            })
        );
        assert!(matches!(&actions[1], Action::Type(p) if p.press_enter && p.text == "hi"));
        assert_eq!(actions[2], Action::Screenshot);
        assert_eq!(actions[3], Action::Screenshot);
    }

    #[test]
    fn unknown_action_and_bad_params_are_rejected() {
        let err = Action::from_raw(&RawStep::new("select", json!({}))).unwrap_err();
        assert!(matches!(err, StepError::UnknownAction(ref a) if a == "select"));

        let err = Action::from_raw(&RawStep::new("click", json!({}))).unwrap_err();
        assert!(err.to_string().contains("selector"));

        let err = Action::from_raw(&RawStep::new("wait", json!({"time": -5}))).unwrap_err();
        assert!(matches!(err, StepError::InvalidParams { .. }));

        let err = Action::from_raw(&RawStep::new("wait", json!({"time": 1e25}))).unwrap_err();
        assert!(matches!(err, StepError::InvalidParams { ref action, .. } if action == "wait"));
    }

    #[test]
    fn collapse_follows_value_shape_law() {
        assert_eq!(FieldValue::collapse(vec![]), None);
        assert_eq!(
            FieldValue::collapse(vec!["a".into()]),
            Some(FieldValue::One("a".into()))
        );
        assert_eq!(
            FieldValue::collapse(vec!["a".into(), "b".into(), "c".into()]),
            Some(FieldValue::Many(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn trace_uses_wire_field_names() {
        let mut trace = ExecutionTrace::new();
        trace.final_state_snapshot = Some("<html>".into());
        trace.final_screenshot = Some(Screenshot(vec![1, 2, 3]));
        let value = serde_json::to_value(&trace).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["steps_results"], json!([]));
        assert_eq!(value["final_state"], "<html>");
        assert_eq!(value["final_screenshot"], "AQID");
        assert!(value.get("message").is_none());
    }

    #[test]
    fn extraction_plan_defaults_description() {
        let plan: ExtractionPlan = serde_json::from_value(json!({
            "url": "https://example.com",
            "selectors": {"title": "h1"}
        }))
        .unwrap();
        assert_eq!(plan.description, DEFAULT_EXTRACTION_DESCRIPTION);
    }
}

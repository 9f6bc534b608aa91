use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::GenerationError;
use crate::types::{ExtractionPlan, Plan, RawStep};

const AUTOMATION_PROMPT: &str = r#"You turn a user's request into browser automation steps.

Return ONLY a JSON object of this shape:
{"steps": [{"action": "<action>", "params": {...}}]}

Actions and their params:
- navigate: {"url": "https://..."}
- click: {"selector": "..."}
- type: {"selector": "...", "text": "...", "press_enter": true|false}
- wait: {"time": <milliseconds>} or {"selector": "..."}
- screenshot: {}
- extract: {"selector": "..."}

Selector guidance:
1. Prefer data attributes: [data-testid], [data-qa], [data-id].
2. Then semantic roles: [role='button'], [role='search'].
3. Substring matches help on generated ids: [id^='search'], [class*='input'].
4. XPath is allowed and must start with //, e.g. //*[contains(text(), 'Submit')].
5. Give several fallbacks separated by commas, most specific first:
   "input[name='q'], textarea[name='q'], input[type='search']".
6. Add a wait step after navigation when the page loads content late.

Example request: "search GitHub for flask and take a screenshot"
{"steps": [
  {"action": "navigate", "params": {"url": "https://github.com/search"}},
  {"action": "type", "params": {"selector": "input[name='q'], input[type='search']", "text": "flask", "press_enter": true}},
  {"action": "wait", "params": {"time": 2000}},
  {"action": "screenshot", "params": {}}
]}"#;

const EXTRACTION_PROMPT: &str = r#"You turn a user's data request into a web extraction plan.

Return ONLY a JSON object of this shape:
{"url": "https://...", "selectors": {"field_name": "selector"}, "description": "what is extracted"}

Guidelines:
1. Pick the page that most directly holds the requested data.
2. Use descriptive snake_case field names.
3. Each selector may list comma-separated CSS alternatives, or be a single XPath starting with //.
4. Typical patterns:
   - headlines: ".headline, h1, h2, h3, .title"
   - article text: ".article-body, .content, article p"
   - prices: ".price, .product-price"
   - ratings: ".rating, .stars"
   - usernames: ".username, .user-name, .handle"

Example request: "Get product names and prices from Amazon for iPhone cases"
{"url": "https://www.amazon.com/s?k=iphone+cases",
 "selectors": {"product_names": "h2 a.a-link-normal span, h2.a-size-mini", "prices": "span.a-price-whole, span.a-offscreen"},
 "description": "iPhone case names and prices from Amazon search results"}"#;

/// Turns free text into executable plans.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate_plan(&self, command: &str) -> Result<Plan, GenerationError>;

    async fn generate_extraction_plan(&self, command: &str)
    -> Result<ExtractionPlan, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct BrainConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
}

/// [`PlanGenerator`] backed by an OpenAI-compatible chat-completions API.
pub struct Brain {
    client: Client,
    config: BrainConfig,
}

impl Brain {
    pub fn new(config: BrainConfig) -> Self {
        if config.api_key.is_none() {
            warn!("No LLM API key configured; only explicit plans will run");
        }
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn complete(&self, system: &str, command: &str) -> Result<String, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingApiKey)?;

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": command},
                ],
                "temperature": 0.2,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error")
                .to_string();
            error!(status = %status, message = %message, "LLM API error");
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(GenerationError::EmptyResponse)?;
        debug!(content, "LLM replied");
        Ok(content.to_string())
    }
}

#[async_trait]
impl PlanGenerator for Brain {
    async fn generate_plan(&self, command: &str) -> Result<Plan, GenerationError> {
        info!(command, "Generating automation plan");
        let reply = self.complete(AUTOMATION_PROMPT, command).await?;
        parse_plan(&reply)
    }

    async fn generate_extraction_plan(
        &self,
        command: &str,
    ) -> Result<ExtractionPlan, GenerationError> {
        info!(command, "Generating extraction plan");
        let reply = self.complete(EXTRACTION_PROMPT, command).await?;
        parse_extraction_plan(&reply)
    }
}

/// The JSON payload inside a reply that may be wrapped in markdown fences.
pub fn strip_code_fences(reply: &str) -> &str {
    let inner = if let Some((_, rest)) = reply.split_once("```json") {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some((_, rest)) = reply.split_once("```") {
        rest.split("```").next().unwrap_or(rest)
    } else {
        reply
    };
    inner.trim()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanReply {
    Wrapped(Plan),
    Bare(Vec<RawStep>),
}

pub fn parse_plan(reply: &str) -> Result<Plan, GenerationError> {
    let plan = match serde_json::from_str(strip_code_fences(reply))? {
        PlanReply::Wrapped(plan) => plan,
        PlanReply::Bare(steps) => Plan { steps },
    };
    Ok(plan)
}

pub fn parse_extraction_plan(reply: &str) -> Result<ExtractionPlan, GenerationError> {
    Ok(serde_json::from_str(strip_code_fences(reply))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped_with_or_without_language_tag() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("Here:\n```\n[1]\n```\nthanks"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn plans_parse_wrapped_or_bare() {
        let wrapped = parse_plan(
            "```json\n{\"steps\": [{\"action\": \"navigate\", \"params\": {\"url\": \"https://a.test\"}}]}\n```",
        )
        .unwrap();
        assert_eq!(wrapped.steps.len(), 1);
        assert_eq!(wrapped.steps[0].action, "navigate");

        let bare = parse_plan("[{\"action\": \"screenshot\"}]").unwrap();
        assert_eq!(bare.steps[0].action, "screenshot");
        assert!(bare.steps[0].params.is_empty());
    }

    #[test]
    fn malformed_replies_are_generation_errors() {
        assert!(matches!(
            parse_plan("Sure! I will click the button."),
            Err(GenerationError::Parse(_))
        ));
        assert!(matches!(
            parse_plan("{\"plan\": []}"),
            Err(GenerationError::Parse(_))
        ));
        assert!(matches!(
            parse_extraction_plan("{\"url\": \"https://a.test\"}"),
            Err(GenerationError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let brain = Brain::new(BrainConfig {
            api_key: None,
            model: "test".into(),
            endpoint: "http://127.0.0.1:9/never".into(),
        });
        let err = brain.generate_plan("open example.com").await.unwrap_err();
        assert!(matches!(err, GenerationError::MissingApiKey));
    }
}

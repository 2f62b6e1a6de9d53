//! OpenAI-backed extraction using structured outputs.

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::ExtractionAi;
use crate::error::{Result, ScrapeError};
use crate::models::ExtractedDetails;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const LINKS_SYSTEM_PROMPT: &str = "You extract job posting links from careers page content. \
Return every URL that points at an individual job posting. Ignore navigation, category \
filters, social links, and listings for other companies. Return URLs exactly as they \
appear in the content, relative or absolute.";

const DETAILS_SYSTEM_PROMPT: &str = "You extract structured facts about a single job \
posting. Fill only fields the page actually states and leave everything else null. \
Do not guess missing values.";

pub struct OpenAiExtractor {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiExtractor {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// One structured-output chat completion; returns the raw JSON content of
    /// the first choice.
    async fn generate_structured(
        &self,
        schema_name: &str,
        schema: Value,
        system: &str,
        user: &str,
    ) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "strict": true,
                    "schema": schema,
                },
            },
            "temperature": 0,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScrapeError::extraction(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ScrapeError::extraction_rate_limited("provider returned 429"));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ScrapeError::extraction(format!(
                "provider returned HTTP {}: {}",
                status.as_u16(),
                snippet(&detail)
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ScrapeError::extraction(format!("malformed completion response: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ScrapeError::extraction("completion had no choices"))
    }
}

#[async_trait]
impl ExtractionAi for OpenAiExtractor {
    async fn extract_job_links(&self, content: &str, page_url: &Url) -> Result<Vec<String>> {
        let user = format!("Page URL: {page_url}\n\nPage content:\n{content}");
        let raw = self
            .generate_structured(
                "job_links",
                openai_schema::<LinkList>(),
                LINKS_SYSTEM_PROMPT,
                &user,
            )
            .await?;
        let parsed: LinkList = serde_json::from_str(&raw)
            .map_err(|e| ScrapeError::extraction(format!("links response was not valid JSON: {e}")))?;
        debug!(count = parsed.urls.len(), page = %page_url, "extracted job links");
        Ok(parsed.urls)
    }

    async fn extract_job_details(
        &self,
        content: &str,
        page_url: &str,
    ) -> Result<ExtractedDetails> {
        let user = format!("Posting URL: {page_url}\n\nPage content:\n{content}");
        let raw = self
            .generate_structured(
                "job_details",
                openai_schema::<ExtractedDetails>(),
                DETAILS_SYSTEM_PROMPT,
                &user,
            )
            .await?;
        serde_json::from_str(&raw)
            .map_err(|e| ScrapeError::extraction(format!("details response was not valid JSON: {e}")))
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LinkList {
    urls: Vec<String>,
}

fn snippet(s: &str) -> String {
    s.chars().take(200).collect()
}

/// Schema shape the provider's strict mode accepts: every property listed in
/// `required` (optionals stay nullable), `additionalProperties: false` on all
/// objects, and no `$ref` indirection.
fn openai_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_default();

    let definitions = value
        .as_object()
        .and_then(|map| map.get("definitions"))
        .cloned();
    if let Some(defs) = &definitions {
        inline_refs(&mut value, defs);
    }
    tighten_objects(&mut value);

    if let Value::Object(map) = &mut value {
        map.remove("definitions");
        map.remove("$schema");
    }
    value
}

fn tighten_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type") == Some(&Value::String("object".to_string())) {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let all: Vec<Value> =
                        props.keys().map(|k| Value::String(k.clone())).collect();
                    map.insert("required".to_string(), Value::Array(all));
                }
            }
            for (_, v) in map.iter_mut() {
                tighten_objects(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                tighten_objects(item);
            }
        }
        _ => {}
    }
}

fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(path)) = map.get("$ref").cloned() {
                if let Some(name) = path.strip_prefix("#/definitions/") {
                    if let Some(def) = definitions.get(name) {
                        *value = def.clone();
                        inline_refs(value, definitions);
                        return;
                    }
                }
            }
            for (_, v) in map.iter_mut() {
                inline_refs(v, definitions);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

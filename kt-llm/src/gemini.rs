use crate::error::{LlmError, Result};
use crate::gateway::ModelBackend;
use crate::types::{ChatMessage, GatewayResult, GenerateRequest, Role, ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Generative Language `generateContent` backend. One instance serves
/// every configured model identifier.
#[derive(Clone)]
pub struct GeminiBackend {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiBackend {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(LlmError::InvalidInput("gemini api key is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            base_url: GEMINI_DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %model))]
    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GatewayResult> {
        let req = GeminiRequest::new(request);

        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), body));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body)?;
        let parts = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();
        Ok(normalize_parts(parts))
    }
}

fn classify_failure(status: u16, body: String) -> LlmError {
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        return LlmError::RateLimited(format!("gemini status={status} body={body}"));
    }
    LlmError::Http { status, body }
}

/// Text fragments are newline-joined in order; the last function call wins.
fn normalize_parts(parts: Vec<GeminiPart>) -> GatewayResult {
    let mut out = GatewayResult::default();
    for part in parts {
        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            if !out.text.is_empty() {
                out.text.push('\n');
            }
            out.text.push_str(&text);
        }
        if let Some(call) = part.function_call.or(part.function_call_snake) {
            out.tool_call = Some(ToolCall {
                name: call.name,
                args: call.args.unwrap_or_default(),
            });
        }
    }
    out
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTools>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiTextPart>,
}

#[derive(Debug, Serialize)]
struct GeminiTextPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiTools {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

impl GeminiRequest {
    fn new(request: &GenerateRequest) -> Self {
        // The preamble rides as the leading user turn.
        let mut contents = Vec::with_capacity(request.messages.len() + 1);
        contents.push(GeminiContent {
            role: "user",
            parts: vec![GeminiTextPart {
                text: request.system_prompt.clone(),
            }],
        });
        contents.extend(
            request
                .messages
                .iter()
                .filter(|m| !m.content.trim().is_empty())
                .map(to_gemini_content),
        );

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTools {
                function_declarations: request.tools.iter().map(to_gemini_declaration).collect(),
            }]
        };

        Self {
            contents,
            tools,
            generation_config: GeminiGenerationConfig {
                temperature: request.generation.temperature,
                top_k: request.generation.top_k,
                top_p: request.generation.top_p,
                max_output_tokens: request.generation.max_output_tokens,
            },
        }
    }
}

fn to_gemini_content(m: &ChatMessage) -> GeminiContent {
    let role = match m.role {
        Role::System | Role::User => "user",
        Role::Assistant => "model",
    };
    GeminiContent {
        role,
        parts: vec![GeminiTextPart {
            text: m.content.clone(),
        }],
    }
}

fn to_gemini_declaration(t: &ToolDefinition) -> GeminiFunctionDeclaration {
    GeminiFunctionDeclaration {
        name: t.name.clone(),
        description: t.description.clone(),
        parameters: t.parameters.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "functionCall")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, rename = "function_call")]
    function_call_snake: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<serde_json::Map<String, serde_json::Value>>,
}

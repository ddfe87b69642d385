use crate::error::{LlmError, Result};
use crate::types::{
    ChatMessage, GatewayResult, GenerateRequest, GenerationConfig, RequestProfile, ToolDefinition,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One remote LLM service; `model` picks the backend identifier within it.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GatewayResult>;
}

#[derive(Debug, Clone)]
pub struct GatewayProfiles {
    pub full: GenerationConfig,
    pub degraded: GenerationConfig,
    /// Tool names advertised in the degraded profile. `None` keeps them all.
    pub degraded_tools: Option<Vec<String>>,
}

impl Default for GatewayProfiles {
    fn default() -> Self {
        Self {
            full: GenerationConfig {
                temperature: 0.3,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: 512,
            },
            degraded: GenerationConfig {
                temperature: 0.1,
                top_k: 20,
                top_p: 0.9,
                max_output_tokens: 256,
            },
            degraded_tools: None,
        }
    }
}

#[derive(Clone)]
pub struct ModelGateway {
    backend: Arc<dyn ModelBackend>,
    models: Vec<String>,
    system_prompt: String,
    profiles: GatewayProfiles,
    attempt_timeout: Duration,
    deadline: Option<Duration>,
}

impl ModelGateway {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        models: Vec<String>,
        system_prompt: impl Into<String>,
    ) -> Result<Self> {
        let models: Vec<String> = models
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if models.is_empty() {
            return Err(LlmError::InvalidInput(
                "at least one backend model is required".to_string(),
            ));
        }
        Ok(Self {
            backend,
            models,
            system_prompt: system_prompt.into(),
            profiles: GatewayProfiles::default(),
            attempt_timeout: Duration::from_secs(30),
            deadline: None,
        })
    }

    pub fn with_profiles(mut self, profiles: GatewayProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Upper bound on one whole `resolve`, across every profile and backend.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Full profile across every backend, then the degraded profile across
    /// every backend. A non-transient error ends the whole resolution at once.
    /// Running past the deadline counts as exhaustion.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn resolve(
        &self,
        conversation: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<GatewayResult> {
        let mut attempts = 0usize;
        let profiles = self.try_profiles(conversation, tools, &mut attempts);
        let timed = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, profiles)
                .await
                .map_err(|_| deadline),
            None => Ok(profiles.await),
        };
        let outcome = timed.unwrap_or_else(|deadline| {
            tracing::warn!(
                attempts,
                deadline_ms = deadline.as_millis() as u64,
                "model gateway deadline exceeded"
            );
            Err(LlmError::Timeout(deadline.as_millis() as u64))
        });
        let last = match outcome {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => e.to_string(),
            Err(e) => return Err(e),
        };
        tracing::error!(attempts, last_error = %last, "model gateway unavailable");
        Err(LlmError::Unavailable { attempts, last })
    }

    async fn try_profiles(
        &self,
        conversation: &[ChatMessage],
        tools: &[ToolDefinition],
        attempts: &mut usize,
    ) -> Result<GatewayResult> {
        let mut last_transient: Option<LlmError> = None;
        for profile in [RequestProfile::Full, RequestProfile::Degraded] {
            let request = self.build_request(profile, conversation, tools);
            match self.try_backends(&request, attempts).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        profile = profile.as_str(),
                        attempts = *attempts,
                        error = %e,
                        "all backends exhausted for request profile"
                    );
                    last_transient = Some(e);
                }
                Err(e) => {
                    tracing::warn!(
                        profile = profile.as_str(),
                        attempts = *attempts,
                        error = %e,
                        "non-transient backend failure; not trying further backends"
                    );
                    return Err(e);
                }
            }
        }
        Err(last_transient.unwrap_or_else(|| LlmError::Timeout(self.attempt_timeout.as_millis() as u64)))
    }

    async fn try_backends(
        &self,
        request: &GenerateRequest,
        attempts: &mut usize,
    ) -> Result<GatewayResult> {
        let mut last: Option<LlmError> = None;
        for model in &self.models {
            *attempts += 1;
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(self.attempt_timeout, self.backend.generate(model, request))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LlmError::Timeout(self.attempt_timeout.as_millis() as u64)),
                };
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(result) => {
                    tracing::info!(
                        backend = self.backend.name(),
                        model = %model,
                        profile = request.profile.as_str(),
                        latency_ms,
                        text_len = result.text.len(),
                        tool_call = ?result.tool_call.as_ref().map(|c| c.name.as_str()),
                        "backend attempt succeeded"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        backend = self.backend.name(),
                        model = %model,
                        profile = request.profile.as_str(),
                        latency_ms,
                        error = %e,
                        "backend attempt hit a transient failure; advancing"
                    );
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| LlmError::InvalidInput("no backend models configured".to_string())))
    }

    fn build_request(
        &self,
        profile: RequestProfile,
        conversation: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> GenerateRequest {
        let (generation, tools) = match profile {
            RequestProfile::Full => (self.profiles.full, tools.to_vec()),
            RequestProfile::Degraded => {
                let tools = match self.profiles.degraded_tools.as_ref() {
                    Some(allow) => tools
                        .iter()
                        .filter(|t| allow.iter().any(|name| name == &t.name))
                        .cloned()
                        .collect(),
                    None => tools.to_vec(),
                };
                (self.profiles.degraded, tools)
            }
        };
        GenerateRequest {
            system_prompt: self.system_prompt.clone(),
            messages: conversation.to_vec(),
            tools,
            generation,
            profile,
        }
    }
}

//! Command resolver: turns one utterance into at most one store mutation
//! plus a reply.
//!
//! Tiers run in strict order and the first one that fires ends resolution:
//! 1. the model's structured tool call
//! 2. an action descriptor embedded in the model's text
//! 3. the offline intent parser (only when the gateway failed outright)
//! 4. quick capture of short utterances as new tasks

use crate::embedded::scan_embedded_action;
use crate::intent::parse_intent;
use anyhow::Result;
use chrono::{Local, Utc};
use kt_llm::{ChatMessage, GatewayResult, LlmError, ModelGateway, ToolCall, ToolDefinition};
use kt_tools::{TaskStore, ToolOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

pub const UNREACHABLE_REPLY: &str = "Sorry, I could not reach the assistant right now.";
const DONE_REPLY: &str = "Done.";

pub fn default_system_prompt(assistant_name: &str) -> String {
    let tools = kt_tools::CATALOG
        .iter()
        .map(|spec| {
            let params: Vec<String> = spec
                .params
                .iter()
                .map(|p| {
                    if p.required {
                        p.name.to_string()
                    } else {
                        format!("{}?", p.name)
                    }
                })
                .collect();
            format!("{}({})", spec.name, params.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ");
    [
        format!("You are {assistant_name}, a decisive, helpful productivity assistant."),
        "You control the user's tasks and notes using tools. Prefer tool calls for actionable intents."
            .to_string(),
        "Be concise and proactive. Avoid hedging. Offer helpful follow-ups (e.g., due dates, priorities)."
            .to_string(),
        format!("Available tools: {tools}."),
    ]
    .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    ToolCall,
    EmbeddedAction,
    LocalIntent,
    QuickCapture,
    None,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::EmbeddedAction => "embedded_action",
            Self::LocalIntent => "local_intent",
            Self::QuickCapture => "quick_capture",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub reply: String,
    pub mutation_applied: bool,
    pub tier: Tier,
}

pub struct CommandResolver {
    gateway: Option<ModelGateway>,
    store: Arc<dyn TaskStore>,
    tools: Vec<ToolDefinition>,
    quick_capture_max_words: usize,
    serial: tokio::sync::Mutex<()>,
}

impl CommandResolver {
    /// `gateway = None` behaves like a gateway that always fails.
    pub fn new(
        gateway: Option<ModelGateway>,
        store: Arc<dyn TaskStore>,
        quick_capture_max_words: usize,
    ) -> Self {
        Self {
            gateway,
            store,
            tools: kt_tools::tool_definitions(),
            quick_capture_max_words,
            serial: tokio::sync::Mutex::new(()),
        }
    }

    pub fn gateway(&self) -> Option<&ModelGateway> {
        self.gateway.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Resolves `utterance` given the earlier turns of its conversation.
    /// Only store failures surface as errors.
    #[tracing::instrument(level = "info", skip_all, fields(utterance_len = utterance.len()))]
    pub async fn handle(&self, utterance: &str, history: &[ChatMessage]) -> Result<Resolution> {
        let started = Instant::now();

        let mut conversation = history.to_vec();
        conversation.push(ChatMessage::user(utterance));

        let gateway_outcome = match self.gateway.as_ref() {
            Some(gateway) => gateway.resolve(&conversation, &self.tools).await,
            None => Err(LlmError::InvalidInput(
                "model gateway is not configured".to_string(),
            )),
        };
        let (result, gateway_failed) = match gateway_outcome {
            Ok(result) => (result, false),
            Err(e) => {
                tracing::warn!(error = %e, "model gateway failed; using offline resolution");
                (GatewayResult::default(), true)
            }
        };

        let fired = {
            let _serial = self.serial.lock().await;
            self.run_tiers(utterance, &result, gateway_failed).await?
        };
        let resolution = compose_reply(&result.text, fired, gateway_failed);

        tracing::info!(
            tier = resolution.tier.as_str(),
            mutation_applied = resolution.mutation_applied,
            gateway_failed,
            reply_len = resolution.reply.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "utterance resolved"
        );
        Ok(resolution)
    }

    async fn run_tiers(
        &self,
        utterance: &str,
        result: &GatewayResult,
        gateway_failed: bool,
    ) -> Result<Option<(Tier, ToolOutcome)>> {
        if let Some(call) = result.tool_call.as_ref() {
            if let Some(outcome) = self.dispatch(Tier::ToolCall, call).await? {
                return Ok(Some((Tier::ToolCall, outcome)));
            }
        }

        if !gateway_failed {
            if let Some(call) = scan_embedded_action(&result.text, Utc::now()) {
                if let Some(outcome) = self.dispatch(Tier::EmbeddedAction, &call).await? {
                    return Ok(Some((Tier::EmbeddedAction, outcome)));
                }
            }
        }

        if gateway_failed {
            if let Some(intent) = parse_intent(utterance, Local::now()) {
                let call = intent.into_tool_call();
                if let Some(outcome) = self.dispatch(Tier::LocalIntent, &call).await? {
                    return Ok(Some((Tier::LocalIntent, outcome)));
                }
            }
        }

        let words = utterance.split_whitespace().count();
        if (1..=self.quick_capture_max_words).contains(&words) {
            let call = ToolCall::new("add_task")
                .with_arg("title", utterance.trim())
                .with_arg("dueDate", Utc::now().to_rfc3339());
            if let Some(outcome) = self.dispatch(Tier::QuickCapture, &call).await? {
                return Ok(Some((Tier::QuickCapture, outcome)));
            }
        }

        Ok(None)
    }

    /// `Ok(None)` means the call was not actionable and the next tier runs.
    async fn dispatch(&self, tier: Tier, call: &ToolCall) -> Result<Option<ToolOutcome>> {
        let validated = match kt_tools::validate(call) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(
                    tier = tier.as_str(),
                    tool = %call.name,
                    error = %e,
                    "tool call not actionable; falling through"
                );
                return Ok(None);
            }
        };
        let tool = validated.tool;
        let store = Arc::clone(&self.store);
        let outcome =
            tokio::task::spawn_blocking(move || kt_tools::execute(store.as_ref(), &validated))
                .await??;
        tracing::info!(
            tier = tier.as_str(),
            tool = tool.name(),
            mutated = outcome.mutated,
            "resolver tier fired"
        );
        Ok(Some(outcome))
    }
}

fn compose_reply(
    model_text: &str,
    fired: Option<(Tier, ToolOutcome)>,
    gateway_failed: bool,
) -> Resolution {
    let model_text = model_text.trim();
    let Some((tier, outcome)) = fired else {
        let reply = if gateway_failed {
            UNREACHABLE_REPLY.to_string()
        } else {
            model_text.to_string()
        };
        return Resolution {
            reply,
            mutation_applied: false,
            tier: Tier::None,
        };
    };

    let parts: Vec<&str> = [Some(model_text), outcome.reply.as_deref()]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();
    let reply = if parts.is_empty() {
        DONE_REPLY.to_string()
    } else {
        parts.join("\n\n")
    };
    Resolution {
        reply,
        mutation_applied: outcome.mutated,
        tier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Timelike};
    use kt_llm::{GenerateRequest, ModelBackend};
    use kt_tools::MemoryStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct FakeBackend {
        replies: Mutex<VecDeque<kt_llm::Result<GatewayResult>>>,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(replies: Vec<kt_llm::Result<GatewayResult>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Self::new(vec![Err(LlmError::Http {
                status: 401,
                body: "API key not valid".to_string(),
            })])
        }
    }

    #[async_trait]
    impl ModelBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate(
            &self,
            _model: &str,
            _request: &GenerateRequest,
        ) -> kt_llm::Result<GatewayResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Ok(GatewayResult::default()))
        }
    }

    /// Never answers an utterance containing `hang_on`; answers anything
    /// else at once with no text and no action.
    struct HangingBackend {
        hang_on: &'static str,
        hung: tokio::sync::Notify,
    }

    impl HangingBackend {
        fn new(hang_on: &'static str) -> Arc<Self> {
            Arc::new(Self {
                hang_on,
                hung: tokio::sync::Notify::new(),
            })
        }
    }

    #[async_trait]
    impl ModelBackend for HangingBackend {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn generate(
            &self,
            _model: &str,
            request: &GenerateRequest,
        ) -> kt_llm::Result<GatewayResult> {
            let last = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");
            if last.contains(self.hang_on) {
                self.hung.notify_one();
                std::future::pending::<()>().await;
            }
            Ok(GatewayResult::default())
        }
    }

    fn reply(text: &str, tool_call: Option<ToolCall>) -> kt_llm::Result<GatewayResult> {
        Ok(GatewayResult {
            text: text.to_string(),
            tool_call,
        })
    }

    fn resolver(backend: Arc<FakeBackend>) -> (CommandResolver, Arc<MemoryStore>) {
        let gateway = ModelGateway::new(backend, vec!["m1".to_string()], "prompt")
            .expect("gateway");
        let store = Arc::new(MemoryStore::new());
        (CommandResolver::new(Some(gateway), store.clone(), 6), store)
    }

    fn titles(store: &MemoryStore) -> Vec<String> {
        store
            .list_tasks()
            .expect("list")
            .into_iter()
            .map(|t| t.title)
            .collect()
    }

    #[tokio::test]
    async fn tool_call_is_executed_and_acknowledged() {
        let backend = FakeBackend::new(vec![reply(
            "",
            Some(ToolCall::new("add_task").with_arg("title", "Pay rent")),
        )]);
        let (resolver, store) = resolver(backend);

        let res = resolver.handle("I need to pay rent", &[]).await.expect("resolve");
        assert_eq!(res.tier, Tier::ToolCall);
        assert!(res.mutation_applied);
        assert_eq!(res.reply, "Done.");
        assert_eq!(titles(&store), vec!["Pay rent"]);
    }

    #[tokio::test]
    async fn invalid_tool_call_never_mutates() {
        let backend = FakeBackend::new(vec![reply(
            "",
            Some(ToolCall::new("add_task").with_arg("title", "")),
        )]);
        let (resolver, store) = resolver(backend);

        let res = resolver
            .handle("could you maybe think about adding something for later", &[])
            .await
            .expect("resolve");
        assert_eq!(res.tier, Tier::None);
        assert!(!res.mutation_applied);
        assert_eq!(res.reply, "");
        assert!(titles(&store).is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_falls_through_to_embedded_action() {
        let backend = FakeBackend::new(vec![reply(
            r#"Adding it. {"action":"add_task","title":"Water plants"}"#,
            Some(ToolCall::new("water_plants")),
        )]);
        let (resolver, store) = resolver(backend);

        let res = resolver
            .handle("please remember the plants need water this week", &[])
            .await
            .expect("resolve");
        assert_eq!(res.tier, Tier::EmbeddedAction);
        assert!(res.reply.starts_with("Adding it."));
        assert_eq!(titles(&store), vec!["Water plants"]);
    }

    #[tokio::test]
    async fn only_the_first_tier_mutates() {
        let backend = FakeBackend::new(vec![reply(
            r#"{"action":"add_task","title":"second"}"#,
            Some(ToolCall::new("add_task").with_arg("title", "first")),
        )]);
        let (resolver, store) = resolver(backend);

        resolver.handle("add two", &[]).await.expect("resolve");
        assert_eq!(titles(&store), vec!["first"]);
    }

    #[tokio::test]
    async fn listing_reply_follows_model_text() {
        let backend = FakeBackend::new(vec![reply(
            "Here you go:",
            Some(ToolCall::new("list_tasks")),
        )]);
        let (resolver, store) = resolver(backend);
        store.add_task("Buy milk", None).expect("add");

        let res = resolver.handle("what's on my list", &[]).await.expect("resolve");
        assert!(!res.mutation_applied);
        assert_eq!(res.reply, "Here you go:\n\n1. Buy milk");
    }

    #[tokio::test]
    async fn gateway_failure_uses_local_intent_with_due_date() {
        let backend = FakeBackend::failing();
        let (resolver, store) = resolver(backend.clone());

        let res = resolver
            .handle("add task Buy milk tomorrow at 5pm", &[])
            .await
            .expect("resolve");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(res.tier, Tier::LocalIntent);
        assert!(res.mutation_applied);

        let tasks = store.list_tasks().expect("list");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Buy milk");
        let due = DateTime::parse_from_rfc3339(tasks[0].due_date.as_deref().expect("due"))
            .expect("rfc3339")
            .with_timezone(&Local);
        let tomorrow = Local::now().date_naive() + Duration::days(1);
        assert_eq!(due.date_naive(), tomorrow);
        assert_eq!((due.hour(), due.minute()), (17, 0));
    }

    #[tokio::test]
    async fn gateway_failure_completes_matching_task_only() {
        let (resolver, store) = resolver(FakeBackend::failing());
        store.add_task("Book flights", None).expect("add");
        store.add_task("Buy milk", None).expect("add");

        let res = resolver
            .handle("complete the flights task", &[])
            .await
            .expect("resolve");
        assert_eq!(res.tier, Tier::LocalIntent);

        let done: Vec<String> = store
            .list_tasks()
            .expect("list")
            .into_iter()
            .filter(|t| t.completed)
            .map(|t| t.title)
            .collect();
        assert_eq!(done, vec!["Book flights"]);
    }

    #[tokio::test]
    async fn six_words_without_intent_become_a_task() {
        let (resolver, store) = resolver(FakeBackend::failing());

        let res = resolver
            .handle("buy fresh bread at the bakery", &[])
            .await
            .expect("resolve");
        assert_eq!(res.tier, Tier::QuickCapture);
        assert_eq!(res.reply, "Done.");
        let tasks = store.list_tasks().expect("list");
        assert_eq!(tasks[0].title, "buy fresh bread at the bakery");
        let due = DateTime::parse_from_rfc3339(tasks[0].due_date.as_deref().expect("due"))
            .expect("rfc3339");
        assert!((Utc::now() - due.with_timezone(&Utc)).num_seconds().abs() < 60);
    }

    #[tokio::test]
    async fn long_utterance_without_intent_apologizes() {
        let (resolver, store) = resolver(FakeBackend::failing());

        let res = resolver
            .handle("how are you doing on this fine sunny morning", &[])
            .await
            .expect("resolve");
        assert_eq!(res.tier, Tier::None);
        assert!(!res.mutation_applied);
        assert_eq!(res.reply, UNREACHABLE_REPLY);
        assert!(titles(&store).is_empty());
    }

    #[tokio::test]
    async fn quick_capture_also_applies_when_model_answers_without_action() {
        let backend = FakeBackend::new(vec![reply("Noted!", None)]);
        let (resolver, store) = resolver(backend);

        let res = resolver.handle("dentist friday", &[]).await.expect("resolve");
        assert_eq!(res.tier, Tier::QuickCapture);
        assert_eq!(res.reply, "Noted!");
        assert_eq!(titles(&store), vec!["dentist friday"]);
    }

    #[tokio::test]
    async fn missing_gateway_resolves_offline() {
        let store = Arc::new(MemoryStore::new());
        let resolver = CommandResolver::new(None, store.clone(), 6);

        let res = resolver
            .handle("note that the garage code is 4411", &[])
            .await
            .expect("resolve");
        assert_eq!(res.tier, Tier::LocalIntent);
        assert_eq!(store.read_notes().expect("notes").trim(), "the garage code is 4411");
    }

    #[tokio::test]
    async fn hung_backends_still_reach_local_intent_within_the_request_budget() {
        let request_budget = StdDuration::from_secs(1);
        let gateway = ModelGateway::new(
            HangingBackend::new(""),
            vec!["m1".to_string(), "m2".to_string()],
            "prompt",
        )
        .expect("gateway")
        .with_attempt_timeout(StdDuration::from_millis(400))
        .with_deadline(StdDuration::from_millis(300));
        let store = Arc::new(MemoryStore::new());
        let resolver = CommandResolver::new(Some(gateway), store.clone(), 6);

        let res = tokio::time::timeout(
            request_budget,
            resolver.handle("add task Buy milk tomorrow at 5pm", &[]),
        )
        .await
        .expect("resolved before the request budget ran out")
        .expect("resolve");
        assert_eq!(res.tier, Tier::LocalIntent);
        assert!(res.mutation_applied);
        assert_eq!(titles(&store), vec!["Buy milk"]);
    }

    #[tokio::test]
    async fn slow_model_call_does_not_block_other_utterances() {
        let backend = HangingBackend::new("slow");
        let gateway = ModelGateway::new(backend.clone(), vec!["m1".to_string()], "prompt")
            .expect("gateway")
            .with_attempt_timeout(StdDuration::from_secs(60));
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(CommandResolver::new(Some(gateway), store.clone(), 6));

        let slow = tokio::spawn({
            let resolver = Arc::clone(&resolver);
            async move { resolver.handle("slow thing", &[]).await }
        });
        backend.hung.notified().await;

        let res = tokio::time::timeout(StdDuration::from_secs(2), resolver.handle("buy eggs", &[]))
            .await
            .expect("not queued behind the slow call")
            .expect("resolve");
        assert_eq!(res.tier, Tier::QuickCapture);
        assert_eq!(titles(&store), vec!["buy eggs"]);
        slow.abort();
    }

    #[test]
    fn system_prompt_lists_every_tool() {
        let prompt = default_system_prompt("HussainAI");
        assert!(prompt.starts_with("You are HussainAI"));
        assert!(prompt.contains("add_task(title, dueDate?)"));
        assert!(prompt.contains("clear_completed()"));
    }
}

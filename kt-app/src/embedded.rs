//! Scanner for action descriptors a model writes into its prose reply, e.g.
//! `Sure! {"action": "add_task", "title": "Pay rent"}`.

use chrono::{DateTime, Utc};
use kt_llm::ToolCall;
use kt_tools::CatalogTool;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionDescriptor {
    action: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Widest `{ .. }` region of `text` as a core-tool call. Anything else is `None`.
pub fn scan_embedded_action(text: &str, now: DateTime<Utc>) -> Option<ToolCall> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let descriptor: ActionDescriptor = match serde_json::from_str(&text[start..=end]) {
        Ok(d) => d,
        Err(e) => {
            tracing::debug!(error = %e, "brace region is not an action descriptor");
            return None;
        }
    };

    let tool = CatalogTool::from_name(&descriptor.action).filter(|t| t.is_core())?;
    let call = ToolCall::new(tool.name());
    let call = match tool {
        CatalogTool::AddTask => with_opt(call, "title", descriptor.title).with_arg(
            "dueDate",
            descriptor
                .due_date
                .unwrap_or_else(|| now.to_rfc3339()),
        ),
        CatalogTool::AddNote => with_opt(call, "text", descriptor.text.or(descriptor.title)),
        _ => with_opt(call, "title", descriptor.title),
    };
    Some(call)
}

fn with_opt(call: ToolCall, key: &str, value: Option<String>) -> ToolCall {
    match value {
        Some(v) => call.with_arg(key, v),
        None => call,
    }
}

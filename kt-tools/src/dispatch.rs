use crate::catalog::CatalogTool;
use crate::error::{Result, ToolError};
use crate::store::{Task, TaskStore};
use chrono::{DateTime, FixedOffset, Local};
use kt_llm::ToolCall;
use std::collections::HashMap;

const SUMMARY_LINES_MAX: usize = 5;

/// A catalog tool whose required parameters are all present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCall {
    pub tool: CatalogTool,
    args: HashMap<&'static str, String>,
}

impl ValidatedCall {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutcome {
    pub mutated: bool,
    /// Tool-specific reply (listings, "not found", counts).
    pub reply: Option<String>,
    /// Title of the task a lookup tool resolved to, if any.
    pub target: Option<String>,
}

pub fn validate(call: &ToolCall) -> Result<ValidatedCall> {
    let tool = CatalogTool::from_name(&call.name)
        .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

    let mut args = HashMap::new();
    for param in tool.spec().params {
        match call.args.get(param.name).and_then(arg_string) {
            Some(value) => {
                args.insert(param.name, value);
            }
            None if param.required => {
                return Err(ToolError::InvalidArguments(format!(
                    "{}: missing required key {}",
                    tool.name(),
                    param.name
                )));
            }
            None => {}
        }
    }
    Ok(ValidatedCall { tool, args })
}

fn arg_string(value: &serde_json::Value) -> Option<String> {
    let s = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    Some(s).filter(|s| !s.is_empty())
}

/// Runs one validated call against the store. At most one store mutation.
#[tracing::instrument(level = "info", skip_all, fields(tool = call.tool.name()))]
pub fn execute(store: &dyn TaskStore, call: &ValidatedCall) -> Result<ToolOutcome> {
    let arg = |name: &str| call.arg(name).unwrap_or_default();

    let outcome = match call.tool {
        CatalogTool::AddTask => {
            store.add_task(arg("title"), call.arg("dueDate"))?;
            mutated(None)
        }
        CatalogTool::CompleteTask => match store.find_by_title_substring(arg("title"))? {
            Some(task) => ToolOutcome {
                mutated: store.toggle_completion(&task.id)?,
                reply: None,
                target: Some(task.title),
            },
            None => ToolOutcome::default(),
        },
        CatalogTool::DeleteTask => match store.find_by_title_substring(arg("title"))? {
            Some(task) => ToolOutcome {
                mutated: store.delete(&task.id)?,
                reply: None,
                target: Some(task.title),
            },
            None => ToolOutcome::default(),
        },
        CatalogTool::AddNote => {
            store.append_note(arg("text"))?;
            mutated(None)
        }
        CatalogTool::ListTasks => {
            let tasks = store.list_tasks()?;
            reply_only(format_task_lines(&tasks).unwrap_or_else(|| "No tasks yet.".to_string()))
        }
        CatalogTool::ListNotes => {
            let notes = store.read_notes()?;
            let notes = notes.trim();
            reply_only(if notes.is_empty() {
                "No notes yet.".to_string()
            } else {
                notes.to_string()
            })
        }
        CatalogTool::SummarizeNotes => reply_only(summarize_notes(&store.read_notes()?)),
        CatalogTool::PrioritizeTasks => {
            let mut tasks = store.list_tasks()?;
            tasks.sort_by_key(|t| {
                let due = parse_due(t);
                (due.is_none(), due)
            });
            reply_only(format_task_lines(&tasks).unwrap_or_else(|| "No tasks yet.".to_string()))
        }
        CatalogTool::SetDueDate => match store.find_by_title_substring(arg("title"))? {
            Some(task) => ToolOutcome {
                mutated: store.set_due_date(&task.id, arg("dueDate"))?,
                reply: Some("Due date set.".to_string()),
                target: Some(task.title),
            },
            None => reply_only("Task not found.".to_string()),
        },
        CatalogTool::RenameTask => match store.find_by_title_substring(arg("title"))? {
            Some(task) => ToolOutcome {
                mutated: store.rename(&task.id, arg("newTitle"))?,
                reply: Some("Task renamed.".to_string()),
                target: Some(task.title),
            },
            None => reply_only("Task not found.".to_string()),
        },
        CatalogTool::ClearCompleted => {
            let removed = store.clear_completed()?;
            ToolOutcome {
                mutated: removed > 0,
                reply: Some(if removed > 0 {
                    format!("Cleared {removed} completed task(s).")
                } else {
                    "No completed tasks to clear.".to_string()
                }),
                target: None,
            }
        }
    };

    tracing::info!(
        mutated = outcome.mutated,
        target = ?outcome.target,
        "catalog tool executed"
    );
    Ok(outcome)
}

fn mutated(reply: Option<String>) -> ToolOutcome {
    ToolOutcome {
        mutated: true,
        reply,
        target: None,
    }
}

fn reply_only(reply: String) -> ToolOutcome {
    ToolOutcome {
        mutated: false,
        reply: Some(reply),
        target: None,
    }
}

fn summarize_notes(notes: &str) -> String {
    let notes = notes.trim();
    if notes.is_empty() {
        return "No notes to summarize.".to_string();
    }
    let top: Vec<&str> = notes
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SUMMARY_LINES_MAX)
        .collect();
    format!("Summary (first items):\n{}", top.join("\n"))
}

fn parse_due(task: &Task) -> Option<DateTime<FixedOffset>> {
    task.due_date
        .as_deref()
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
}

/// `"{n}. {title}[ (done)][ - due {local time}]"` per task; `None` when empty.
pub fn format_task_lines(tasks: &[Task]) -> Option<String> {
    if tasks.is_empty() {
        return None;
    }
    let lines: Vec<String> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut line = format!("{}. {}", i + 1, t.title);
            if t.completed {
                line.push_str(" (done)");
            }
            if let Some(raw) = t.due_date.as_deref() {
                let shown = match DateTime::parse_from_rfc3339(raw) {
                    Ok(due) => due.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
                    Err(_) => raw.to_string(),
                };
                line.push_str(&format!(" - due {shown}"));
            }
            line
        })
        .collect();
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn run(store: &MemoryStore, call: ToolCall) -> ToolOutcome {
        let validated = validate(&call).expect("valid call");
        execute(store, &validated).expect("execute")
    }

    #[test]
    fn validate_rejects_unknown_tool() {
        let err = validate(&ToolCall::new("format_disk")).expect_err("unknown");
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "format_disk"));
    }

    #[test]
    fn validate_rejects_missing_or_blank_required_args() {
        let err = validate(&ToolCall::new("add_task").with_arg("title", "   "))
            .expect_err("blank title");
        assert!(err.to_string().contains("title"));

        let err = validate(&ToolCall::new("rename_task").with_arg("title", "milk"))
            .expect_err("missing newTitle");
        assert!(err.to_string().contains("newTitle"));

        let err = validate(&ToolCall::new("add_note").with_arg("text", serde_json::Value::Null))
            .expect_err("null text");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn validate_stringifies_scalars_and_keeps_optional_args() {
        let call = validate(
            &ToolCall::new("add_task")
                .with_arg("title", 42)
                .with_arg("dueDate", "2026-10-17T09:00:00Z"),
        )
        .expect("valid");
        assert_eq!(call.arg("title"), Some("42"));
        assert_eq!(call.arg("dueDate"), Some("2026-10-17T09:00:00Z"));
    }

    #[test]
    fn complete_toggles_only_first_substring_match() {
        let store = MemoryStore::new();
        store.add_task("Book flights", None).expect("add");
        store.add_task("Buy milk", None).expect("add");

        let outcome = run(&store, ToolCall::new("complete_task").with_arg("title", "FLIGHTS"));
        assert!(outcome.mutated);
        assert_eq!(outcome.target.as_deref(), Some("Book flights"));

        let tasks = store.list_tasks().expect("list");
        let done: Vec<&str> = tasks
            .iter()
            .filter(|t| t.completed)
            .map(|t| t.title.as_str())
            .collect();
        assert_eq!(done, vec!["Book flights"]);
    }

    #[test]
    fn lookup_miss_is_a_no_op() {
        let store = MemoryStore::new();
        store.add_task("Buy milk", None).expect("add");

        let outcome = run(&store, ToolCall::new("delete_task").with_arg("title", "dentist"));
        assert_eq!(outcome, ToolOutcome::default());
        assert_eq!(store.list_tasks().expect("list").len(), 1);

        let outcome = run(
            &store,
            ToolCall::new("rename_task")
                .with_arg("title", "dentist")
                .with_arg("newTitle", "x"),
        );
        assert!(!outcome.mutated);
        assert_eq!(outcome.reply.as_deref(), Some("Task not found."));
    }

    #[test]
    fn set_due_date_and_rename_report_success() {
        let store = MemoryStore::new();
        store.add_task("Buy milk", None).expect("add");

        let outcome = run(
            &store,
            ToolCall::new("set_due_date")
                .with_arg("title", "milk")
                .with_arg("dueDate", "2026-10-17T17:00:00Z"),
        );
        assert!(outcome.mutated);
        assert_eq!(outcome.reply.as_deref(), Some("Due date set."));

        let outcome = run(
            &store,
            ToolCall::new("rename_task")
                .with_arg("title", "milk")
                .with_arg("newTitle", "Buy oat milk"),
        );
        assert_eq!(outcome.reply.as_deref(), Some("Task renamed."));
        let task = &store.list_tasks().expect("list")[0];
        assert_eq!(task.title, "Buy oat milk");
        assert_eq!(task.due_date.as_deref(), Some("2026-10-17T17:00:00Z"));
    }

    #[test]
    fn list_tools_do_not_mutate() {
        let store = MemoryStore::new();
        let outcome = run(&store, ToolCall::new("list_tasks"));
        assert!(!outcome.mutated);
        assert_eq!(outcome.reply.as_deref(), Some("No tasks yet."));

        let outcome = run(&store, ToolCall::new("list_notes"));
        assert_eq!(outcome.reply.as_deref(), Some("No notes yet."));

        let outcome = run(&store, ToolCall::new("summarize_notes"));
        assert_eq!(outcome.reply.as_deref(), Some("No notes to summarize."));
    }

    #[test]
    fn summarize_takes_first_five_non_empty_lines() {
        let summary = summarize_notes("a\n\nb\nc\n\nd\ne\nf\ng");
        assert_eq!(summary, "Summary (first items):\na\nb\nc\nd\ne");
    }

    #[test]
    fn prioritize_sorts_by_due_without_touching_stored_order() {
        let store = MemoryStore::new();
        store.add_task("undated", None).expect("add");
        store
            .add_task("later", Some("2026-12-01T09:00:00Z"))
            .expect("add");
        store
            .add_task("sooner", Some("2026-11-01T09:00:00Z"))
            .expect("add");
        store.add_task("garbled", Some("next week")).expect("add");

        let outcome = run(&store, ToolCall::new("prioritize_tasks"));
        let reply = outcome.reply.expect("reply");
        let order: Vec<&str> = reply
            .lines()
            .map(|l| l.split(". ").nth(1).unwrap_or_default())
            .map(|rest| rest.split(" - ").next().unwrap_or_default())
            .collect();
        assert_eq!(order, vec!["sooner", "later", "garbled", "undated"]);

        let stored: Vec<String> = store
            .list_tasks()
            .expect("list")
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(stored, vec!["garbled", "sooner", "later", "undated"]);
    }

    #[test]
    fn clear_completed_reports_count() {
        let store = MemoryStore::new();
        let id = store.add_task("done thing", None).expect("add");
        store.toggle_completion(&id).expect("toggle");

        let outcome = run(&store, ToolCall::new("clear_completed"));
        assert!(outcome.mutated);
        assert_eq!(outcome.reply.as_deref(), Some("Cleared 1 completed task(s)."));

        let outcome = run(&store, ToolCall::new("clear_completed"));
        assert!(!outcome.mutated);
        assert_eq!(outcome.reply.as_deref(), Some("No completed tasks to clear."));
    }

    #[test]
    fn task_lines_mark_done_and_raw_due_text() {
        let tasks = vec![Task {
            id: "1".to_string(),
            title: "Pay rent".to_string(),
            completed: true,
            created_at: chrono::Utc::now(),
            due_date: Some("first of the month".to_string()),
        }];
        assert_eq!(
            format_task_lines(&tasks).as_deref(),
            Some("1. Pay rent (done) - due first of the month")
        );
    }
}

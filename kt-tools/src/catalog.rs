use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogTool {
    AddTask,
    CompleteTask,
    DeleteTask,
    AddNote,
    ListTasks,
    ListNotes,
    SummarizeNotes,
    PrioritizeTasks,
    SetDueDate,
    RenameTask,
    ClearCompleted,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: Option<&'static str>,
    pub required: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub tool: CatalogTool,
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

const fn required(name: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        description: None,
        required: true,
    }
}

/// Ordered catalog. Index matches the `CatalogTool` discriminant.
pub const CATALOG: &[ToolSpec] = &[
    ToolSpec {
        tool: CatalogTool::AddTask,
        name: "add_task",
        description: "Add a todo task. Optionally include a due date in ISO format.",
        params: &[
            ParamSpec {
                name: "title",
                description: Some("Task title"),
                required: true,
            },
            ParamSpec {
                name: "dueDate",
                description: Some("Optional due date in ISO-8601"),
                required: false,
            },
        ],
    },
    ToolSpec {
        tool: CatalogTool::CompleteTask,
        name: "complete_task",
        description: "Mark a task complete by matching on title or partial title.",
        params: &[required("title")],
    },
    ToolSpec {
        tool: CatalogTool::DeleteTask,
        name: "delete_task",
        description: "Delete a task by matching on title or partial title.",
        params: &[required("title")],
    },
    ToolSpec {
        tool: CatalogTool::AddNote,
        name: "add_note",
        description: "Append a note to the user's notepad.",
        params: &[required("text")],
    },
    ToolSpec {
        tool: CatalogTool::ListTasks,
        name: "list_tasks",
        description: "Request a list of current tasks. No parameters.",
        params: &[],
    },
    ToolSpec {
        tool: CatalogTool::ListNotes,
        name: "list_notes",
        description: "Request current notes content. No parameters.",
        params: &[],
    },
    ToolSpec {
        tool: CatalogTool::SummarizeNotes,
        name: "summarize_notes",
        description: "Summarize the user's notes briefly.",
        params: &[],
    },
    ToolSpec {
        tool: CatalogTool::PrioritizeTasks,
        name: "prioritize_tasks",
        description: "Prioritize tasks based on due dates and completion status.",
        params: &[],
    },
    ToolSpec {
        tool: CatalogTool::SetDueDate,
        name: "set_due_date",
        description: "Set or update a task's due date by title.",
        params: &[required("title"), required("dueDate")],
    },
    ToolSpec {
        tool: CatalogTool::RenameTask,
        name: "rename_task",
        description: "Rename a task by matching title/partial and setting a newTitle.",
        params: &[required("title"), required("newTitle")],
    },
    ToolSpec {
        tool: CatalogTool::ClearCompleted,
        name: "clear_completed",
        description: "Remove all completed tasks.",
        params: &[],
    },
];

/// The minimal action set: what the degraded profile advertises and what the
/// free-text action scanner accepts.
pub const CORE_TOOLS: &[CatalogTool] = &[
    CatalogTool::AddTask,
    CatalogTool::CompleteTask,
    CatalogTool::DeleteTask,
    CatalogTool::AddNote,
];

impl CatalogTool {
    pub fn from_name(name: &str) -> Option<Self> {
        CATALOG
            .iter()
            .find(|spec| spec.name == name.trim())
            .map(|spec| spec.tool)
    }

    pub fn spec(self) -> &'static ToolSpec {
        &CATALOG[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn is_core(self) -> bool {
        CORE_TOOLS.contains(&self)
    }
}

impl ToolSpec {
    pub fn required_params(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().filter(|p| p.required).map(|p| p.name)
    }

    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in self.params {
            let mut prop = Map::new();
            prop.insert("type".to_string(), json!("STRING"));
            if let Some(description) = param.description {
                prop.insert("description".to_string(), json!(description));
            }
            properties.insert(param.name.to_string(), Value::Object(prop));
        }

        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("OBJECT"));
        schema.insert("properties".to_string(), Value::Object(properties));
        let required: Vec<&str> = self.required_params().collect();
        if !required.is_empty() {
            schema.insert("required".to_string(), json!(required));
        }
        Value::Object(schema)
    }
}

pub fn to_llm_tool_def(spec: &ToolSpec) -> kt_llm::ToolDefinition {
    kt_llm::ToolDefinition {
        name: spec.name.to_string(),
        description: spec.description.to_string(),
        parameters: spec.parameters_schema(),
    }
}

pub fn tool_definitions() -> Vec<kt_llm::ToolDefinition> {
    CATALOG.iter().map(to_llm_tool_def).collect()
}

pub fn core_tool_names() -> Vec<String> {
    CORE_TOOLS.iter().map(|t| t.name().to_string()).collect()
}

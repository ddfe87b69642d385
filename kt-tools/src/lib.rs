//! Task and notes tooling for the KarryTask assistant.
//!
//! The catalog is the single list of actions advertised to the model and
//! accepted by the dispatcher; the store is the task/notes collaborator every
//! action mutates.

mod catalog;
mod dispatch;
mod error;
mod sqlite_store;
mod store;

pub use catalog::{
    CATALOG, CORE_TOOLS, CatalogTool, ParamSpec, ToolSpec, core_tool_names, to_llm_tool_def,
    tool_definitions,
};
pub use dispatch::{ToolOutcome, ValidatedCall, execute, format_task_lines, validate};
pub use error::{Result, ToolError};
pub use sqlite_store::{STATE_KEY, SqliteSnapshot, SqliteStore};
pub use store::{InMemory, LocalStore, MemoryStore, Persistence, StoreSnapshot, Task, TaskId, TaskStore};

use crate::error::{Result, ToolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub type TaskId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    /// ISO-8601 text, kept as given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

/// Task/notes collaborator the resolver mutates. Lookups by title fragment
/// go through `find_by_title_substring`, which returns the first
/// case-insensitive substring hit in canonical (newest-first) order. Ambiguous
/// fragments resolve to that first hit; this is policy, not an accident.
pub trait TaskStore: Send + Sync {
    fn add_task(&self, title: &str, due_date: Option<&str>) -> Result<TaskId>;
    fn find_by_title_substring(&self, fragment: &str) -> Result<Option<Task>>;
    fn toggle_completion(&self, id: &str) -> Result<bool>;
    fn delete(&self, id: &str) -> Result<bool>;
    fn rename(&self, id: &str, new_title: &str) -> Result<bool>;
    fn set_due_date(&self, id: &str, due_date: &str) -> Result<bool>;
    fn clear_completed(&self) -> Result<usize>;
    fn append_note(&self, text: &str) -> Result<()>;
    fn read_notes(&self) -> Result<String>;
    fn list_tasks(&self) -> Result<Vec<Task>>;
}

/// The single serialized record: every task plus the notes blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub notes: String,
}

impl StoreSnapshot {
    fn add_task(&mut self, title: &str, due_date: Option<&str>) -> TaskId {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            completed: false,
            created_at: Utc::now(),
            due_date: due_date.map(str::to_string),
        };
        let id = task.id.clone();
        self.tasks.insert(0, task);
        id
    }

    fn find_by_title_substring(&self, fragment: &str) -> Option<&Task> {
        let needle = fragment.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.tasks
            .iter()
            .find(|t| t.title.to_lowercase().contains(&needle))
    }

    fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn clear_completed(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.completed);
        before - self.tasks.len()
    }

    fn append_note(&mut self, text: &str) {
        if !self.notes.is_empty() && !self.notes.ends_with('\n') {
            self.notes.push('\n');
        }
        self.notes.push_str(text);
    }
}

/// Where a `LocalStore` writes its snapshot after each mutation.
pub trait Persistence: Send + Sync {
    fn load(&self) -> Result<StoreSnapshot>;
    fn save(&self, snapshot: &StoreSnapshot) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemory;

impl Persistence for InMemory {
    fn load(&self) -> Result<StoreSnapshot> {
        Ok(StoreSnapshot::default())
    }

    fn save(&self, _snapshot: &StoreSnapshot) -> Result<()> {
        Ok(())
    }
}

pub struct LocalStore<P: Persistence> {
    state: Mutex<StoreSnapshot>,
    persistence: P,
}

pub type MemoryStore = LocalStore<InMemory>;

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreSnapshot::default()),
            persistence: InMemory,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Persistence> LocalStore<P> {
    pub fn with_persistence(persistence: P) -> Result<Self> {
        let snapshot = persistence.load()?;
        tracing::debug!(
            tasks = snapshot.tasks.len(),
            notes_len = snapshot.notes.len(),
            "store snapshot loaded"
        );
        Ok(Self {
            state: Mutex::new(snapshot),
            persistence,
        })
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreSnapshot>> {
        self.state
            .lock()
            .map_err(|_| ToolError::Storage("store state lock poisoned".to_string()))
    }

    /// Applies `f` to a copy and commits it only when `f` reports a change and
    /// the snapshot was persisted.
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreSnapshot) -> (T, bool)) -> Result<T> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let (out, changed) = f(&mut next);
        if changed {
            self.persistence.save(&next)?;
            *guard = next;
        }
        Ok(out)
    }
}

impl<P: Persistence> TaskStore for LocalStore<P> {
    fn add_task(&self, title: &str, due_date: Option<&str>) -> Result<TaskId> {
        self.mutate(|s| (s.add_task(title, due_date), true))
    }

    fn find_by_title_substring(&self, fragment: &str) -> Result<Option<Task>> {
        Ok(self.lock()?.find_by_title_substring(fragment).cloned())
    }

    fn toggle_completion(&self, id: &str) -> Result<bool> {
        self.mutate(|s| match s.task_mut(id) {
            Some(t) => {
                t.completed = !t.completed;
                (true, true)
            }
            None => (false, false),
        })
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.mutate(|s| {
            let before = s.tasks.len();
            s.tasks.retain(|t| t.id != id);
            let removed = s.tasks.len() != before;
            (removed, removed)
        })
    }

    fn rename(&self, id: &str, new_title: &str) -> Result<bool> {
        self.mutate(|s| match s.task_mut(id) {
            Some(t) => {
                t.title = new_title.to_string();
                (true, true)
            }
            None => (false, false),
        })
    }

    fn set_due_date(&self, id: &str, due_date: &str) -> Result<bool> {
        self.mutate(|s| match s.task_mut(id) {
            Some(t) => {
                t.due_date = Some(due_date.to_string());
                (true, true)
            }
            None => (false, false),
        })
    }

    fn clear_completed(&self) -> Result<usize> {
        self.mutate(|s| {
            let removed = s.clear_completed();
            (removed, removed > 0)
        })
    }

    fn append_note(&self, text: &str) -> Result<()> {
        self.mutate(|s| {
            s.append_note(text);
            ((), true)
        })
    }

    fn read_notes(&self) -> Result<String> {
        Ok(self.lock()?.notes.clone())
    }

    fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.lock()?.tasks.clone())
    }
}

use super::{ApiError, internal_error};
use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::{Local, NaiveDate};
use kt_tools::{Task, TaskStore};
use serde::Serialize;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/tasks", get(list_tasks))
        .route("/api/notes", get(get_notes))
        .route("/api/reports", get(get_reports))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Report {
    total: usize,
    completed: usize,
    completion_rate: u32,
    today_count: usize,
}

fn build_report(tasks: &[Task], today: NaiveDate) -> Report {
    let total = tasks.len();
    let completed = tasks.iter().filter(|t| t.completed).count();
    let completion_rate = if total == 0 {
        0
    } else {
        (completed as f64 * 100.0 / total as f64).round() as u32
    };
    let today_count = tasks
        .iter()
        .filter(|t| t.created_at.with_timezone(&Local).date_naive() == today)
        .count();
    Report {
        total,
        completed,
        completion_rate,
        today_count,
    }
}

/// Runs a store read on the blocking pool; the SQLite store does file I/O.
async fn read_store<T, F>(state: &AppState, read: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn TaskStore) -> kt_tools::Result<T> + Send + 'static,
{
    let store = Arc::clone(state.store());
    tokio::task::spawn_blocking(move || read(store.as_ref()))
        .await
        .map_err(internal_error)?
        .map_err(internal_error)
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_tasks(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tasks = read_store(&state, |store| store.list_tasks()).await?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_notes(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let notes = read_store(&state, |store| store.read_notes()).await?;
    Ok(Json(serde_json::json!({ "notes": notes })))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_reports(Extension(state): Extension<Arc<AppState>>) -> Result<Json<Report>, ApiError> {
    let tasks = read_store(&state, |store| store.list_tasks()).await?;
    Ok(Json(build_report(&tasks, Local::now().date_naive())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::CommandResolver;
    use chrono::{Duration, Utc};
    use kt_tools::MemoryStore;

    fn task(title: &str, completed: bool, age: Duration) -> Task {
        Task {
            id: title.to_string(),
            title: title.to_string(),
            completed,
            created_at: Utc::now() - age,
            due_date: None,
        }
    }

    #[test]
    fn empty_store_reports_zero_rate() {
        let report = build_report(&[], Local::now().date_naive());
        assert_eq!(
            report,
            Report {
                total: 0,
                completed: 0,
                completion_rate: 0,
                today_count: 0,
            }
        );
    }

    #[test]
    fn report_rounds_rate_and_counts_today() {
        let tasks = vec![
            task("a", true, Duration::zero()),
            task("b", false, Duration::zero()),
            task("c", false, Duration::days(3)),
        ];
        let report = build_report(&tasks, Local::now().date_naive());
        assert_eq!(report.total, 3);
        assert_eq!(report.completed, 1);
        assert_eq!(report.completion_rate, 33);
        assert_eq!(report.today_count, 2);
    }

    #[tokio::test]
    async fn handlers_read_through_the_shared_store() {
        let store = Arc::new(MemoryStore::new());
        store.add_task("Buy milk", None).expect("add");
        store.append_note("gate code 4411").expect("note");
        let resolver = Arc::new(CommandResolver::new(None, store, 6));
        let state = Arc::new(AppState::new(resolver));

        let Json(tasks) = list_tasks(Extension(state.clone())).await.expect("tasks");
        assert_eq!(tasks["tasks"][0]["title"], "Buy milk");

        let Json(notes) = get_notes(Extension(state.clone())).await.expect("notes");
        assert!(notes["notes"].as_str().expect("notes text").contains("gate code 4411"));

        let Json(report) = get_reports(Extension(state)).await.expect("report");
        assert_eq!(report.total, 1);
        assert_eq!(report.today_count, 1);
    }
}

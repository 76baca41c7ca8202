use crate::domain::models::{DayOfWeek, NewTask, Task, TaskCategory, TaskPatch};
use crate::infrastructure::document_store::{
    BatchWrite, Direction, DocumentStore, Fields, Query, encode_fields,
};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;

pub const TASKS_COLLECTION: &str = "todos";

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct TaskService<S>
where
    S: DocumentStore + ?Sized,
{
    store: Arc<S>,
    now_provider: NowProvider,
}

impl<S> TaskService<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn create_task(&self, user_id: &str, new_task: NewTask) -> Result<Task, InfraError> {
        let now = (self.now_provider)();
        let mut task = Task {
            id: String::new(),
            user_id: user_id.to_string(),
            text: new_task.text.trim().to_string(),
            status: new_task.status,
            category: new_task.category,
            day_of_week: new_task.day_of_week,
            created_at: now,
            updated_at: now,
        };
        task.validate().map_err(InfraError::InvalidInput)?;

        let created = self
            .store
            .create(TASKS_COLLECTION, encode_fields(&task)?)
            .await?;
        task.id = created.id;
        Ok(task)
    }

    /// Newest first.
    pub async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>, InfraError> {
        let query = Query::collection(TASKS_COLLECTION)
            .where_eq("userId", user_id)
            .order_by("createdAt", Direction::Descending);
        self.store
            .run_query(&query)
            .await?
            .iter()
            .map(|document| document.decode())
            .collect()
    }

    pub async fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<(), InfraError> {
        require_id(task_id)?;
        if patch.is_empty() {
            return Err(InfraError::InvalidInput("task update has no changes".to_string()));
        }

        let mut fields = Fields::new();
        if let Some(text) = patch.text {
            let text = text.trim();
            if text.is_empty() {
                return Err(InfraError::InvalidInput("task.text must not be empty".to_string()));
            }
            fields.insert("text".to_string(), json!(text));
        }
        if let Some(status) = patch.status {
            fields.insert("status".to_string(), json!(status));
        }
        if let Some(category) = patch.category {
            fields.insert("category".to_string(), json!(category));
        }
        if let Some(day_of_week) = patch.day_of_week {
            fields.insert("dayOfWeek".to_string(), json!(day_of_week));
        }
        fields.insert("updatedAt".to_string(), self.now_millis());

        self.store.update(TASKS_COLLECTION, task_id, fields).await
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), InfraError> {
        require_id(task_id)?;
        self.store.delete(TASKS_COLLECTION, task_id).await
    }

    pub async fn delete_tasks(&self, task_ids: &[String]) -> Result<(), InfraError> {
        if task_ids.is_empty() {
            return Ok(());
        }
        for task_id in task_ids {
            require_id(task_id)?;
        }
        let writes = task_ids
            .iter()
            .map(|task_id| BatchWrite::delete(TASKS_COLLECTION, task_id))
            .collect();
        self.store.commit(writes).await
    }

    /// Moves every unfinished "today" task planned for `from_day` to the following
    /// weekday in a single atomic commit. Returns how many tasks moved.
    pub async fn transfer_pending_tasks(
        &self,
        user_id: &str,
        from_day: u8,
    ) -> Result<usize, InfraError> {
        let from_day = DayOfWeek::new(from_day).map_err(InfraError::InvalidInput)?;
        let next_day = from_day.next();

        let query = Query::collection(TASKS_COLLECTION)
            .where_eq("userId", user_id)
            .where_eq("dayOfWeek", from_day.index())
            .where_eq("category", TaskCategory::Today.as_str());
        let documents = self.store.run_query(&query).await?;

        let updated_at = self.now_millis();
        let mut writes = Vec::new();
        for document in &documents {
            let task: Task = document.decode()?;
            if !task.is_pending() {
                continue;
            }
            let mut fields = Fields::new();
            fields.insert("dayOfWeek".to_string(), json!(next_day.index()));
            fields.insert("updatedAt".to_string(), updated_at.clone());
            writes.push(BatchWrite::update(TASKS_COLLECTION, &document.id, fields));
        }

        if writes.is_empty() {
            return Ok(0);
        }
        let moved = writes.len();
        self.store.commit(writes).await?;
        Ok(moved)
    }

    fn now_millis(&self) -> Value {
        json!((self.now_provider)().timestamp_millis())
    }
}

fn require_id(task_id: &str) -> Result<(), InfraError> {
    if task_id.trim().is_empty() {
        return Err(InfraError::InvalidInput("task_id must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskStatus;
    use crate::infrastructure::document_store::{Document, InMemoryDocumentStore};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Delegates to the in-memory store and counts (or fails) batch commits.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryDocumentStore,
        commit_calls: AtomicUsize,
        fail_commits: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for CountingStore {
        async fn run_query(&self, query: &Query) -> Result<Vec<Document>, InfraError> {
            self.inner.run_query(query).await
        }

        async fn create(&self, collection: &str, fields: Fields) -> Result<Document, InfraError> {
            self.inner.create(collection, fields).await
        }

        async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), InfraError> {
            self.inner.update(collection, id, fields).await
        }

        async fn delete(&self, collection: &str, id: &str) -> Result<(), InfraError> {
            self.inner.delete(collection, id).await
        }

        async fn commit(&self, writes: Vec<BatchWrite>) -> Result<(), InfraError> {
            self.commit_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(InfraError::Store("commit rejected".to_string()));
            }
            self.inner.commit(writes).await
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 30, 9, 0, 0).unwrap()
    }

    fn service(store: &Arc<CountingStore>) -> TaskService<CountingStore> {
        TaskService::new(Arc::clone(store)).with_now_provider(Arc::new(fixed_now))
    }

    fn seed(
        store: &CountingStore,
        id: &str,
        user_id: &str,
        status: TaskStatus,
        category: TaskCategory,
        day: Option<u8>,
    ) {
        let created = Utc.with_ymd_and_hms(2025, 1, 27, 8, 0, 0).unwrap();
        let task = Task {
            id: id.to_string(),
            user_id: user_id.to_string(),
            text: format!("task {id}"),
            status,
            category,
            day_of_week: day.map(|index| DayOfWeek::new(index).unwrap()),
            created_at: created,
            updated_at: created,
        };
        store
            .inner
            .insert(
                TASKS_COLLECTION,
                Document::new(id, encode_fields(&task).expect("encode task")),
            )
            .expect("seed task");
    }

    fn stored(store: &CountingStore, id: &str) -> Task {
        store
            .inner
            .get(TASKS_COLLECTION, id)
            .expect("read task")
            .expect("task exists")
            .decode()
            .expect("decode task")
    }

    #[tokio::test]
    async fn rollover_moves_only_pending_today_tasks() {
        let store = Arc::new(CountingStore::default());
        seed(&store, "waiting", "u1", TaskStatus::Waiting, TaskCategory::Today, Some(2));
        seed(&store, "progress", "u1", TaskStatus::InProgress, TaskCategory::Today, Some(2));
        seed(&store, "done", "u1", TaskStatus::Completed, TaskCategory::Today, Some(2));
        seed(&store, "cancel", "u1", TaskStatus::Cancelled, TaskCategory::Today, Some(2));
        seed(&store, "next-lane", "u1", TaskStatus::Waiting, TaskCategory::Next, Some(2));
        seed(&store, "no-day", "u1", TaskStatus::Waiting, TaskCategory::Today, None);
        seed(&store, "other-user", "u2", TaskStatus::Waiting, TaskCategory::Today, Some(2));

        let moved = service(&store)
            .transfer_pending_tasks("u1", 2)
            .await
            .expect("rollover");

        assert_eq!(moved, 2);
        assert_eq!(store.commit_calls.load(Ordering::SeqCst), 1);
        for id in ["waiting", "progress"] {
            let task = stored(&store, id);
            assert_eq!(task.day_of_week, Some(DayOfWeek::new(3).unwrap()));
            assert_eq!(task.updated_at, fixed_now());
        }
        for id in ["done", "cancel", "next-lane", "other-user"] {
            let task = stored(&store, id);
            assert_eq!(task.day_of_week, Some(DayOfWeek::new(2).unwrap()));
            assert_ne!(task.updated_at, fixed_now());
        }
        assert_eq!(stored(&store, "no-day").day_of_week, None);
    }

    #[tokio::test]
    async fn saturday_rolls_over_to_sunday() {
        let store = Arc::new(CountingStore::default());
        seed(&store, "sat", "u1", TaskStatus::Delegated, TaskCategory::Today, Some(6));

        let moved = service(&store).transfer_pending_tasks("u1", 6).await.expect("rollover");

        assert_eq!(moved, 1);
        assert_eq!(stored(&store, "sat").day_of_week, Some(DayOfWeek::SUNDAY));
    }

    #[tokio::test]
    async fn nothing_pending_means_no_commit() {
        let store = Arc::new(CountingStore::default());
        seed(&store, "done", "u1", TaskStatus::Completed, TaskCategory::Today, Some(1));

        let service = service(&store);
        assert_eq!(service.transfer_pending_tasks("u1", 1).await.expect("settled only"), 0);
        assert_eq!(service.transfer_pending_tasks("u1", 4).await.expect("empty day"), 0);
        assert_eq!(store.commit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_commit_leaves_tasks_where_they_were() {
        let store = Arc::new(CountingStore::default());
        seed(&store, "a", "u1", TaskStatus::Waiting, TaskCategory::Today, Some(0));
        seed(&store, "b", "u1", TaskStatus::Appointment, TaskCategory::Today, Some(0));
        store.fail_commits.store(true, Ordering::SeqCst);

        let result = service(&store).transfer_pending_tasks("u1", 0).await;

        assert!(matches!(result, Err(InfraError::Store(_))));
        assert_eq!(stored(&store, "a").day_of_week, Some(DayOfWeek::SUNDAY));
        assert_eq!(stored(&store, "b").day_of_week, Some(DayOfWeek::SUNDAY));
    }

    #[tokio::test]
    async fn out_of_range_weekday_is_rejected_before_querying() {
        let store = Arc::new(CountingStore::default());
        let result = service(&store).transfer_pending_tasks("u1", 7).await;
        assert!(matches!(result, Err(InfraError::InvalidInput(_))));
        assert_eq!(store.commit_calls.load(Ordering::SeqCst), 0);
    }

    proptest! {
        #[test]
        fn rollover_targets_following_weekday(day in 0u8..7, pending in 1usize..5) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = Arc::new(CountingStore::default());
                for index in 0..pending {
                    seed(&store, &format!("t{index}"), "u1", TaskStatus::Waiting, TaskCategory::Today, Some(day));
                }

                let moved = service(&store).transfer_pending_tasks("u1", day).await.expect("rollover");

                assert_eq!(moved, pending);
                for index in 0..pending {
                    let task = stored(&store, &format!("t{index}"));
                    assert_eq!(task.day_of_week.map(DayOfWeek::index), Some((day + 1) % 7));
                }
            });
        }

        #[test]
        fn rollover_leaves_settled_and_other_lanes_alone(
            source in 0u8..7,
            tasks in prop::collection::vec((0usize..6, 0usize..3, prop::option::of(0u8..7)), 1..12),
        ) {
            let categories = [TaskCategory::Today, TaskCategory::Next, TaskCategory::SomeDay];
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = Arc::new(CountingStore::default());
                for (index, (status, category, day)) in tasks.iter().enumerate() {
                    seed(&store, &format!("t{index}"), "u1", TaskStatus::ALL[*status], categories[*category], *day);
                }

                let moved = service(&store).transfer_pending_tasks("u1", source).await.expect("rollover");

                let mut expected_moved = 0;
                for (index, (status, category, day)) in tasks.iter().enumerate() {
                    let task = stored(&store, &format!("t{index}"));
                    let eligible = categories[*category] == TaskCategory::Today
                        && *day == Some(source)
                        && !TaskStatus::ALL[*status].is_settled();
                    if eligible {
                        expected_moved += 1;
                        assert_eq!(task.day_of_week.map(DayOfWeek::index), Some((source + 1) % 7));
                        assert_eq!(task.updated_at, fixed_now());
                    } else {
                        assert_eq!(task.day_of_week.map(DayOfWeek::index), *day);
                        assert_eq!(task.updated_at, task.created_at);
                        assert_eq!(task.status, TaskStatus::ALL[*status]);
                    }
                }
                assert_eq!(moved, expected_moved);
                let expected_commits = usize::from(expected_moved > 0);
                assert_eq!(store.commit_calls.load(Ordering::SeqCst), expected_commits);
            });
        }
    }

    #[tokio::test]
    async fn crud_flow_keeps_newest_first() {
        let store = Arc::new(CountingStore::default());
        let service = service(&store);

        let first = service
            .create_task("u1", NewTask::today("Write report", DayOfWeek::new(4).unwrap()))
            .await
            .expect("create first");
        let second = TaskService::new(Arc::clone(&store))
            .with_now_provider(Arc::new(|| Utc.with_ymd_and_hms(2025, 1, 30, 10, 0, 0).unwrap()))
            .create_task("u1", NewTask::today("Call bank", DayOfWeek::new(4).unwrap()))
            .await
            .expect("create second");

        let listed = service.list_tasks("u1").await.expect("list");
        let ids: Vec<_> = listed.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);

        service
            .update_task(
                &first.id,
                TaskPatch {
                    status: Some(TaskStatus::Completed),
                    day_of_week: Some(None),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect("update");
        let updated = stored(&store, &first.id);
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(updated.day_of_week, None);

        service
            .delete_tasks(&[first.id.clone(), second.id.clone()])
            .await
            .expect("batch delete");
        assert!(service.list_tasks("u1").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn blank_text_is_rejected() {
        let store = Arc::new(CountingStore::default());
        let result = service(&store)
            .create_task("u1", NewTask::today("   ", DayOfWeek::SUNDAY))
            .await;
        assert!(matches!(result, Err(InfraError::InvalidInput(_))));
    }
}

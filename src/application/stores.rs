use crate::application::journal::{DEFAULT_JOURNAL_TEMPLATE, JournalService};
use crate::application::session::SessionProvider;
use crate::application::settings::{SettingsService, effective_template};
use crate::application::snapshot::{Snapshot, SnapshotSource, Subscription};
use crate::application::tasks::TaskService;
use crate::domain::models::{
    DayOfWeek, JournalEntry, NewJournalEntry, NewTask, Task, TaskCategory, TaskPatch, UserSettings,
    week_start,
};
use crate::infrastructure::document_store::DocumentStore;
use crate::infrastructure::error::InfraError;
use chrono::{Duration, NaiveDate};
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Publishes a loading snapshot, awaits `fetch`, then publishes its outcome.
async fn track<T, Fut>(source: &SnapshotSource<T>, fetch: Fut) -> Result<(), InfraError>
where
    T: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, InfraError>>,
{
    source.publish(|snapshot| {
        snapshot.loading = true;
        snapshot.error = None;
    });
    match fetch.await {
        Ok(value) => {
            source.publish(|snapshot| {
                snapshot.value = value;
                snapshot.loading = false;
            });
            Ok(())
        }
        Err(error) => {
            let message = error.to_string();
            source.publish(|snapshot| {
                snapshot.loading = false;
                snapshot.error = Some(message);
            });
            Err(error)
        }
    }
}

pub struct TaskStore<S>
where
    S: DocumentStore + ?Sized,
{
    service: TaskService<S>,
    session: Arc<dyn SessionProvider>,
    source: SnapshotSource<Vec<Task>>,
}

impl<S> TaskStore<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(service: TaskService<S>, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            service,
            session,
            source: SnapshotSource::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription<Vec<Task>> {
        self.source.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot<Vec<Task>> {
        self.source.current()
    }

    /// No-op while nobody is signed in.
    pub async fn refresh(&self) -> Result<(), InfraError> {
        let Some(user) = self.session.current_user() else {
            return Ok(());
        };
        track(&self.source, self.service.list_tasks(&user.uid)).await
    }

    pub fn all(&self) -> Vec<Task> {
        self.source.current().value
    }

    pub fn today(&self) -> Vec<Task> {
        self.in_category(TaskCategory::Today)
    }

    pub fn next(&self) -> Vec<Task> {
        self.in_category(TaskCategory::Next)
    }

    pub fn someday(&self) -> Vec<Task> {
        self.in_category(TaskCategory::SomeDay)
    }

    pub fn for_day(&self, day: DayOfWeek) -> Vec<Task> {
        self.all()
            .into_iter()
            .filter(|task| task.scheduled_day() == Some(day))
            .collect()
    }

    /// Tasks for `day` that were created during the Sunday-started week containing
    /// `reference`, with creation dates taken in `timezone`.
    pub fn for_day_in_week(
        &self,
        day: DayOfWeek,
        reference: NaiveDate,
        timezone: chrono_tz::Tz,
    ) -> Vec<Task> {
        let first = week_start(reference);
        let last = first + Duration::days(6);
        self.for_day(day)
            .into_iter()
            .filter(|task| {
                let created = task.created_at.with_timezone(&timezone).date_naive();
                created >= first && created <= last
            })
            .collect()
    }

    pub async fn create(&self, new_task: NewTask) -> Result<Task, InfraError> {
        let user = self.session.require_user()?;
        let task = self.service.create_task(&user.uid, new_task).await?;
        self.refresh().await?;
        Ok(task)
    }

    pub async fn update(&self, task_id: &str, patch: TaskPatch) -> Result<(), InfraError> {
        self.session.require_user()?;
        self.service.update_task(task_id, patch).await?;
        self.refresh().await
    }

    pub async fn delete(&self, task_id: &str) -> Result<(), InfraError> {
        self.session.require_user()?;
        self.service.delete_task(task_id).await?;
        self.refresh().await
    }

    pub async fn delete_many(&self, task_ids: &[String]) -> Result<(), InfraError> {
        self.session.require_user()?;
        self.service.delete_tasks(task_ids).await?;
        self.refresh().await
    }

    pub async fn transfer_pending_tasks(&self, from_day: u8) -> Result<usize, InfraError> {
        let user = self.session.require_user()?;
        let moved = self.service.transfer_pending_tasks(&user.uid, from_day).await?;
        if moved > 0 {
            self.refresh().await?;
        }
        Ok(moved)
    }

    fn in_category(&self, category: TaskCategory) -> Vec<Task> {
        self.all()
            .into_iter()
            .filter(|task| task.category == category)
            .collect()
    }
}

pub struct JournalStore<S>
where
    S: DocumentStore + ?Sized,
{
    service: JournalService<S>,
    session: Arc<dyn SessionProvider>,
    source: SnapshotSource<Vec<JournalEntry>>,
    template: RwLock<String>,
}

impl<S> JournalStore<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(service: JournalService<S>, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            service,
            session,
            source: SnapshotSource::new(Vec::new()),
            template: RwLock::new(DEFAULT_JOURNAL_TEMPLATE.to_string()),
        }
    }

    pub fn subscribe(&self) -> Subscription<Vec<JournalEntry>> {
        self.source.subscribe()
    }

    pub async fn refresh(&self) -> Result<(), InfraError> {
        let Some(user) = self.session.current_user() else {
            return Ok(());
        };
        track(&self.source, self.service.list_entries(&user.uid)).await
    }

    /// Newest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        let mut entries = self.source.current().value;
        entries.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        entries
    }

    pub fn template(&self) -> String {
        self.template
            .read()
            .map(|template| template.clone())
            .unwrap_or_else(|_| DEFAULT_JOURNAL_TEMPLATE.to_string())
    }

    pub fn set_template(&self, template: impl Into<String>) -> Result<(), InfraError> {
        let mut guard = self
            .template
            .write()
            .map_err(|error| InfraError::Store(format!("template lock poisoned: {error}")))?;
        *guard = template.into();
        Ok(())
    }

    pub async fn create(&self, entry: NewJournalEntry) -> Result<JournalEntry, InfraError> {
        let user = self.session.require_user()?;
        if entry.user_id != user.uid {
            return Err(InfraError::InvalidInput(
                "journal entry belongs to another user".to_string(),
            ));
        }
        let created = self.service.create_entry(entry).await?;
        let cached = created.clone();
        self.source
            .publish(|snapshot| snapshot.value.insert(0, cached));
        Ok(created)
    }

    pub async fn delete(&self, entry_id: &str) -> Result<(), InfraError> {
        self.session.require_user()?;
        self.service.delete_entry(entry_id).await?;
        self.source
            .publish(|snapshot| snapshot.value.retain(|entry| entry.id != entry_id));
        Ok(())
    }

    pub async fn delete_many(&self, entry_ids: &[String]) -> Result<(), InfraError> {
        self.session.require_user()?;
        self.service.delete_entries(entry_ids).await?;
        self.source
            .publish(|snapshot| snapshot.value.retain(|entry| !entry_ids.contains(&entry.id)));
        Ok(())
    }
}

pub struct SettingsStore<S>
where
    S: DocumentStore + ?Sized,
{
    service: SettingsService<S>,
    session: Arc<dyn SessionProvider>,
    source: SnapshotSource<Option<UserSettings>>,
}

impl<S> SettingsStore<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(service: SettingsService<S>, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            service,
            session,
            source: SnapshotSource::new(None),
        }
    }

    pub fn subscribe(&self) -> Subscription<Option<UserSettings>> {
        self.source.subscribe()
    }

    pub async fn refresh(&self) -> Result<(), InfraError> {
        let Some(user) = self.session.current_user() else {
            return Ok(());
        };
        track(&self.source, self.service.get_settings(&user.uid)).await
    }

    pub fn settings(&self) -> Option<UserSettings> {
        self.source.current().value
    }

    /// Empty when no key has been saved.
    pub fn api_key(&self) -> String {
        self.settings()
            .and_then(|settings| settings.api_key().map(ToOwned::to_owned))
            .unwrap_or_default()
    }

    pub fn daily_template(&self) -> String {
        effective_template(self.settings().as_ref())
    }

    pub async fn update_api_key(&self, api_key: &str) -> Result<UserSettings, InfraError> {
        let user = self.session.require_user()?;
        let saved = self.service.update_api_key(&user.uid, api_key).await?;
        self.cache(saved.clone());
        Ok(saved)
    }

    pub async fn update_daily_template(&self, template: &str) -> Result<UserSettings, InfraError> {
        let user = self.session.require_user()?;
        let saved = self.service.update_daily_template(&user.uid, template).await?;
        self.cache(saved.clone());
        Ok(saved)
    }

    fn cache(&self, settings: UserSettings) {
        self.source.publish(|snapshot| {
            snapshot.value = Some(settings);
            snapshot.error = None;
        });
    }
}

use crate::domain::models::{
    DayOfWeek, JournalEntry, JournalTemplate, NewJournalEntry, Task, TaskCategory, TaskStatus,
};
use crate::infrastructure::document_store::{
    BatchWrite, Direction, DocumentStore, Fields, Query, encode_fields,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::gemini_client::{GenerationClient, GenerationRequest};
use chrono::{DateTime, Locale, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::{Value, json};
use std::sync::Arc;

pub const JOURNALS_COLLECTION: &str = "dailies";
pub const TEMPLATES_COLLECTION: &str = "daily_templates";
pub const DATE_PLACEHOLDER: &str = "{{fecha}}";
pub const TASKS_PLACEHOLDER: &str = "{{tareas}}";

pub const DEFAULT_JOURNAL_TEMPLATE: &str = "# Registro Diario — {{fecha}}\n\n\
## Objetivo\n- \n\n\
## Progreso\n- \n\n\
## Tareas\n- [ ] \n- [ ] \n- [ ] \n\n\
## Bloqueos\n- \n\n\
## Próximos Pasos\n- \n\n\
## Notas\n- ";

const INVALID_RESPONSE_MESSAGE: &str =
    "Invalid journal response: expected non-empty title and templateContent";

/// Long date form used for the `{{fecha}}` placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateLocale {
    #[default]
    Spanish,
    English,
}

impl DateLocale {
    pub fn parse(tag: &str) -> Result<Self, InfraError> {
        let normalized = tag.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "es" | "es-es" => Ok(Self::Spanish),
            "en" | "en-us" => Ok(Self::English),
            _ => Err(InfraError::InvalidConfig(format!(
                "unsupported locale '{tag}' (expected es-ES or en-US)"
            ))),
        }
    }

    /// "jueves, 30 de enero de 2025" / "Thursday, January 30, 2025"
    pub fn format(self, date: NaiveDate) -> String {
        let midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        match self {
            Self::Spanish => midnight
                .format_localized("%A, %-d de %B de %Y", Locale::es_ES)
                .to_string(),
            Self::English => midnight
                .format_localized("%A, %B %-d, %Y", Locale::en_US)
                .to_string(),
        }
    }
}

pub fn format_tasks_checklist(tasks: &[Task]) -> String {
    tasks
        .iter()
        .map(|task| format!("- [ ] {}", task.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fills the first `{{fecha}}` and the first `{{tareas}}` of `template`.
pub fn build_prompt(template: &str, tasks: &[Task], date: NaiveDate, locale: DateLocale) -> String {
    let prompt = template.replacen(DATE_PLACEHOLDER, &locale.format(date), 1);
    if prompt.contains(TASKS_PLACEHOLDER) {
        prompt.replacen(TASKS_PLACEHOLDER, &format_tasks_checklist(tasks), 1)
    } else {
        prompt
    }
}

pub fn journal_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": {
                "type": "STRING",
                "description": "Short descriptive title for the journal entry"
            },
            "templateContent": {
                "type": "STRING",
                "description": "The template filled in, as markdown"
            }
        },
        "required": ["title", "templateContent"]
    })
}

/// Today-lane tasks planned for `day`, in the order given. Cancelled tasks are
/// never listed; unfinished ones only when `include_incomplete` is set.
pub fn select_journal_tasks(tasks: &[Task], day: DayOfWeek, include_incomplete: bool) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| task.category == TaskCategory::Today && task.day_of_week == Some(day))
        .filter(|task| task.status != TaskStatus::Cancelled)
        .filter(|task| include_incomplete || task.status == TaskStatus::Completed)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedJournal {
    pub title: String,
    pub body: String,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGeneratedJournal {
    title: Option<String>,
    template_content: Option<String>,
}

impl GeneratedJournal {
    pub fn decode(raw: &str) -> Result<Self, InfraError> {
        let parsed: RawGeneratedJournal = serde_json::from_str(raw)
            .map_err(|_| InfraError::Generation(INVALID_RESPONSE_MESSAGE.to_string()))?;
        let title = parsed.title.filter(|value| !value.trim().is_empty());
        let body = parsed.template_content.filter(|value| !value.trim().is_empty());
        match (title, body) {
            (Some(title), Some(body)) => Ok(Self { title, body }),
            _ => Err(InfraError::Generation(INVALID_RESPONSE_MESSAGE.to_string())),
        }
    }
}

pub struct JournalGenerator<C>
where
    C: GenerationClient + ?Sized,
{
    client: Arc<C>,
    api_key: Option<String>,
    locale: DateLocale,
}

impl<C> JournalGenerator<C>
where
    C: GenerationClient + ?Sized,
{
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            api_key: None,
            locale: DateLocale::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.set_api_key(api_key);
        self
    }

    pub fn with_locale(mut self, locale: DateLocale) -> Self {
        self.locale = locale;
        self
    }

    pub fn set_api_key(&mut self, api_key: impl Into<String>) {
        let api_key = api_key.into();
        self.api_key = if api_key.trim().is_empty() {
            None
        } else {
            Some(api_key.trim().to_string())
        };
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn generate(
        &self,
        template: &str,
        tasks: &[Task],
        date: NaiveDate,
    ) -> Result<GeneratedJournal, InfraError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(InfraError::MissingApiKey);
        };

        let request = GenerationRequest {
            prompt: build_prompt(template, tasks, date, self.locale),
            response_schema: journal_response_schema(),
        };
        let raw = self.client.generate_content(api_key, &request).await?;
        GeneratedJournal::decode(&raw)
    }

    pub async fn generate_body(
        &self,
        template: &str,
        tasks: &[Task],
        date: NaiveDate,
    ) -> Result<String, InfraError> {
        Ok(self.generate(template, tasks, date).await?.body)
    }
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Journal entries and the user's saved templates.
pub struct JournalService<S>
where
    S: DocumentStore + ?Sized,
{
    store: Arc<S>,
    now_provider: NowProvider,
}

impl<S> JournalService<S>
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

    pub async fn create_entry(&self, entry: NewJournalEntry) -> Result<JournalEntry, InfraError> {
        let now = (self.now_provider)();
        let mut created = JournalEntry {
            id: String::new(),
            user_id: entry.user_id,
            title: entry.title,
            content: entry.content,
            template: entry.template,
            include_incomplete: entry.include_incomplete,
            tasks_included: entry.tasks_included,
            created_at: now,
            generated_at: now,
        };
        created.validate().map_err(InfraError::InvalidInput)?;

        let document = self
            .store
            .create(JOURNALS_COLLECTION, encode_fields(&created)?)
            .await?;
        created.id = document.id;
        Ok(created)
    }

    /// Stores a generation result: generated title, body as content.
    pub async fn record_generated(
        &self,
        user_id: &str,
        template: &str,
        tasks: &[Task],
        include_incomplete: bool,
        generated: GeneratedJournal,
    ) -> Result<JournalEntry, InfraError> {
        self.create_entry(NewJournalEntry {
            user_id: user_id.to_string(),
            title: generated.title,
            content: generated.body,
            template: template.to_string(),
            include_incomplete,
            tasks_included: tasks.iter().map(|task| task.id.clone()).collect(),
        })
        .await
    }

    pub async fn list_entries(&self, user_id: &str) -> Result<Vec<JournalEntry>, InfraError> {
        let query = Query::collection(JOURNALS_COLLECTION)
            .where_eq("userId", user_id)
            .order_by("createdAt", Direction::Descending);
        self.store
            .run_query(&query)
            .await?
            .iter()
            .map(|document| document.decode())
            .collect()
    }

    pub async fn delete_entry(&self, entry_id: &str) -> Result<(), InfraError> {
        if entry_id.trim().is_empty() {
            return Err(InfraError::InvalidInput("journal id must not be empty".to_string()));
        }
        self.store.delete(JOURNALS_COLLECTION, entry_id).await
    }

    pub async fn delete_entries(&self, entry_ids: &[String]) -> Result<(), InfraError> {
        if entry_ids.is_empty() {
            return Ok(());
        }
        let writes = entry_ids
            .iter()
            .map(|id| BatchWrite::delete(JOURNALS_COLLECTION, id))
            .collect();
        self.store.commit(writes).await
    }

    pub async fn list_templates(&self, user_id: &str) -> Result<Vec<JournalTemplate>, InfraError> {
        let query = Query::collection(TEMPLATES_COLLECTION)
            .where_eq("userId", user_id)
            .order_by("createdAt", Direction::Descending);
        self.store
            .run_query(&query)
            .await?
            .iter()
            .map(|document| document.decode())
            .collect()
    }

    pub async fn default_template(
        &self,
        user_id: &str,
    ) -> Result<Option<JournalTemplate>, InfraError> {
        Ok(self
            .list_templates(user_id)
            .await?
            .into_iter()
            .find(|template| template.is_default))
    }

    /// A new default replaces the text of the existing default in place.
    pub async fn save_template(
        &self,
        user_id: &str,
        template: &str,
        is_default: bool,
    ) -> Result<JournalTemplate, InfraError> {
        if template.trim().is_empty() {
            return Err(InfraError::InvalidInput("template must not be empty".to_string()));
        }
        let now = (self.now_provider)();

        if is_default {
            if let Some(mut existing) = self.default_template(user_id).await? {
                let mut fields = Fields::new();
                fields.insert("template".to_string(), json!(template));
                fields.insert("updatedAt".to_string(), json!(now.timestamp_millis()));
                self.store
                    .update(TEMPLATES_COLLECTION, &existing.id, fields)
                    .await?;
                existing.template = template.to_string();
                existing.updated_at = now;
                return Ok(existing);
            }
        }

        let mut created = JournalTemplate {
            id: String::new(),
            user_id: user_id.to_string(),
            template: template.to_string(),
            is_default,
            created_at: now,
            updated_at: now,
        };
        let document = self
            .store
            .create(TEMPLATES_COLLECTION, encode_fields(&created)?)
            .await?;
        created.id = document.id;
        Ok(created)
    }
}

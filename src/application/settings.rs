use crate::application::journal::DEFAULT_JOURNAL_TEMPLATE;
use crate::domain::models::{SettingsPatch, UserSettings};
use crate::infrastructure::document_store::{DocumentStore, Fields, Query, encode_fields};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

pub const SETTINGS_COLLECTION: &str = "settings";

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// One settings document per user, created on first save.
pub struct SettingsService<S>
where
    S: DocumentStore + ?Sized,
{
    store: Arc<S>,
    now_provider: NowProvider,
}

impl<S> SettingsService<S>
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

    pub async fn get_settings(&self, user_id: &str) -> Result<Option<UserSettings>, InfraError> {
        let query = Query::collection(SETTINGS_COLLECTION).where_eq("userId", user_id);
        self.store
            .run_query(&query)
            .await?
            .first()
            .map(|document| document.decode())
            .transpose()
    }

    pub async fn save_settings(
        &self,
        user_id: &str,
        patch: SettingsPatch,
    ) -> Result<UserSettings, InfraError> {
        let now = (self.now_provider)();

        match self.get_settings(user_id).await? {
            Some(mut existing) => {
                let mut fields = Fields::new();
                if let Some(api_key) = patch.gemini_api_key {
                    fields.insert("geminiApiKey".to_string(), json!(api_key));
                    existing.gemini_api_key = api_key;
                }
                if let Some(template) = patch.daily_template {
                    fields.insert("dailyTemplate".to_string(), json!(template));
                    existing.daily_template = Some(template);
                }
                fields.insert("updatedAt".to_string(), json!(now.timestamp_millis()));
                existing.updated_at = now;

                self.store
                    .update(SETTINGS_COLLECTION, &existing.id, fields)
                    .await?;
                Ok(existing)
            }
            None => {
                let mut created = UserSettings {
                    id: String::new(),
                    user_id: user_id.to_string(),
                    gemini_api_key: patch.gemini_api_key.unwrap_or_default(),
                    daily_template: patch.daily_template,
                    created_at: now,
                    updated_at: now,
                };
                let document = self
                    .store
                    .create(SETTINGS_COLLECTION, encode_fields(&created)?)
                    .await?;
                created.id = document.id;
                Ok(created)
            }
        }
    }

    pub async fn update_api_key(
        &self,
        user_id: &str,
        api_key: &str,
    ) -> Result<UserSettings, InfraError> {
        self.save_settings(
            user_id,
            SettingsPatch {
                gemini_api_key: Some(api_key.trim().to_string()),
                ..SettingsPatch::default()
            },
        )
        .await
    }

    pub async fn update_daily_template(
        &self,
        user_id: &str,
        template: &str,
    ) -> Result<UserSettings, InfraError> {
        if template.trim().is_empty() {
            return Err(InfraError::InvalidInput("template must not be empty".to_string()));
        }
        self.save_settings(
            user_id,
            SettingsPatch {
                daily_template: Some(template.to_string()),
                ..SettingsPatch::default()
            },
        )
        .await
    }

    pub async fn effective_template(&self, user_id: &str) -> Result<String, InfraError> {
        Ok(effective_template(self.get_settings(user_id).await?.as_ref()))
    }
}

pub fn effective_template(settings: Option<&UserSettings>) -> String {
    settings
        .and_then(|settings| settings.daily_template.as_deref())
        .filter(|template| !template.trim().is_empty())
        .unwrap_or(DEFAULT_JOURNAL_TEMPLATE)
        .to_string()
}

use crate::application::auth::{AuthManager, DynAuthManager, EnsureSessionResult};
use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::journal::{
    DateLocale, JournalGenerator, JournalService, select_journal_tasks,
};
use crate::application::navigation::{NavigationDecision, Router};
use crate::application::session::{FixedSession, SessionProvider};
use crate::application::settings::SettingsService;
use crate::application::stores::{JournalStore, SettingsStore, TaskStore};
use crate::application::tasks::TaskService;
use crate::domain::models::{
    AuthUser, DayOfWeek, JournalEntry, JournalTemplate, NewTask, Task, TaskCategory, TaskPatch,
    TaskStatus,
};
use crate::infrastructure::auth_client::{AuthHttpClient, ReqwestFirebaseAuthClient};
use crate::infrastructure::config::{
    FirebaseSettings, StoreBackend, read_backend, read_firebase_settings, read_gemini_settings,
    read_landing_route, read_locale, read_timezone,
};
use crate::infrastructure::credential_store::{KeyringSessionStore, SessionStore};
use crate::infrastructure::document_store::DocumentStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::firestore_client::{
    FirestoreConfig, FirestoreDocumentStore, IdTokenSource,
};
use crate::infrastructure::gemini_client::{GenerationClient, ReqwestGeminiClient};
use crate::infrastructure::sqlite_store::SqliteDocumentStore;
use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const FIREBASE_API_KEY_VARS: [&str; 2] = ["DAILY_PLANNER_FIREBASE_API_KEY", "FIREBASE_API_KEY"];
const FIREBASE_PROJECT_VARS: [&str; 2] =
    ["DAILY_PLANNER_FIREBASE_PROJECT_ID", "FIREBASE_PROJECT_ID"];

/// Concrete gateways the commands run against.
pub struct AppServices {
    pub store: Arc<dyn DocumentStore>,
    pub session: Arc<dyn SessionProvider>,
    pub auth: Option<Arc<DynAuthManager>>,
    pub generation: Arc<dyn GenerationClient>,
}

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    timezone: chrono_tz::Tz,
    locale: DateLocale,
    router: Router,
    services: AppServices,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let services = build_services_from_lookup(
            &bootstrap.config_dir,
            &bootstrap.database_path,
            |key| std::env::var(key).ok(),
        )?;
        Self::from_bootstrap(bootstrap, services)
    }

    pub fn with_services(workspace_root: PathBuf, services: AppServices) -> Result<Self, InfraError> {
        Self::from_bootstrap(bootstrap_workspace(&workspace_root)?, services)
    }

    fn from_bootstrap(bootstrap: BootstrapResult, services: AppServices) -> Result<Self, InfraError> {
        let router = Router::default().with_landing_route(&read_landing_route(&bootstrap.config_dir)?)?;

        Ok(Self {
            timezone: read_timezone(&bootstrap.config_dir)?,
            locale: DateLocale::parse(&read_locale(&bootstrap.config_dir)?)?,
            router,
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            services,
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    fn auth(&self) -> Result<&DynAuthManager, InfraError> {
        self.services.auth.as_deref().ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "firebase auth is not configured (set apiKey in firebase.json or one of: {})",
                FIREBASE_API_KEY_VARS.join(", ")
            ))
        })
    }

    fn task_store(&self) -> TaskStore<dyn DocumentStore> {
        TaskStore::new(
            TaskService::new(Arc::clone(&self.services.store)),
            Arc::clone(&self.services.session),
        )
    }

    fn journal_store(&self) -> JournalStore<dyn DocumentStore> {
        JournalStore::new(
            JournalService::new(Arc::clone(&self.services.store)),
            Arc::clone(&self.services.session),
        )
    }

    fn settings_store(&self) -> SettingsStore<dyn DocumentStore> {
        SettingsStore::new(
            SettingsService::new(Arc::clone(&self.services.store)),
            Arc::clone(&self.services.session),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusResponse {
    pub authenticated: bool,
    pub refreshed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthUser>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskView {
    All,
    Today,
    Next,
    Someday,
    Day(DayOfWeek),
    /// Tasks for a weekday created during the current week.
    Week(DayOfWeek),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TransferResponse {
    pub from_day: u8,
    pub to_day: u8,
    pub moved: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SettingsResponse {
    pub has_api_key: bool,
    pub daily_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NavigationResponse {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

pub async fn restore_session_impl(state: &AppState) -> Result<SessionStatusResponse, InfraError> {
    let refreshed = match &state.services.auth {
        Some(auth) => matches!(auth.restore().await?, EnsureSessionResult::Refreshed(_)),
        None => false,
    };
    let user = state.services.session.current_user();
    Ok(SessionStatusResponse {
        authenticated: user.is_some(),
        refreshed,
        user,
    })
}

pub async fn login_impl(
    state: &AppState,
    email: String,
    password: String,
    remember: bool,
) -> Result<AuthUser, InfraError> {
    let user = state.auth()?.login(&email, &password, remember).await?;
    state.log_info("login", &format!("signed in uid={} remember={remember}", user.uid));
    Ok(user)
}

pub async fn signup_impl(
    state: &AppState,
    email: String,
    password: String,
    remember: bool,
    username: Option<String>,
) -> Result<AuthUser, InfraError> {
    let user = state
        .auth()?
        .signup(&email, &password, remember, username.as_deref())
        .await?;
    state.log_info("signup", &format!("created account uid={}", user.uid));
    Ok(user)
}

pub fn logout_impl(state: &AppState) -> Result<(), InfraError> {
    state.auth()?.logout()?;
    state.log_info("logout", "signed out");
    Ok(())
}

pub async fn reset_password_impl(state: &AppState, email: String) -> Result<(), InfraError> {
    state.auth()?.reset_password(&email).await?;
    state.log_info("reset_password", "password reset email requested");
    Ok(())
}

pub async fn change_password_impl(state: &AppState, new_password: String) -> Result<(), InfraError> {
    state.auth()?.change_password(&new_password).await?;
    state.log_info("change_password", "password changed");
    Ok(())
}

pub async fn update_username_impl(state: &AppState, username: String) -> Result<AuthUser, InfraError> {
    let user = state.auth()?.update_username(&username).await?;
    state.log_info("update_username", &format!("display name updated uid={}", user.uid));
    Ok(user)
}

pub fn current_user_impl(state: &AppState) -> Option<AuthUser> {
    state.services.session.current_user()
}

pub async fn create_task_impl(
    state: &AppState,
    text: String,
    category: Option<String>,
    status: Option<String>,
    day_of_week: Option<u8>,
) -> Result<Task, InfraError> {
    let category = category
        .as_deref()
        .map(TaskCategory::parse)
        .transpose()
        .map_err(InfraError::InvalidInput)?
        .unwrap_or(TaskCategory::Today);
    let status = status
        .as_deref()
        .map(TaskStatus::parse)
        .transpose()
        .map_err(InfraError::InvalidInput)?
        .unwrap_or(TaskStatus::Waiting);
    let day_of_week = match day_of_week {
        Some(index) => Some(DayOfWeek::new(index).map_err(InfraError::InvalidInput)?),
        None if category == TaskCategory::Today => {
            Some(DayOfWeek::from_weekday(state.today().weekday()))
        }
        None => None,
    };

    let task = state
        .task_store()
        .create(NewTask {
            text,
            status,
            category,
            day_of_week,
        })
        .await?;
    state.log_info("create_task", &format!("created task_id={}", task.id));
    Ok(task)
}

pub async fn list_tasks_impl(state: &AppState, view: TaskView) -> Result<Vec<Task>, InfraError> {
    state.services.session.require_user()?;
    let store = state.task_store();
    store.refresh().await?;
    Ok(match view {
        TaskView::All => store.all(),
        TaskView::Today => store.today(),
        TaskView::Next => store.next(),
        TaskView::Someday => store.someday(),
        TaskView::Day(day) => store.for_day(day),
        TaskView::Week(day) => store.for_day_in_week(day, state.today(), state.timezone),
    })
}

pub async fn update_task_impl(
    state: &AppState,
    task_id: String,
    text: Option<String>,
    status: Option<String>,
    category: Option<String>,
    day_of_week: Option<Option<u8>>,
) -> Result<(), InfraError> {
    let patch = TaskPatch {
        text,
        status: status
            .as_deref()
            .map(TaskStatus::parse)
            .transpose()
            .map_err(InfraError::InvalidInput)?,
        category: category
            .as_deref()
            .map(TaskCategory::parse)
            .transpose()
            .map_err(InfraError::InvalidInput)?,
        day_of_week: day_of_week
            .map(|day| day.map(DayOfWeek::new).transpose())
            .transpose()
            .map_err(InfraError::InvalidInput)?,
    };

    state.task_store().update(&task_id, patch).await?;
    state.log_info("update_task", &format!("updated task_id={task_id}"));
    Ok(())
}

pub async fn delete_tasks_impl(state: &AppState, task_ids: Vec<String>) -> Result<usize, InfraError> {
    let store = state.task_store();
    match task_ids.as_slice() {
        [] => return Ok(0),
        [single] => store.delete(single).await?,
        many => store.delete_many(many).await?,
    }
    state.log_info("delete_tasks", &format!("deleted {} task(s)", task_ids.len()));
    Ok(task_ids.len())
}

/// Rolls unfinished tasks from `from_day` (default: today in the configured
/// timezone) to the following weekday.
pub async fn transfer_pending_tasks_impl(
    state: &AppState,
    from_day: Option<u8>,
) -> Result<TransferResponse, InfraError> {
    let from_day = match from_day {
        Some(index) => DayOfWeek::new(index).map_err(InfraError::InvalidInput)?,
        None => DayOfWeek::from_weekday(state.today().weekday()),
    };

    let moved = state
        .task_store()
        .transfer_pending_tasks(from_day.index())
        .await?;
    state.log_info(
        "transfer_pending_tasks",
        &format!("moved {moved} task(s) from {} to {}", from_day, from_day.next()),
    );
    Ok(TransferResponse {
        from_day: from_day.index(),
        to_day: from_day.next().index(),
        moved,
    })
}

/// Template precedence: explicit argument, the user's default saved template,
/// then the settings template (which falls back to the built-in one).
pub async fn generate_journal_impl(
    state: &AppState,
    date: Option<String>,
    include_incomplete: bool,
    template: Option<String>,
) -> Result<JournalEntry, InfraError> {
    let user = state.services.session.require_user()?;
    let date = match date {
        Some(raw) => parse_date_input(&raw, "date")?,
        None => state.today(),
    };

    let settings = state.settings_store();
    settings.refresh().await?;
    let journals = JournalService::new(Arc::clone(&state.services.store));
    let template = match template.filter(|value| !value.trim().is_empty()) {
        Some(template) => template,
        None => match journals.default_template(&user.uid).await? {
            Some(saved) => saved.template,
            None => settings.daily_template(),
        },
    };

    let tasks = state.task_store();
    tasks.refresh().await?;
    let selected = select_journal_tasks(
        &tasks.all(),
        DayOfWeek::from_weekday(date.weekday()),
        include_incomplete,
    );

    let generator = JournalGenerator::new(Arc::clone(&state.services.generation))
        .with_api_key(settings.api_key())
        .with_locale(state.locale);
    let generated = generator.generate(&template, &selected, date).await?;

    let entry = journals
        .record_generated(&user.uid, &template, &selected, include_incomplete, generated)
        .await?;
    state.log_info(
        "generate_journal",
        &format!("generated journal_id={} tasks={}", entry.id, selected.len()),
    );
    Ok(entry)
}

pub async fn list_journals_impl(state: &AppState) -> Result<Vec<JournalEntry>, InfraError> {
    state.services.session.require_user()?;
    let store = state.journal_store();
    store.refresh().await?;
    Ok(store.entries())
}

pub async fn delete_journals_impl(
    state: &AppState,
    journal_ids: Vec<String>,
) -> Result<usize, InfraError> {
    let store = state.journal_store();
    match journal_ids.as_slice() {
        [] => return Ok(0),
        [single] => store.delete(single).await?,
        many => store.delete_many(many).await?,
    }
    state.log_info("delete_journals", &format!("deleted {} journal(s)", journal_ids.len()));
    Ok(journal_ids.len())
}

pub async fn save_template_impl(
    state: &AppState,
    template: String,
    is_default: bool,
) -> Result<JournalTemplate, InfraError> {
    let user = state.services.session.require_user()?;
    let saved = JournalService::new(Arc::clone(&state.services.store))
        .save_template(&user.uid, &template, is_default)
        .await?;
    state.log_info("save_template", &format!("saved template_id={}", saved.id));
    Ok(saved)
}

pub async fn list_templates_impl(state: &AppState) -> Result<Vec<JournalTemplate>, InfraError> {
    let user = state.services.session.require_user()?;
    JournalService::new(Arc::clone(&state.services.store))
        .list_templates(&user.uid)
        .await
}

pub async fn get_settings_impl(state: &AppState) -> Result<SettingsResponse, InfraError> {
    state.services.session.require_user()?;
    let store = state.settings_store();
    store.refresh().await?;
    Ok(settings_response(&store))
}

pub async fn set_api_key_impl(state: &AppState, api_key: String) -> Result<SettingsResponse, InfraError> {
    let store = state.settings_store();
    store.update_api_key(&api_key).await?;
    state.log_info("set_api_key", "gemini api key updated");
    Ok(settings_response(&store))
}

pub async fn set_daily_template_impl(
    state: &AppState,
    template: String,
) -> Result<SettingsResponse, InfraError> {
    let store = state.settings_store();
    store.update_daily_template(&template).await?;
    state.log_info("set_daily_template", "daily template updated");
    Ok(settings_response(&store))
}

pub fn navigate_impl(state: &AppState, full_path: String) -> NavigationResponse {
    match state.router.guard(&full_path, state.services.session.as_ref()) {
        NavigationDecision::Proceed(route) => NavigationResponse {
            outcome: "proceed".to_string(),
            route: Some(route.name.to_string()),
            location: Some(route.full_path),
            params: route.params,
        },
        NavigationDecision::Redirect(target) => NavigationResponse {
            outcome: "redirect".to_string(),
            location: Some(target.to_location()),
            route: Some(target.name),
            params: BTreeMap::new(),
        },
        NavigationDecision::NotFound => NavigationResponse {
            outcome: "not_found".to_string(),
            route: None,
            location: None,
            params: BTreeMap::new(),
        },
    }
}

fn settings_response(store: &SettingsStore<dyn DocumentStore>) -> SettingsResponse {
    SettingsResponse {
        has_api_key: !store.api_key().is_empty(),
        daily_template: store.daily_template(),
        updated_at: store
            .settings()
            .map(|settings| settings.updated_at.to_rfc3339()),
    }
}

fn build_services_from_lookup<F>(
    config_dir: &Path,
    database_path: &Path,
    lookup: F,
) -> Result<AppServices, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let backend = read_backend(config_dir)?;
    let firebase = load_firebase_settings_from_lookup(config_dir, lookup)?;
    let gemini = read_gemini_settings(config_dir)?;

    let auth: Option<Arc<DynAuthManager>> = firebase.api_key.as_ref().map(|api_key| {
        let session_store: Arc<dyn SessionStore> = Arc::new(KeyringSessionStore::default());
        let auth_client: Arc<dyn AuthHttpClient> =
            Arc::new(ReqwestFirebaseAuthClient::new(api_key.clone()));
        Arc::new(AuthManager::new(session_store, auth_client))
    });

    let (store, session): (Arc<dyn DocumentStore>, Arc<dyn SessionProvider>) = match (backend, &auth) {
        (StoreBackend::Firestore, None) => {
            return Err(missing_setting("firebase api key", &FIREBASE_API_KEY_VARS));
        }
        (StoreBackend::Firestore, Some(auth)) => {
            let project_id = firebase
                .project_id
                .clone()
                .ok_or_else(|| missing_setting("firebase project id", &FIREBASE_PROJECT_VARS))?;
            let mut config = FirestoreConfig::new(project_id);
            if let Some(database_id) = firebase.database_id.clone() {
                config.database_id = database_id;
            }
            let token_source: Arc<dyn IdTokenSource> = Arc::clone(auth) as Arc<dyn IdTokenSource>;
            (
                Arc::new(FirestoreDocumentStore::new(config, token_source)),
                Arc::clone(auth) as Arc<dyn SessionProvider>,
            )
        }
        (StoreBackend::Local, Some(auth)) => (
            Arc::new(SqliteDocumentStore::new(database_path)),
            Arc::clone(auth) as Arc<dyn SessionProvider>,
        ),
        (StoreBackend::Local, None) => (
            Arc::new(SqliteDocumentStore::new(database_path)),
            Arc::new(FixedSession::offline_profile()),
        ),
    };

    let mut generation = ReqwestGeminiClient::new(gemini.model);
    if let Some(base_url) = gemini.base_url {
        generation = generation.with_base_url(base_url);
    }

    Ok(AppServices {
        store,
        session,
        auth,
        generation: Arc::new(generation),
    })
}

fn load_firebase_settings_from_lookup<F>(
    config_dir: &Path,
    lookup: F,
) -> Result<FirebaseSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = read_firebase_settings(config_dir)?;
    if let Some(api_key) = optional_lookup_value(&lookup, &FIREBASE_API_KEY_VARS) {
        settings.api_key = Some(api_key);
    }
    if let Some(project_id) = optional_lookup_value(&lookup, &FIREBASE_PROJECT_VARS) {
        settings.project_id = Some(project_id);
    }
    Ok(settings)
}

fn missing_setting(field_name: &str, keys: &[&str]) -> InfraError {
    InfraError::InvalidConfig(format!(
        "missing {} (set it in config/firebase.json or one of: {})",
        field_name,
        keys.join(", ")
    ))
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

fn parse_date_input(value: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|error| {
        InfraError::InvalidInput(format!(
            "{field_name} must be YYYY-MM-DD, got '{value}': {error}"
        ))
    })
}

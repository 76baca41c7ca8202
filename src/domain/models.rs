use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "IN-PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "DELEGATED")]
    Delegated,
    #[serde(rename = "APPOINTMENT")]
    Appointment,
    #[serde(rename = "CANCEL")]
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Waiting,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Delegated,
        TaskStatus::Appointment,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::InProgress => "IN-PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Delegated => "DELEGATED",
            Self::Appointment => "APPOINTMENT",
            Self::Cancelled => "CANCEL",
        }
    }

    /// Completed and cancelled tasks are never carried over to another day.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        let normalized = value.trim().to_ascii_uppercase().replace('_', "-");
        match normalized.as_str() {
            "WAITING" => Ok(Self::Waiting),
            "IN-PROGRESS" | "INPROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "DELEGATED" => Ok(Self::Delegated),
            "APPOINTMENT" => Ok(Self::Appointment),
            "CANCEL" | "CANCELLED" | "CANCELED" => Ok(Self::Cancelled),
            _ => Err(format!("unsupported task status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    #[serde(rename = "TODAY")]
    Today,
    #[serde(rename = "NEXT")]
    Next,
    #[serde(rename = "SOME DAY")]
    SomeDay,
}

impl TaskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "TODAY",
            Self::Next => "NEXT",
            Self::SomeDay => "SOME DAY",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        let normalized = value.trim().to_ascii_uppercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "TODAY" => Ok(Self::Today),
            "NEXT" => Ok(Self::Next),
            "SOME DAY" | "SOMEDAY" => Ok(Self::SomeDay),
            _ => Err(format!("unsupported task category: {value}")),
        }
    }
}

/// Weekday index, Sunday = 0 through Saturday = 6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub struct DayOfWeek(u8);

impl DayOfWeek {
    pub const SUNDAY: DayOfWeek = DayOfWeek(0);
    pub const SATURDAY: DayOfWeek = DayOfWeek(6);

    const NAMES: [&'static str; 7] = [
        "Sunday",
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
    ];

    pub fn new(index: u8) -> Result<Self, String> {
        if index > 6 {
            return Err(format!("day of week must be between 0 and 6, got {index}"));
        }
        Ok(Self(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn next(self) -> Self {
        Self((self.0 + 1) % 7)
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self.0 as usize]
    }

    pub fn from_weekday(weekday: Weekday) -> Self {
        Self(weekday.num_days_from_sunday() as u8)
    }

    pub fn all() -> impl Iterator<Item = DayOfWeek> {
        (0..7).map(DayOfWeek)
    }
}

impl TryFrom<u8> for DayOfWeek {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DayOfWeek> for u8 {
    fn from(value: DayOfWeek) -> Self {
        value.0
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// First day (Sunday) of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(DayOfWeek::from_weekday(date.weekday()).index()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub status: TaskStatus,
    pub category: TaskCategory,
    #[serde(default)]
    pub day_of_week: Option<DayOfWeek>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.user_id, "task.user_id")?;
        validate_non_empty(&self.text, "task.text")?;
        if self.updated_at < self.created_at {
            return Err("task.updated_at must be >= task.created_at".to_string());
        }
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        !self.status.is_settled()
    }

    /// Weekday only counts for tasks planned in the "today" lane.
    pub fn scheduled_day(&self) -> Option<DayOfWeek> {
        if self.category == TaskCategory::Today {
            self.day_of_week
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub text: String,
    pub status: TaskStatus,
    pub category: TaskCategory,
    pub day_of_week: Option<DayOfWeek>,
}

impl NewTask {
    pub fn today(text: impl Into<String>, day: DayOfWeek) -> Self {
        Self {
            text: text.into(),
            status: TaskStatus::Waiting,
            category: TaskCategory::Today,
            day_of_week: Some(day),
        }
    }
}

/// Partial task update. `day_of_week: Some(None)` clears the weekday.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub text: Option<String>,
    pub status: Option<TaskStatus>,
    pub category: Option<TaskCategory>,
    pub day_of_week: Option<Option<DayOfWeek>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.status.is_none()
            && self.category.is_none()
            && self.day_of_week.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
    pub template: String,
    pub include_incomplete: bool,
    #[serde(default)]
    pub tasks_included: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub generated_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.user_id, "journal.user_id")?;
        validate_non_empty(&self.content, "journal.content")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJournalEntry {
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub template: String,
    pub include_incomplete: bool,
    pub tasks_included: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JournalTemplate {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub template: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_template: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl UserSettings {
    pub fn api_key(&self) -> Option<&str> {
        let key = self.gemini_api_key.trim();
        if key.is_empty() { None } else { Some(key) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub gemini_api_key: Option<String>,
    pub daily_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub user: AuthUser,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub persistent: bool,
}

impl AuthSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + Duration::seconds(leeway_seconds)
            && !self.id_token.trim().is_empty()
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

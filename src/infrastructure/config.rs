use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const FIREBASE_JSON: &str = "firebase.json";
const GEMINI_JSON: &str = "gemini.json";
const DEFAULT_LANDING_ROUTE: &str = "home";
const DEFAULT_LOCALE: &str = "es-ES";

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub firebase: serde_json::Value,
    pub gemini: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Local,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirebaseSettings {
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    pub database_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiSettings {
    pub model: String,
    pub base_url: Option<String>,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Daily Planner",
                "timezone": "UTC",
                "locale": DEFAULT_LOCALE,
                "landingRoute": DEFAULT_LANDING_ROUTE,
                "backend": "local"
            }),
        ),
        (
            FIREBASE_JSON,
            serde_json::json!({
                "schema": 1,
                "projectId": null,
                "apiKey": null,
                "databaseId": "(default)"
            }),
        ),
        (
            GEMINI_JSON,
            serde_json::json!({
                "schema": 1,
                "model": "gemini-1.5-flash",
                "baseUrl": null
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        firebase: read_config(&config_dir.join(FIREBASE_JSON))?,
        gemini: read_config(&config_dir.join(GEMINI_JSON))?,
    })
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

pub fn read_timezone(config_dir: &Path) -> Result<chrono_tz::Tz, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let Some(raw) = string_field(&app, "timezone") else {
        return Ok(chrono_tz::UTC);
    };
    raw.parse::<chrono_tz::Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{raw}': {error}")))
}

pub fn read_locale(config_dir: &Path) -> Result<String, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(string_field(&app, "locale").unwrap_or_else(|| DEFAULT_LOCALE.to_string()))
}

pub fn read_landing_route(config_dir: &Path) -> Result<String, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(string_field(&app, "landingRoute").unwrap_or_else(|| DEFAULT_LANDING_ROUTE.to_string()))
}

pub fn read_backend(config_dir: &Path) -> Result<StoreBackend, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    match string_field(&app, "backend").as_deref() {
        None | Some("local") => Ok(StoreBackend::Local),
        Some("firestore") => Ok(StoreBackend::Firestore),
        Some(other) => Err(InfraError::InvalidConfig(format!(
            "unsupported backend '{other}' (expected firestore or local)"
        ))),
    }
}

pub fn read_firebase_settings(config_dir: &Path) -> Result<FirebaseSettings, InfraError> {
    let firebase = read_config(&config_dir.join(FIREBASE_JSON))?;
    Ok(FirebaseSettings {
        project_id: string_field(&firebase, "projectId"),
        api_key: string_field(&firebase, "apiKey"),
        database_id: string_field(&firebase, "databaseId"),
    })
}

pub fn read_gemini_settings(config_dir: &Path) -> Result<GeminiSettings, InfraError> {
    let gemini = read_config(&config_dir.join(GEMINI_JSON))?;
    Ok(GeminiSettings {
        model: string_field(&gemini, "model")
            .unwrap_or_else(|| crate::infrastructure::gemini_client::DEFAULT_GEMINI_MODEL.to_string()),
        base_url: string_field(&gemini, "baseUrl"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_CONFIG: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_CONFIG.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "daily-planner-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_are_written_and_readable() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");

        load_configs(&dir.path).expect("load configs");
        assert_eq!(read_timezone(&dir.path).expect("timezone"), chrono_tz::UTC);
        assert_eq!(read_locale(&dir.path).expect("locale"), "es-ES");
        assert_eq!(read_landing_route(&dir.path).expect("landing"), "home");
        assert_eq!(read_backend(&dir.path).expect("backend"), StoreBackend::Local);
        assert_eq!(
            read_firebase_settings(&dir.path).expect("firebase"),
            FirebaseSettings {
                project_id: None,
                api_key: None,
                database_id: Some("(default)".to_string()),
            }
        );
        assert_eq!(read_gemini_settings(&dir.path).expect("gemini").model, "gemini-1.5-flash");
    }

    #[test]
    fn existing_files_are_not_overwritten() {
        let dir = TempConfigDir::new();
        fs::write(
            dir.path.join(APP_JSON),
            r#"{"schema": 1, "timezone": "Europe/Madrid", "backend": "firestore"}"#,
        )
        .expect("write app.json");
        ensure_default_configs(&dir.path).expect("write defaults");

        assert_eq!(read_timezone(&dir.path).expect("timezone"), chrono_tz::Europe::Madrid);
        assert_eq!(read_backend(&dir.path).expect("backend"), StoreBackend::Firestore);
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(dir.path.join(GEMINI_JSON), r#"{"schema": 2}"#).expect("write gemini.json");

        match read_gemini_settings(&dir.path) {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("unsupported schema 2")),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn invalid_timezone_is_reported() {
        let dir = TempConfigDir::new();
        fs::write(dir.path.join(APP_JSON), r#"{"schema": 1, "timezone": "Mars/Olympus"}"#)
            .expect("write app.json");
        assert!(matches!(read_timezone(&dir.path), Err(InfraError::InvalidConfig(_))));
    }
}

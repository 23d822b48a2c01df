use std::{fs, time::Duration};

use serde::Deserialize;

pub const CONFIG_FILE: &str = "panel.toml";
const MAX_RECONCILE_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub database_url: String,
    pub reconcile_interval_secs: u64,
    pub initial_delay_ms: u64,
    pub action_timeout_ms: u64,
    pub stop_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            database_url: "sqlite://./data/panel.db".into(),
            reconcile_interval_secs: 15,
            initial_delay_ms: 500,
            action_timeout_ms: 5000,
            stop_debounce_ms: 250,
        }
    }
}

impl Settings {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.clamp(1, MAX_RECONCILE_INTERVAL_SECS))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms.max(1))
    }

    pub fn stop_debounce(&self) -> Duration {
        Duration::from_millis(self.stop_debounce_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    database_url: Option<String>,
    reconcile_interval_secs: Option<u64>,
    initial_delay_ms: Option<u64>,
    action_timeout_ms: Option<u64>,
    stop_debounce_ms: Option<u64>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(CONFIG_FILE) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let file_cfg = match toml::from_str::<FileSettings>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(err) => {
            tracing::warn!("config: ignoring unreadable {CONFIG_FILE}: {err}");
            return;
        }
    };

    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.reconcile_interval_secs {
        settings.reconcile_interval_secs = v;
    }
    if let Some(v) = file_cfg.initial_delay_ms {
        settings.initial_delay_ms = v;
    }
    if let Some(v) = file_cfg.action_timeout_ms {
        settings.action_timeout_ms = v;
    }
    if let Some(v) = file_cfg.stop_debounce_ms {
        settings.stop_debounce_ms = v;
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("PANEL_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = var("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = var("APP__RECONCILE_INTERVAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.reconcile_interval_secs = parsed;
        }
    }
    if let Some(v) = var("APP__ACTION_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.action_timeout_ms = parsed;
        }
    }
}

/// Accepts bare file paths as well as `sqlite:` urls.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let mut settings = Settings::default();
        apply_file(
            &mut settings,
            r#"
server_url = "http://10.0.0.7:5000"
reconcile_interval_secs = 30
stop_debounce_ms = 400
"#,
        );
        assert_eq!(settings.server_url, "http://10.0.0.7:5000");
        assert_eq!(settings.reconcile_interval(), Duration::from_secs(30));
        assert_eq!(settings.stop_debounce(), Duration::from_millis(400));
        assert_eq!(settings.action_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn reconcile_interval_is_bounded() {
        let mut settings = Settings {
            reconcile_interval_secs: u64::MAX,
            ..Settings::default()
        };
        assert_eq!(settings.reconcile_interval(), Duration::from_secs(86_400));
        settings.reconcile_interval_secs = 0;
        assert_eq!(settings.reconcile_interval(), Duration::from_secs(1));
    }

    #[test]
    fn unreadable_file_leaves_defaults() {
        let mut settings = Settings::default();
        apply_file(&mut settings, "server_url = [");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn app_prefixed_env_wins_over_plain_env() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PANEL_SERVER_URL", "http://plain:5000"),
            ("APP__SERVER_URL", "http://prefixed:5000"),
            ("APP__DATABASE_URL", "sqlite::memory:"),
            ("APP__RECONCILE_INTERVAL_SECS", "not-a-number"),
            ("APP__ACTION_TIMEOUT_MS", "2500"),
        ]);
        let mut settings = Settings::default();
        apply_env(&mut settings, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.server_url, "http://prefixed:5000");
        assert_eq!(settings.database_url, "sqlite::memory:");
        assert_eq!(settings.reconcile_interval_secs, 15);
        assert_eq!(settings.action_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/panel.db"),
            "sqlite://./data/panel.db"
        );
        assert_eq!(normalize_database_url("sqlite:panel.db"), "sqlite://panel.db");
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(normalize_database_url("  "), Settings::default().database_url);
    }
}

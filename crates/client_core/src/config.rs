use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::{
    debounce::DebounceConfig, error::ConfigError, feed::DEFAULT_PAGE_SIZE, gesture,
    outbox::RetryPolicy, resolver, stack::SwipeSettings,
};

pub const DEFAULT_CONFIG_FILE: &str = "reviewer.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub server_url: Option<String>,
    pub session_token: Option<String>,
    pub outbox_database_url: String,
    pub swipe_threshold_px: f32,
    pub rotation_per_px: f32,
    pub fade_distance_px: f32,
    pub button_exit_px: f32,
    pub exit_delay_ms: u64,
    pub feed_page_size: u32,
    pub profile_debounce_ms: u64,
    pub answer_debounce_ms: u64,
    pub request_timeout_ms: u64,
    pub retry_base_ms: u64,
    pub retry_factor: u32,
    pub retry_max_ms: u64,
    pub retry_max_attempts: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            session_token: None,
            outbox_database_url: "sqlite://./data/reviewer.db".into(),
            swipe_threshold_px: resolver::DEFAULT_THRESHOLD_PX,
            rotation_per_px: gesture::DEFAULT_ROTATION_PER_PX,
            fade_distance_px: gesture::DEFAULT_FADE_DISTANCE_PX,
            button_exit_px: resolver::DEFAULT_BUTTON_EXIT_PX,
            exit_delay_ms: 300,
            feed_page_size: DEFAULT_PAGE_SIZE,
            profile_debounce_ms: 500,
            answer_debounce_ms: 0,
            request_timeout_ms: 10_000,
            retry_base_ms: 500,
            retry_factor: 2,
            retry_max_ms: 30_000,
            retry_max_attempts: 8,
        }
    }
}

impl ClientSettings {
    pub fn swipe_settings(&self) -> SwipeSettings {
        SwipeSettings {
            threshold_px: self.swipe_threshold_px,
            rotation_per_px: self.rotation_per_px,
            fade_distance_px: self.fade_distance_px,
            button_exit_px: self.button_exit_px,
            exit_delay: Duration::from_millis(self.exit_delay_ms),
            ..SwipeSettings::default()
        }
    }

    pub fn profile_debounce(&self) -> DebounceConfig {
        DebounceConfig {
            window: Duration::from_millis(self.profile_debounce_ms),
            commit_timeout: self.request_timeout(),
            ..DebounceConfig::profile()
        }
    }

    pub fn answer_debounce(&self) -> DebounceConfig {
        DebounceConfig {
            window: Duration::from_millis(self.answer_debounce_ms),
            commit_timeout: self.request_timeout(),
            ..DebounceConfig::answers()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_ms),
            factor: self.retry_factor.max(1),
            max_delay: Duration::from_millis(self.retry_max_ms),
            max_attempts: self.retry_max_attempts.max(1),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn database_url(&self) -> String {
        normalize_database_url(&self.outbox_database_url)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let Some(raw) = &self.server_url else {
            return Ok(());
        };
        let parsed = Url::parse(raw).map_err(|err| ConfigError::ServerUrl {
            url: raw.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::ServerUrl {
                url: raw.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        Ok(())
    }
}

/// Defaults, then the TOML file, then `APP__*` environment overrides.
///
/// An explicit `path` must exist; without one `reviewer.toml` in the working
/// directory is used when present.
pub fn load_settings(path: Option<&Path>) -> Result<ClientSettings, ConfigError> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

pub fn load_settings_with(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings, ConfigError> {
    let mut settings = match path {
        Some(path) => read_file(path)?,
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            if fallback.exists() {
                read_file(&fallback)?
            } else {
                ClientSettings::default()
            }
        }
    };

    if let Some(v) = env("REVIEWER_SERVER_URL") {
        settings.server_url = Some(v);
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = Some(v);
    }
    if let Some(v) = env("APP__SESSION_TOKEN") {
        settings.session_token = Some(v);
    }
    if let Some(v) = env("APP__OUTBOX_DATABASE_URL") {
        settings.outbox_database_url = v;
    }
    override_number(&env, "APP__SWIPE_THRESHOLD_PX", &mut settings.swipe_threshold_px);
    override_number(&env, "APP__EXIT_DELAY_MS", &mut settings.exit_delay_ms);
    override_number(&env, "APP__PROFILE_DEBOUNCE_MS", &mut settings.profile_debounce_ms);
    override_number(&env, "APP__REQUEST_TIMEOUT_MS", &mut settings.request_timeout_ms);

    settings.validate()?;
    Ok(settings)
}

fn read_file(path: &Path) -> Result<ClientSettings, ConfigError> {
    let shown = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: shown.clone(),
        source,
    })?;
    debug!(path = %shown, "config: loaded file");
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: shown,
        source,
    })
}

fn override_number<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) {
    let Some(raw) = env(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(variable = name, value = %raw, "config: ignoring invalid number"),
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return ClientSettings::default().outbox_database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = env::temp_dir().join(format!("reviewer_config_test_{suffix}"));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join(name);
        fs::write(&path, contents).expect("write config");
        path
    }

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/outbox.db"),
            "sqlite://./data/outbox.db"
        );
        assert_eq!(
            normalize_database_url("sqlite:data\\outbox.db"),
            "sqlite://data/outbox.db"
        );
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(normalize_database_url("  "), "sqlite://./data/reviewer.db");
    }

    #[test]
    fn file_values_are_overridden_by_environment() {
        let path = temp_file(
            "reviewer.toml",
            r#"
server_url = "http://localhost:8000"
swipe_threshold_px = 120.0
exit_delay_ms = 250
"#,
        );
        let settings = load_settings_with(
            Some(&path),
            vars(&[
                ("APP__SERVER_URL", "https://review.example.com"),
                ("APP__EXIT_DELAY_MS", "400"),
                ("APP__SESSION_TOKEN", "abc"),
            ]),
        )
        .expect("settings");

        assert_eq!(
            settings.server_url.as_deref(),
            Some("https://review.example.com")
        );
        assert_eq!(settings.swipe_threshold_px, 120.0);
        assert_eq!(settings.swipe_settings().exit_delay, Duration::from_millis(400));
        assert_eq!(settings.session_token.as_deref(), Some("abc"));
        assert_eq!(settings.profile_debounce(), DebounceConfig::profile());

        fs::remove_dir_all(path.parent().expect("dir")).expect("cleanup");
    }

    #[test]
    fn invalid_numbers_keep_the_previous_value() {
        let settings = load_settings_with(
            Some(&temp_file("reviewer.toml", "")),
            vars(&[("APP__PROFILE_DEBOUNCE_MS", "soon"), ("APP__SWIPE_THRESHOLD_PX", "80")]),
        )
        .expect("settings");
        assert_eq!(settings.profile_debounce_ms, 500);
        assert_eq!(settings.swipe_settings().threshold_px, 80.0);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = load_settings_with(Some(Path::new("/nonexistent/reviewer.toml")), vars(&[]))
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn rejects_non_http_server_url() {
        let err = load_settings_with(
            Some(&temp_file("reviewer.toml", "")),
            vars(&[("REVIEWER_SERVER_URL", "ws://localhost:8000")]),
        )
        .expect_err("bad scheme");
        assert!(matches!(err, ConfigError::ServerUrl { .. }));
    }

    #[test]
    fn derived_policies_follow_settings() {
        let settings = ClientSettings {
            request_timeout_ms: 2_500,
            retry_max_attempts: 0,
            ..ClientSettings::default()
        };
        assert_eq!(settings.answer_debounce().window, Duration::ZERO);
        assert_eq!(
            settings.answer_debounce().commit_timeout,
            Duration::from_millis(2_500)
        );
        assert_eq!(settings.retry_policy().max_attempts, 1);
        assert_eq!(settings.retry_policy().base_delay, Duration::from_millis(500));
    }
}

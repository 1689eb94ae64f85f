use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub debug: bool,
    pub auth_token: String,
    pub enable_swagger: bool,
    pub port: u16,
    /// How many weekly occurrences of a schedule students may claim ahead.
    pub lookahead_weeks: u32,
    pub notify_webhook_url: Option<Url>,
    pub roster_path: Option<String>,
    pub calendar_name: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            // Load from environment variables with APP_ prefix
            .add_source(Environment::with_prefix("APP").prefix_separator("_"))
            .set_default("debug", false)?
            .set_default("auth_token", "default-token-change-me")?
            .set_default("enable_swagger", true)?
            .set_default("port", 8080)?
            .set_default("lookahead_weeks", 6)?
            .set_default("calendar_name", "Training Sessions")?
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_defaults() {
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.lookahead_weeks, 6);
        assert_eq!(settings.port, 8080);
        assert!(settings.notify_webhook_url.is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: serialized with every other test touching the environment.
        unsafe {
            std::env::set_var("APP_LOOKAHEAD_WEEKS", "4");
            std::env::set_var("APP_NOTIFY_WEBHOOK_URL", "http://localhost:9000/notify");
        }
        let settings = Settings::from_env();
        unsafe {
            std::env::remove_var("APP_LOOKAHEAD_WEEKS");
            std::env::remove_var("APP_NOTIFY_WEBHOOK_URL");
        }
        let settings = settings.unwrap();
        assert_eq!(settings.lookahead_weeks, 4);
        assert_eq!(
            settings.notify_webhook_url.unwrap().as_str(),
            "http://localhost:9000/notify"
        );
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::store::DatabaseConfig;

/// How the sub-paths of a split step are driven.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    #[default]
    Concurrent,
    Sequential,
}

/// Where a goto step leaves the cursor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GotoMode {
    /// The target index is the next step to run.
    #[default]
    Absolute,
    /// The step after the target index runs next.
    PostIncrement,
}

impl FromStr for SplitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "concurrent" => Ok(SplitMode::Concurrent),
            "sequential" => Ok(SplitMode::Sequential),
            other => Err(format!("unknown split mode '{}'", other)),
        }
    }
}

impl FromStr for GotoMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "absolute" => Ok(GotoMode::Absolute),
            "post_increment" => Ok(GotoMode::PostIncrement),
            other => Err(format!("unknown goto mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub split_mode: SplitMode,
    #[serde(default)]
    pub goto_mode: GotoMode,
    /// Upper bound on steps executed in one scheduler run.
    pub max_steps_per_run: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            split_mode: SplitMode::Concurrent,
            goto_mode: GotoMode::Absolute,
            max_steps_per_run: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub mailgun: MailgunConfig,
    pub messenger: MessengerConfig,
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MailgunConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub domain: String,
    pub base_url: String,
    #[serde(default = "default_mailgun_timeout")]
    pub timeout_secs: u64,
}

impl fmt::Debug for MailgunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailgunConfig")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("domain", &self.domain)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessengerConfig {
    pub backend_url: String,
    /// Per-request limit for each call to the backend.
    #[serde(default = "default_messenger_timeout")]
    pub timeout_secs: u64,
}

fn default_mailgun_timeout() -> u64 {
    30
}

fn default_messenger_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    pub dir: PathBuf,
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                addr: env_or("SERVER_ADDR", &defaults.server.addr),
            },
            database: DatabaseConfig {
                db_type: env_parse("DATABASE_TYPE", defaults.database.db_type)?,
                sqlite_path: std::env::var("SQLITE_PATH")
                    .map(PathBuf::from)
                    .ok()
                    .or(defaults.database.sqlite_path),
                connection_string: std::env::var("DATABASE_URL").ok(),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
            mailgun: MailgunConfig {
                api_key: env_or("MAILGUN_API_KEY", ""),
                domain: env_or("MAILGUN_DOMAIN", &defaults.mailgun.domain),
                base_url: env_or("MAILGUN_BASE_URL", &defaults.mailgun.base_url),
                timeout_secs: env_parse("MAILGUN_TIMEOUT_SECS", defaults.mailgun.timeout_secs)?,
            },
            messenger: MessengerConfig {
                backend_url: env_or("MESSENGER_BACKEND_URL", &defaults.messenger.backend_url),
                timeout_secs: env_parse(
                    "MESSENGER_TIMEOUT_SECS",
                    defaults.messenger.timeout_secs,
                )?,
            },
            templates: TemplatesConfig {
                dir: std::env::var("TEMPLATES_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.templates.dir),
            },
            execution: ExecutionConfig {
                split_mode: env_parse("WORKFLOW_SPLIT_MODE", defaults.execution.split_mode)?,
                goto_mode: env_parse("WORKFLOW_GOTO_MODE", defaults.execution.goto_mode)?,
                max_steps_per_run: env_parse(
                    "WORKFLOW_MAX_STEPS_PER_RUN",
                    defaults.execution.max_steps_per_run,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.mailgun.api_key.is_empty() {
            tracing::warn!("MAILGUN_API_KEY is not set. Email steps will fail to send.");
        }

        if self.mailgun.timeout_secs == 0 || self.messenger.timeout_secs == 0 {
            return Err(crate::Error::Config(
                "HTTP timeouts must be greater than zero".to_string(),
            ));
        }

        if self.execution.max_steps_per_run == 0 {
            return Err(crate::Error::Config(
                "WORKFLOW_MAX_STEPS_PER_RUN must be greater than zero".to_string(),
            ));
        }

        self.database.validate().map_err(crate::Error::Config)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> crate::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    parse_setting(key, std::env::var(key).ok(), default)
}

/// Unset or blank keeps the default; anything else must parse.
fn parse_setting<T>(key: &str, raw: Option<String>, default: T) -> crate::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e| crate::Error::Config(format!("invalid {}: {}", key, e))),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8080".to_string(),
            },
            database: DatabaseConfig::default(),
            mailgun: MailgunConfig {
                api_key: String::new(),
                domain: "localhost".to_string(),
                base_url: "https://api.mailgun.net".to_string(),
                timeout_secs: default_mailgun_timeout(),
            },
            messenger: MessengerConfig {
                backend_url: "http://localhost:3000".to_string(),
                timeout_secs: default_messenger_timeout(),
            },
            templates: TemplatesConfig {
                dir: PathBuf::from("templates"),
            },
            execution: ExecutionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DatabaseType;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.split_mode, SplitMode::Concurrent);
        assert_eq!(config.execution.goto_mode, GotoMode::Absolute);
    }

    #[test]
    fn test_postgres_requires_connection_string() {
        let mut config = Config::default();
        config.database.db_type = DatabaseType::Postgres;
        config.database.connection_string = None;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_zero_step_budget_rejected() {
        let mut config = Config::default();
        config.execution.max_steps_per_run = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_execution_modes_deserialize() {
        let exec: ExecutionConfig = serde_json::from_str(
            r#"{"split_mode":"sequential","goto_mode":"post_increment","max_steps_per_run":10}"#,
        )
        .unwrap();
        assert_eq!(exec.split_mode, SplitMode::Sequential);
        assert_eq!(exec.goto_mode, GotoMode::PostIncrement);
    }

    #[test]
    fn test_debug_output_hides_api_key() {
        let mut config = Config::default();
        config.mailgun.api_key = "key-live-0123456789".to_string();

        let printed = format!("{:?}", config);
        assert!(!printed.contains("key-live-0123456789"));
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("api.mailgun.net"));
    }

    #[test]
    fn test_unknown_setting_values_rejected() {
        let err = parse_setting("WORKFLOW_SPLIT_MODE", Some("diagonal".to_string()), SplitMode::default())
            .unwrap_err();
        assert!(matches!(err, crate::Error::Config(ref m) if m.contains("WORKFLOW_SPLIT_MODE")));

        assert!(parse_setting("WORKFLOW_GOTO_MODE", Some("relative".to_string()), GotoMode::default()).is_err());
        assert!(parse_setting("DATABASE_TYPE", Some("mysql".to_string()), DatabaseType::Sqlite).is_err());
        assert!(parse_setting("WORKFLOW_MAX_STEPS_PER_RUN", Some("lots".to_string()), 10usize).is_err());
    }

    #[test]
    fn test_known_setting_values_parse() {
        assert_eq!(
            parse_setting("WORKFLOW_GOTO_MODE", Some(" Post_Increment ".to_string()), GotoMode::Absolute).unwrap(),
            GotoMode::PostIncrement
        );
        assert_eq!(
            parse_setting("WORKFLOW_SPLIT_MODE", None, SplitMode::Concurrent).unwrap(),
            SplitMode::Concurrent
        );
        assert!(matches!(
            parse_setting("DATABASE_TYPE", Some("postgres".to_string()), DatabaseType::Sqlite).unwrap(),
            DatabaseType::Postgres
        ));
        assert_eq!(parse_setting("MESSENGER_TIMEOUT_SECS", Some(String::new()), 10u64).unwrap(), 10);
    }
}

use crate::policy::CallPolicy;
use serde::Deserialize;
use sqlchat_core::{SqlChatError, DEFAULT_HISTORY_TURNS};
use sqlchat_db::ConnectOptions;
use sqlchat_llm::{GeminiProvider, OpenAiProvider, TextGenerator, OPENAI_DEFAULT_BASE_URL};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub llm: LlmConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Connection settings. The password itself never lives in the file, only
/// the name of the environment variable that holds it.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub server: String,
    pub database: String,
    pub username: String,
    pub password_env: String,
    #[serde(default = "default_true")]
    pub encrypt: bool,
    #[serde(default = "default_true")]
    pub trust_certificate: bool,
    /// Catalog to introspect; all non-system catalogs when absent.
    pub target_database: Option<String>,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<ConnectOptions, SqlChatError> {
        self.connect_options_with(|name| std::env::var(name).ok())
    }

    pub fn connect_options_with<F>(&self, lookup: F) -> Result<ConnectOptions, SqlChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let password = lookup(&self.password_env).ok_or_else(|| {
            SqlChatError::Config(format!(
                "environment variable {} is not set",
                self.password_env
            ))
        })?;
        let mut options =
            ConnectOptions::new(&self.server, &self.database, &self.username, password);
        options.encrypt = self.encrypt;
        options.trust_certificate = self.trust_certificate;
        Ok(options)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    OpenAi,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key_env: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
}

impl LlmConfig {
    pub fn build_generator(&self) -> Result<Arc<dyn TextGenerator>, SqlChatError> {
        self.build_generator_with(|name| std::env::var(name).ok())
    }

    pub fn build_generator_with<F>(&self, lookup: F) -> Result<Arc<dyn TextGenerator>, SqlChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(&self.api_key_env).ok_or_else(|| {
            SqlChatError::Config(format!(
                "environment variable {} is not set",
                self.api_key_env
            ))
        })?;
        let generator: Arc<dyn TextGenerator> = match self.provider {
            Provider::Gemini => {
                let mut provider =
                    GeminiProvider::new(&api_key, &self.model).with_temperature(self.temperature);
                if let Some(url) = &self.base_url {
                    provider = provider.with_base_url(url);
                }
                Arc::new(provider)
            }
            Provider::OpenAi => {
                let url = self
                    .base_url
                    .as_deref()
                    .unwrap_or(OPENAI_DEFAULT_BASE_URL);
                Arc::new(
                    OpenAiProvider::new(&api_key, &self.model, url)
                        .with_temperature(self.temperature),
                )
            }
        };
        Ok(generator)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PolicyConfig {
    pub generation_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_millis: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            generation_timeout_secs: 60,
            query_timeout_secs: 120,
            max_retries: 2,
            backoff_millis: 500,
        }
    }
}

impl PolicyConfig {
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_millis),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    pub max_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_HISTORY_TURNS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(db) = &self.database {
            for (field, value) in [
                ("server", &db.server),
                ("database", &db.database),
                ("username", &db.username),
                ("password_env", &db.password_env),
            ] {
                if value.trim().is_empty() {
                    return Err(anyhow::anyhow!("database.{field} must not be empty"));
                }
            }
        }
        if self.llm.model.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.model must not be empty"));
        }
        if self.llm.api_key_env.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.api_key_env must not be empty"));
        }
        if self.policy.generation_timeout_secs == 0 || self.policy.query_timeout_secs == 0 {
            return Err(anyhow::anyhow!("policy timeouts must be greater than zero"));
        }
        if self.history.max_turns == 0 || self.history.max_turns % 2 != 0 {
            return Err(anyhow::anyhow!(format!(
                "history.max_turns must be a positive even number, got {}",
                self.history.max_turns
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[llm]
provider = "gemini"
model = "gemini-1.5-pro"
api_key_env = "GOOGLE_API_KEY"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert!(config.database.is_none());
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.history.max_turns, 10);
        assert_eq!(config.policy.max_retries, 2);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.llm.provider, Provider::Gemini);
    }

    #[test]
    fn loads_full_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
listen_addr = "0.0.0.0:9000"

[database]
server = "sql01\\REPORTING"
database = "Retail"
username = "report_reader"
password_env = "SQLCHAT_DB_PASSWORD"
encrypt = false
target_database = "Retail"

[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
base_url = "http://localhost:11434/v1"
temperature = 0.2

[policy]
query_timeout_secs = 30

[history]
max_turns = 6
"#
        )
        .unwrap();

        let config = Config::from_path(file.path().to_str().unwrap()).unwrap();
        let db = config.database.as_ref().unwrap();
        assert_eq!(db.server, "sql01\\REPORTING");
        assert!(!db.encrypt);
        assert!(db.trust_certificate);
        assert_eq!(db.target_database.as_deref(), Some("Retail"));
        assert_eq!(config.llm.provider, Provider::OpenAi);
        assert_eq!(config.policy.query_timeout_secs, 30);
        assert_eq!(config.policy.generation_timeout_secs, 60);
        assert_eq!(config.history.max_turns, 6);
    }

    #[test]
    fn shipped_example_is_valid() {
        let config = Config::from_toml(include_str!("../../../sqlchat.example.toml")).unwrap();
        assert_eq!(
            config.database.unwrap().password_env,
            "SQLCHAT_DB_PASSWORD"
        );
    }

    #[test]
    fn rejects_odd_history_and_unknown_provider() {
        let odd = format!("{MINIMAL}\n[history]\nmax_turns = 5\n");
        assert!(Config::from_toml(&odd).is_err());

        let unknown = MINIMAL.replace("gemini\"", "claude\"");
        assert!(Config::from_toml(&unknown).is_err());
    }

    #[test]
    fn rejects_zero_timeouts_and_blank_server() {
        let zero = format!("{MINIMAL}\n[policy]\nquery_timeout_secs = 0\n");
        assert!(Config::from_toml(&zero).is_err());

        let blank = format!(
            "{MINIMAL}\n[database]\nserver = \" \"\ndatabase = \"d\"\nusername = \"u\"\npassword_env = \"P\"\n"
        );
        assert!(Config::from_toml(&blank).is_err());
    }

    #[test]
    fn password_comes_from_the_named_variable() {
        let db = DatabaseConfig {
            server: "localhost,1433".into(),
            database: "Retail".into(),
            username: "sa".into(),
            password_env: "SQLCHAT_TEST_PASSWORD".into(),
            encrypt: true,
            trust_certificate: false,
            target_database: None,
        };
        let options = db
            .connect_options_with(|name| (name == "SQLCHAT_TEST_PASSWORD").then(|| "pw".to_string()))
            .unwrap();
        assert_eq!(options.password, "pw");
        assert!(!options.trust_certificate);

        let err = db.connect_options_with(|_| None).unwrap_err();
        assert!(matches!(err, SqlChatError::Config(_)));
    }

    #[test]
    fn generator_follows_provider() {
        let config = Config::from_toml(MINIMAL).unwrap();
        let generator = config
            .llm
            .build_generator_with(|_| Some("key".to_string()))
            .unwrap();
        assert_eq!(generator.name(), "gemini");
        assert!(config.llm.build_generator_with(|_| None).is_err());
    }
}

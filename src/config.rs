use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_DATABASE_PATH, DEFAULT_LLM_MODEL, DEFAULT_OUTPUT_DIR,
    DEFAULT_PAGE_SIZE, MP_API_BASE_URL,
};
use crate::error::{MaterialsError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Runtime configuration. Credentials never have a committed default; they
/// come from `config.toml` (kept out of version control) or the environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub materials_project: MaterialsProjectConfig,
    pub llm: LlmConfig,
    pub output: OutputConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// For the SQLite store this is the database file path.
    pub database: String,
    pub charset: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaterialsProjectConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub page_size: usize,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            password: None,
            database: DEFAULT_DATABASE_PATH.to_string(),
            charset: "utf8mb4".to_string(),
        }
    }
}

impl Default for MaterialsProjectConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: MP_API_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout_seconds: 60,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Config {
    /// Load `config.toml` (if present) from the working directory, then apply
    /// environment overrides. `.env` is read first so it can supply them.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let _ = dotenv::dotenv();

        let explicit = path.is_some();
        let config_path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let mut config = if config_path.exists() {
            let config_content = fs::read_to_string(config_path).map_err(|e| {
                MaterialsError::Config(format!(
                    "Failed to read config file '{}': {}",
                    config_path.display(),
                    e
                ))
            })?;
            toml::from_str::<Config>(&config_content)?
        } else if explicit {
            return Err(MaterialsError::Config(format!(
                "Config file '{}' not found",
                config_path.display()
            )));
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production). Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MP_API_KEY") {
            self.materials_project.api_key = Some(v);
        }
        if let Some(v) = get("MP_API_URL") {
            self.materials_project.base_url = v;
        }
        if let Some(v) = get("DB_HOST") {
            self.database.host = Some(v);
        }
        if let Some(v) = get("DB_USER") {
            self.database.user = Some(v);
        }
        if let Some(v) = get("DB_PASSWORD") {
            self.database.password = Some(v);
        }
        if let Some(v) = get("DB_NAME") {
            self.database.database = v;
        }
        if let Some(v) = get("DB_CHARSET") {
            self.database.charset = v;
        }
        if let Some(v) = get("LLM_API_KEY").or_else(|| get("GEMINI_API_KEY")) {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("MP_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(v);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.materials_project.page_size == 0 {
            return Err(MaterialsError::Config(
                "materials_project.page_size must be greater than zero".into(),
            ));
        }
        if self.import.batch_size == 0 {
            return Err(MaterialsError::Config(
                "import.batch_size must be greater than zero".into(),
            ));
        }
        if self.database.database.trim().is_empty() {
            return Err(MaterialsError::Config("database.database must not be empty".into()));
        }
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.materials_project
            .api_key
            .as_deref()
            .ok_or_else(|| MaterialsError::Config("MP_API_KEY is not set".into()))
    }

    pub fn require_llm_key(&self) -> Result<&str> {
        self.llm
            .api_key
            .as_deref()
            .ok_or_else(|| MaterialsError::Config("LLM_API_KEY is not set".into()))
    }
}

impl DatabaseConfig {
    pub fn sqlite_path(&self) -> &Path {
        Path::new(&self.database)
    }

    /// Connection description for logs; never includes the password.
    pub fn describe(&self) -> String {
        let host = self.host.as_deref().unwrap_or("localhost");
        match self.user.as_deref() {
            Some(user) => format!("{}@{}/{} ({})", user, host, self.database, self.charset),
            None => format!("{}/{} ({})", host, self.database, self.charset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_carry_no_credentials() {
        let config = Config::default();
        assert!(config.materials_project.api_key.is_none());
        assert!(config.database.password.is_none());
        assert!(config.require_api_key().is_err());
        assert_eq!(config.import.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn parses_recognized_options() {
        let toml_src = r#"
            [database]
            host = "db.example.org"
            user = "reader"
            password = "secret"
            database = "data/materials.db"
            charset = "utf8"

            [materials_project]
            api_key = "abc123"
            page_size = 250

            [import]
            batch_size = 10
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.database.host.as_deref(), Some("db.example.org"));
        assert_eq!(config.database.sqlite_path(), Path::new("data/materials.db"));
        assert_eq!(config.require_api_key().unwrap(), "abc123");
        assert_eq!(config.materials_project.page_size, 250);
        assert_eq!(config.materials_project.base_url, MP_API_BASE_URL);
        assert_eq!(config.import.batch_size, 10);
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("MP_API_KEY", "from-env"),
            ("DB_NAME", "other.db"),
            ("DB_PASSWORD", "  "),
            ("GEMINI_API_KEY", "gem"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.require_api_key().unwrap(), "from-env");
        assert_eq!(config.database.database, "other.db");
        assert!(config.database.password.is_none());
        assert_eq!(config.require_llm_key().unwrap(), "gem");
    }

    #[test]
    fn describe_redacts_password() {
        let db = DatabaseConfig {
            host: Some("dbhost".into()),
            user: Some("alice".into()),
            password: Some("hunter2".into()),
            ..DatabaseConfig::default()
        };
        let described = db.describe();
        assert!(described.contains("alice@dbhost"));
        assert!(!described.contains("hunter2"));
    }
}

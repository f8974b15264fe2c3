use crate::utils::error::{RegistryError, Result};
use crate::utils::validation::Validate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    pub url: Option<String>,
    pub max_connections: Option<u32>,
    pub acquire_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

impl DatabaseConfig {
    /// 取得資料庫連線字串
    pub fn url(&self) -> Result<&str> {
        crate::utils::validation::validate_required_field("database.url", &self.url)
            .map(String::as_str)
    }

    /// 取得連線池大小
    pub fn max_connections(&self) -> u32 {
        self.max_connections.unwrap_or(10)
    }

    pub fn acquire_timeout_seconds(&self) -> u64 {
        self.acquire_timeout_seconds.unwrap_or(5)
    }
}

impl LoggingConfig {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }
}

impl RegistryConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(RegistryError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| RegistryError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 未提供設定檔時使用記憶體後端
    pub fn in_memory() -> Self {
        Self {
            service: ServiceConfig {
                name: "course-registry".to_string(),
                description: None,
            },
            database: DatabaseConfig::default(),
            logging: None,
        }
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        crate::utils::validation::validate_non_empty_string("service.name", &self.service.name)?;

        if self.database.backend == DatabaseBackend::Postgres {
            let url = self.database.url()?;
            crate::utils::validation::validate_url("database.url", url, &["postgres", "postgresql"])?;
        }

        if let Some(max_connections) = self.database.max_connections {
            crate::utils::validation::validate_positive_number(
                "database.max_connections",
                max_connections as usize,
                1,
            )?;
        }

        if let Some(timeout) = self.database.acquire_timeout_seconds {
            crate::utils::validation::validate_range("database.acquire_timeout_seconds", timeout, 1, 300)?;
        }

        if let Some(logging) = &self.logging {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if !valid_levels.contains(&logging.level()) {
                return Err(RegistryError::InvalidConfigValueError {
                    field: "logging.level".to_string(),
                    value: logging.level().to_string(),
                    reason: format!("Valid levels: {}", valid_levels.join(", ")),
                });
            }
        }

        Ok(())
    }
}

impl Validate for RegistryConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

/// 替換環境變數 (例如 ${DATABASE_URL})；未設定的變數保留原樣
pub fn substitute_env_vars(content: &str) -> String {
    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let re = ENV_VAR.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    });

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .into_owned()
}

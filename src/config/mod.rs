pub mod lexicon;

use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

pub use lexicon::Lexicon;

use crate::utils::MedDigestError;

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";
pub const DEFAULT_LEXICON_PATH: &str = "config/lexicon.toml";

const PLACEHOLDER_API_KEY: &str = "your-groq-api-key";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub llm: LlmConfig,
    pub budget: BudgetConfig,
    pub scoring: ScoringConfig,
    pub digest: DigestConfig,
    pub storage: StorageConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    pub base_url: String,
    pub search_query: String,
    pub max_results: usize,
    pub max_retries: u32,
    pub initial_retry_delay_secs: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    pub max_tokens_per_minute: u64,
    /// 每百万输入 token 的美元价格
    pub input_cost_per_million: f64,
    /// 每百万输出 token 的美元价格
    pub output_cost_per_million: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// 关键词规则评分（默认）
    Heuristic,
    /// AI 方法学识别 + 次要信号评分
    Methodology,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    pub mode: ScoringMode,
    pub high_interest_threshold: f64,
    /// 为空时使用内置短语表
    pub lexicon_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DigestConfig {
    pub batch_size: usize,
    pub max_batch_chars: usize,
    pub output_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub recipients: Vec<String>,
    pub subject: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// 分层加载：内置默认值 < 配置文件 < MEDDIGEST__ 前缀环境变量
    pub fn load_from(path: &Path) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("MEDDIGEST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;

        if !config.has_api_key() {
            if let Ok(key) = std::env::var("GROQ_API_KEY") {
                config.llm.api_key = key;
            }
        }

        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn has_api_key(&self) -> bool {
        let key = self.llm.api_key.trim();
        !key.is_empty() && key != PLACEHOLDER_API_KEY
    }

    /// 缺少 LLM 凭据时无法继续，启动阶段直接失败
    pub fn require_credentials(&self) -> Result<(), MedDigestError> {
        if self.has_api_key() {
            Ok(())
        } else {
            Err(MedDigestError::ConfigError(
                "未配置 LLM API key，请设置 GROQ_API_KEY 或 [llm] api_key".to_string(),
            ))
        }
    }

    pub fn lexicon_path(&self) -> Option<PathBuf> {
        let path = self.scoring.lexicon_path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.storage.database_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig {
                base_url: "https://export.arxiv.org/api/query".to_string(),
                search_query: "all:medical".to_string(),
                max_results: 100,
                max_retries: 3,
                initial_retry_delay_secs: 5,
                timeout_secs: 30,
                user_agent: "MedDigest/0.1 (research digest; mailto:user@example.com)".to_string(),
            },
            llm: LlmConfig {
                api_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
                api_key: PLACEHOLDER_API_KEY.to_string(),
                model: "llama3-8b-8192".to_string(),
                temperature: 0.2,
                timeout_secs: 60,
            },
            budget: BudgetConfig {
                max_tokens_per_minute: 16_000,
                input_cost_per_million: 0.05,
                output_cost_per_million: 0.08,
            },
            scoring: ScoringConfig {
                mode: ScoringMode::Heuristic,
                high_interest_threshold: 7.0,
                lexicon_path: String::new(),
            },
            digest: DigestConfig {
                batch_size: 10,
                max_batch_chars: 24_000,
                output_dir: "data/newsletters".to_string(),
            },
            storage: StorageConfig {
                database_path: "./data/meddigest.db".to_string(),
            },
            email: EmailConfig {
                enabled: false,
                smtp_host: "smtp.gmail.com".to_string(),
                smtp_port: 587,
                username: String::new(),
                password: String::new(),
                from_address: "meddigest.newsletter@example.com".to_string(),
                recipients: Vec::new(),
                subject: "MedDigest Weekly Research Newsletter".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/settings.toml")).unwrap();
        assert_eq!(config.budget.max_tokens_per_minute, 16_000);
        assert_eq!(config.scoring.mode, ScoringMode::Heuristic);
        assert!(config.lexicon_path().is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut config = AppConfig::default();
        config.budget.max_tokens_per_minute = 1_000;
        config.scoring.mode = ScoringMode::Methodology;
        config.save(path.to_str().unwrap()).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.budget.max_tokens_per_minute, 1_000);
        assert_eq!(loaded.scoring.mode, ScoringMode::Methodology);
        assert_eq!(loaded.budget.input_cost_per_million, 0.05);
    }

    #[test]
    fn placeholder_key_is_rejected() {
        let mut config = AppConfig::default();
        assert!(matches!(
            config.require_credentials(),
            Err(MedDigestError::ConfigError(_))
        ));

        config.llm.api_key = "gsk_real".to_string();
        assert!(config.require_credentials().is_ok());
    }
}

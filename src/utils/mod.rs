pub mod logger;
pub mod scheduler;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MedDigestError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("数据库错误: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("网络请求错误: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("LLM API错误: {0}")]
    LlmError(String),

    #[error("论文源错误: {0}")]
    SourceError(String),

    #[error("邮件发送错误: {0}")]
    EmailError(String),
}

pub type MedDigestResult<T> = Result<T, MedDigestError>;

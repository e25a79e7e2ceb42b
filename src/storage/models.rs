use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// digests 表中的一行；document 为完整简报 JSON
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DigestRecord {
    pub id: String,
    pub created_at: String,
    pub document: String,
}

/// paper_analyses 表中的一行；document 为论文及其分析的 JSON
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaperAnalysisRecord {
    pub paper_id: String,
    pub specialty: String,
    pub interest_score: f64,
    pub document: String,
    pub updated_at: String,
}

/// subscribers 表中的一行；medical_interests 为专科名称的 JSON 数组
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriberRecord {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub medical_interests: String,
    pub reading_time: String,
    pub signed_up_at: String,
}

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::digest::DigestDocument;
use crate::models::{ScoredPaper, Specialty, Subscriber};
use crate::storage::models::{DigestRecord, PaperAnalysisRecord, SubscriberRecord};
use crate::utils::{MedDigestError, MedDigestResult};

/// 简报、论文分析与订阅者的文档存储，文档内容以 JSON 原样保存
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> MedDigestResult<Self> {
        let options = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("数据库连接成功: {}", database_url);
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> MedDigestResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS digests (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                document TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_analyses (
                paper_id TEXT PRIMARY KEY,
                specialty TEXT NOT NULL,
                interest_score REAL NOT NULL,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                email TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                medical_interests TEXT NOT NULL,
                reading_time TEXT NOT NULL,
                signed_up_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_paper_analyses_specialty ON paper_analyses(specialty)")
            .execute(&self.pool)
            .await?;

        info!("数据库表结构初始化完成");
        Ok(())
    }

    /// 保存简报，同 id 覆盖
    pub async fn store_digest(&self, document: &DigestDocument) -> MedDigestResult<()> {
        let json = serde_json::to_string(document)?;
        let created_at = document
            .generated_at
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        sqlx::query(
            r#"
            INSERT INTO digests (id, created_at, document)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at,
                document = excluded.document
            "#,
        )
        .bind(&document.id)
        .bind(&created_at)
        .bind(&json)
        .execute(&self.pool)
        .await?;

        info!("简报已保存: {}", document.id);
        Ok(())
    }

    /// 最近一次生成的简报
    pub async fn latest_digest(&self) -> MedDigestResult<Option<DigestDocument>> {
        let record = sqlx::query_as::<_, DigestRecord>(
            "SELECT id, created_at, document FROM digests ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(r) => Ok(Some(serde_json::from_str(&r.document)?)),
            None => Ok(None),
        }
    }

    /// 保存单篇论文的分析结果，同一论文覆盖旧记录
    pub async fn store_paper_analysis(&self, item: &ScoredPaper) -> MedDigestResult<()> {
        let json = serde_json::to_string(item)?;
        let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        sqlx::query(
            r#"
            INSERT INTO paper_analyses (paper_id, specialty, interest_score, document, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(paper_id) DO UPDATE SET
                specialty = excluded.specialty,
                interest_score = excluded.interest_score,
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.paper.id)
        .bind(item.analysis.specialty.as_str())
        .bind(item.analysis.interest_score)
        .bind(&json)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_paper_analysis(&self, paper_id: &str) -> MedDigestResult<Option<ScoredPaper>> {
        let record = sqlx::query_as::<_, PaperAnalysisRecord>(
            "SELECT paper_id, specialty, interest_score, document, updated_at FROM paper_analyses WHERE paper_id = ?",
        )
        .bind(paper_id)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(r) => Ok(Some(serde_json::from_str(&r.document)?)),
            None => Ok(None),
        }
    }

    /// 按兴趣分数降序列出已保存的分析
    pub async fn list_paper_analyses(&self, min_score: f64) -> MedDigestResult<Vec<PaperAnalysisRecord>> {
        let records = sqlx::query_as::<_, PaperAnalysisRecord>(
            r#"
            SELECT paper_id, specialty, interest_score, document, updated_at
            FROM paper_analyses
            WHERE interest_score >= ?
            ORDER BY interest_score DESC
            "#,
        )
        .bind(min_score)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// 某专科下分数最高的若干篇论文分析；内容无法解析的记录跳过
    pub async fn analyses_by_specialty(
        &self,
        specialty: Specialty,
        limit: u32,
    ) -> MedDigestResult<Vec<ScoredPaper>> {
        let records = sqlx::query_as::<_, PaperAnalysisRecord>(
            r#"
            SELECT paper_id, specialty, interest_score, document, updated_at
            FROM paper_analyses
            WHERE specialty = ?
            ORDER BY interest_score DESC
            LIMIT ?
            "#,
        )
        .bind(specialty.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let papers = records
            .into_iter()
            .filter_map(|r| match serde_json::from_str(&r.document) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("跳过无法解析的分析记录 {}: {}", r.paper_id, e);
                    None
                }
            })
            .collect();
        Ok(papers)
    }

    /// 保存订阅信息，邮箱规范化后作为主键，重复订阅覆盖旧记录
    pub async fn store_subscriber(&self, subscriber: &Subscriber) -> MedDigestResult<()> {
        let email = Subscriber::normalize_email(&subscriber.email);
        if email.is_empty() {
            return Err(MedDigestError::ParseError("订阅邮箱不能为空".to_string()));
        }
        let interests = serde_json::to_string(&subscriber.medical_interests)?;
        let signed_up_at = subscriber
            .signed_up_at
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        sqlx::query(
            r#"
            INSERT INTO subscribers (email, first_name, last_name, medical_interests, reading_time, signed_up_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                medical_interests = excluded.medical_interests,
                reading_time = excluded.reading_time,
                signed_up_at = excluded.signed_up_at
            "#,
        )
        .bind(&email)
        .bind(subscriber.first_name.trim())
        .bind(subscriber.last_name.trim())
        .bind(&interests)
        .bind(&subscriber.reading_time)
        .bind(&signed_up_at)
        .execute(&self.pool)
        .await?;

        info!("订阅信息已保存: {}", email);
        Ok(())
    }

    /// 全部订阅者，按订阅时间排序；内容无法解析的记录跳过
    pub async fn list_subscribers(&self) -> MedDigestResult<Vec<Subscriber>> {
        let records = sqlx::query_as::<_, SubscriberRecord>(
            r#"
            SELECT email, first_name, last_name, medical_interests, reading_time, signed_up_at
            FROM subscribers
            ORDER BY signed_up_at, email
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let subscribers = records
            .into_iter()
            .filter_map(|r| {
                let email = r.email.clone();
                match into_subscriber(r) {
                    Ok(subscriber) => Some(subscriber),
                    Err(e) => {
                        warn!("跳过无法解析的订阅记录 {}: {}", email, e);
                        None
                    }
                }
            })
            .collect();
        Ok(subscribers)
    }

    /// 清空所有表
    pub async fn clear_all_tables(&self) -> MedDigestResult<()> {
        for table in ["digests", "paper_analyses", "subscribers"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&self.pool)
                .await?;
        }
        info!("已清空所有表");
        Ok(())
    }
}

fn into_subscriber(record: SubscriberRecord) -> MedDigestResult<Subscriber> {
    let medical_interests: Vec<Specialty> = serde_json::from_str(&record.medical_interests)?;
    let signed_up_at = DateTime::parse_from_rfc3339(&record.signed_up_at)
        .map_err(|e| MedDigestError::ParseError(format!("订阅时间无效: {}", e)))?
        .with_timezone(&Utc);

    Ok(Subscriber {
        email: record.email,
        first_name: record.first_name,
        last_name: record.last_name,
        medical_interests,
        reading_time: record.reading_time,
        signed_up_at,
    })
}

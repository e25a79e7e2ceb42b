use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 从论文源获取的一篇论文，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub published: DateTime<Utc>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub conclusion: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
}

impl Paper {
    /// 评分使用的全文：标题 + 摘要 + 结论
    pub fn scoring_text(&self) -> String {
        format!("{} {} {}", self.title, self.abstract_text, self.conclusion)
    }
}

/// 医学专科（固定枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Specialty {
    Cardiology,
    Oncology,
    Radiology,
    Neurology,
    Surgery,
    Psychiatry,
    Endocrinology,
    #[serde(rename = "General Medicine")]
    GeneralMedicine,
}

impl Specialty {
    pub const ALL: [Specialty; 8] = [
        Specialty::Cardiology,
        Specialty::Oncology,
        Specialty::Radiology,
        Specialty::Neurology,
        Specialty::Surgery,
        Specialty::Psychiatry,
        Specialty::Endocrinology,
        Specialty::GeneralMedicine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Specialty::Cardiology => "Cardiology",
            Specialty::Oncology => "Oncology",
            Specialty::Radiology => "Radiology",
            Specialty::Neurology => "Neurology",
            Specialty::Surgery => "Surgery",
            Specialty::Psychiatry => "Psychiatry",
            Specialty::Endocrinology => "Endocrinology",
            Specialty::GeneralMedicine => "General Medicine",
        }
    }

    /// 按字母序排列的专科名称，用于提示词
    pub fn prompt_list() -> String {
        let mut names: Vec<&str> = Self::ALL.iter().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names.join(", ")
    }
}

impl fmt::Display for Specialty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Specialty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|sp| sp.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("未知专科: {}", wanted))
    }
}

/// 单个评分因子
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactor {
    pub name: String,
    pub contribution: f64,
}

/// 评分明细：各因子贡献值（按计算顺序）+ 文字说明
///
/// 所有贡献值按顺序求和，再截断到 [0, 10] 并保留一位小数，即为最终分数。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub factors: Vec<ScoreFactor>,
    pub details: std::collections::BTreeMap<String, String>,
}

impl ScoreBreakdown {
    pub fn add(&mut self, name: &str, contribution: f64, reason: impl Into<String>) {
        self.factors.push(ScoreFactor {
            name: name.to_string(),
            contribution,
        });
        self.details.insert(name.to_string(), reason.into());
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.factors
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.contribution)
    }

    /// 按记录顺序求和（未截断）
    pub fn raw_total(&self) -> f64 {
        self.factors.iter().fold(0.0, |acc, f| acc + f.contribution)
    }

    /// 截断并四舍五入后的分数
    pub fn final_score(&self) -> f64 {
        finalize_score(self.raw_total())
    }
}

/// 截断到 [0, 10] 并保留一位小数
pub fn finalize_score(raw: f64) -> f64 {
    let clamped = raw.clamp(0.0, 10.0);
    (clamped * 10.0).round() / 10.0
}

/// AI 分析结果；分数和明细由评分器在第二步填入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperAnalysis {
    pub specialty: Specialty,
    pub keywords: Vec<String>,
    pub focus: String,
    #[serde(default)]
    pub interest_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_breakdown: Option<ScoreBreakdown>,
}

impl PaperAnalysis {
    pub const MAX_KEYWORDS: usize = 5;

    pub fn new(specialty: Specialty, mut keywords: Vec<String>, focus: String) -> Self {
        keywords.truncate(Self::MAX_KEYWORDS);
        Self {
            specialty,
            keywords,
            focus,
            interest_score: 0.0,
            score_breakdown: None,
        }
    }
}

/// 论文与其分析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPaper {
    pub paper: Paper,
    pub analysis: PaperAnalysis,
}

/// 邮件订阅者，以规范化后的邮箱为唯一键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub medical_interests: Vec<Specialty>,
    pub reading_time: String,
    pub signed_up_at: DateTime<Utc>,
}

impl Subscriber {
    /// 邮箱统一去空白并转小写
    pub fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// 可按兴趣分数过滤/排序的条目
pub trait Scored {
    fn interest_score(&self) -> f64;
}

impl Scored for ScoredPaper {
    fn interest_score(&self) -> f64 {
        self.analysis.interest_score
    }
}

impl Scored for PaperAnalysis {
    fn interest_score(&self) -> f64 {
        self.interest_score
    }
}

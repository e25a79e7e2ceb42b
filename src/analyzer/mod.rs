use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};

use crate::budget::CallType;
use crate::llm::{extract_json_as, LlmGateway};
use crate::models::{Paper, PaperAnalysis, Specialty};
use crate::prompts;

/// 摘要在提示词中的最大字符数
const ABSTRACT_PROMPT_CHARS: usize = 500;
const PROMPT_AUTHORS: usize = 5;

#[derive(Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    summary: String,
    specialty: String,
    #[serde(default)]
    keywords: Vec<String>,
}

/// 单篇论文的 AI 分析：分类专科、提取关键词、生成摘要
pub struct PaperAnalyzer {
    llm: LlmGateway,
}

impl PaperAnalyzer {
    pub fn new(llm: LlmGateway) -> Self {
        Self { llm }
    }

    /// 返回 `Ok(None)` 表示模型输出无法解析或专科不在列表中
    pub async fn analyze(&self, paper: &Paper) -> Result<Option<PaperAnalysis>> {
        let prompt = build_prompt(paper);
        let response = self
            .llm
            .ask(CallType::PaperAnalysis, prompts::PAPER_ANALYSIS_SYSTEM, &prompt)
            .await?;

        let analysis = parse_analysis_response(&response);
        match &analysis {
            Some(a) => info!("论文 {} 分析完成: {}", paper.id, a.specialty),
            None => warn!("论文 {} 的分析结果无法解析", paper.id),
        }
        Ok(analysis)
    }
}

pub fn build_prompt(paper: &Paper) -> String {
    let abstract_excerpt: String = paper.abstract_text.chars().take(ABSTRACT_PROMPT_CHARS).collect();
    let authors = paper
        .authors
        .iter()
        .take(PROMPT_AUTHORS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    let categories = paper.categories.join(", ");
    let specialties = Specialty::prompt_list();

    prompts::render(
        prompts::PAPER_ANALYSIS,
        &[
            ("title", paper.title.as_str()),
            ("abstract", abstract_excerpt.as_str()),
            ("conclusion", paper.conclusion.as_str()),
            ("authors", authors.as_str()),
            ("categories", categories.as_str()),
            ("specialties", specialties.as_str()),
        ],
    )
}

pub fn parse_analysis_response(response: &str) -> Option<PaperAnalysis> {
    let raw: RawAnalysis = extract_json_as(response)?;

    let specialty = match raw.specialty.parse::<Specialty>() {
        Ok(specialty) => specialty,
        Err(e) => {
            warn!("{}", e);
            return None;
        }
    };

    let keywords = raw
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    Some(PaperAnalysis::new(specialty, keywords, raw.summary.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::llm::testing::{gateway, ScriptedModel};

    fn paper() -> Paper {
        Paper {
            id: "2401.1".to_string(),
            title: "Wearable ECG screening".to_string(),
            published: Utc::now(),
            abstract_text: "x".repeat(800),
            conclusion: "It works.".to_string(),
            authors: (1..=7).map(|i| format!("Author {}", i)).collect(),
            categories: vec!["eess.SP".to_string(), "cs.LG".to_string()],
        }
    }

    #[test]
    fn prompt_truncates_abstract_and_authors() {
        let prompt = build_prompt(&paper());
        assert!(prompt.contains(&format!("Abstract: {}\n", "x".repeat(500))));
        assert!(prompt.contains("Author 5"));
        assert!(!prompt.contains("Author 6"));
        assert!(prompt.contains("Cardiology, Endocrinology, General Medicine"));
    }

    #[test]
    fn parses_wrapped_response() {
        let response = r#"Here is the analysis:
{"summary": " A wearable patch detects AF. ", "specialty": "cardiology",
 "keywords": ["atrial fibrillation", "ecg", "wearable", "screening", "ai", "extra"]}"#;
        let analysis = parse_analysis_response(response).unwrap();
        assert_eq!(analysis.specialty, Specialty::Cardiology);
        assert_eq!(analysis.focus, "A wearable patch detects AF.");
        assert_eq!(analysis.keywords.len(), 5);
    }

    #[test]
    fn unknown_specialty_is_rejected() {
        let response = r#"{"summary": "s", "specialty": "Dermatology", "keywords": []}"#;
        assert!(parse_analysis_response(response).is_none());
        assert!(parse_analysis_response("not json").is_none());
    }

    #[tokio::test]
    async fn analyze_records_usage() {
        let (llm, model) = gateway(ScriptedModel::new(vec![Ok(
            r#"{"summary": "s", "specialty": "Oncology", "keywords": ["tumor"]}"#.to_string(),
        )]));
        let analyzer = PaperAnalyzer::new(llm.clone());

        let analysis = analyzer.analyze(&paper()).await.unwrap().unwrap();
        assert_eq!(analysis.specialty, Specialty::Oncology);
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
        assert_eq!(llm.budget().history().await[0].call_type, CallType::PaperAnalysis);
    }
}

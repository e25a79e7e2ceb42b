//! 方法学评分：由模型判断论文使用了哪些方法学，再叠加内容长度、作者数、
//! 分类相关度、关键词数量等次要信号。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::budget::CallType;
use crate::config::Lexicon;
use crate::llm::{extract_json, LlmGateway};
use crate::models::{Paper, PaperAnalysis, ScoreBreakdown};
use crate::prompts;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodologyFlag {
    pub methodology: String,
    pub present: u8,
}

impl MethodologyFlag {
    pub fn is_present(&self) -> bool {
        self.present == 1
    }
}

/// 0/1、true/false、"1"/"yes" 都视为合法标记
fn presence(value: &Value) -> Option<u8> {
    match value {
        Value::Bool(b) => Some(u8::from(*b)),
        Value::Number(n) => n.as_u64().map(|v| u8::from(v > 0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(1),
            "0" | "false" | "no" => Some(0),
            _ => None,
        },
        _ => None,
    }
}

/// 把模型返回的数组整理为与输入列表一一对应、顺序一致的结果。
/// 返回值不是数组，或数组中没有一个合法的 {methodology, present} 条目时，
/// 视为未识别到任何方法学。
pub fn parse_methodology_flags(response: &str, methodologies: &[String]) -> Vec<MethodologyFlag> {
    let Some(Value::Array(items)) = extract_json(response) else {
        warn!("方法学识别返回格式无效，按未识别处理");
        return Vec::new();
    };

    let reported: Vec<(String, u8)> = items
        .iter()
        .filter_map(|item| {
            let name = item.get("methodology")?.as_str()?.trim().to_lowercase();
            let present = presence(item.get("present")?)?;
            Some((name, present))
        })
        .collect();

    if reported.is_empty() {
        warn!("方法学识别返回的数组中没有有效条目，按未识别处理");
        return Vec::new();
    }

    methodologies
        .iter()
        .map(|methodology| {
            let wanted = methodology.to_lowercase();
            let present = reported
                .iter()
                .find(|(name, _)| *name == wanted)
                .map_or(0, |(_, present)| *present);
            MethodologyFlag {
                methodology: methodology.clone(),
                present,
            }
        })
        .collect()
}

/// 方法学识别，模型调用失败时返回空列表
#[derive(Clone)]
pub struct MethodologyClassifier {
    llm: LlmGateway,
}

impl MethodologyClassifier {
    pub fn new(llm: LlmGateway) -> Self {
        Self { llm }
    }

    pub async fn detect(&self, paper_text: &str, methodologies: &[String]) -> Vec<MethodologyFlag> {
        if methodologies.is_empty() {
            return Vec::new();
        }

        let list = methodologies.join(", ");
        let prompt = prompts::render(
            prompts::METHODOLOGY_DETECTION,
            &[("methodologies", list.as_str()), ("paper_text", paper_text)],
        );

        match self
            .llm
            .ask(CallType::MethodologyDetection, prompts::METHODOLOGY_SYSTEM, &prompt)
            .await
        {
            Ok(response) => parse_methodology_flags(&response, methodologies),
            Err(e) => {
                warn!("方法学识别失败: {:#}", e);
                Vec::new()
            }
        }
    }
}

/// 按证据等级统计的已识别方法学
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedMethodologies {
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
}

pub fn methodology_points(detected: &DetectedMethodologies) -> f64 {
    let high = (detected.high.len() as f64 * 1.0).min(3.0);
    let medium = (detected.medium.len() as f64 * 0.5).min(1.5);
    let low = (detected.low.len() as f64 * 0.3).min(1.0);
    high + medium - low
}

pub fn content_points(content_length: usize) -> f64 {
    match content_length {
        n if n > 2000 => 1.0,
        n if n > 1000 => 0.7,
        n if n > 500 => 0.4,
        _ => 0.1,
    }
}

pub fn author_points(author_count: usize) -> f64 {
    match author_count {
        n if n >= 10 => 1.0,
        n if n >= 5 => 0.8,
        n if n >= 3 => 0.6,
        2 => 0.4,
        _ => 0.2,
    }
}

pub fn category_points(relevant: usize) -> f64 {
    match relevant {
        0 => 0.5,
        1 => 1.0,
        2 => 1.5,
        _ => 2.0,
    }
}

pub fn keyword_points(keyword_count: usize) -> f64 {
    match keyword_count {
        0 => 0.0,
        1 | 2 => 1.0,
        _ => 2.0,
    }
}

#[derive(Clone)]
pub struct MethodologyScorer {
    classifier: MethodologyClassifier,
    lexicon: Arc<Lexicon>,
}

impl MethodologyScorer {
    pub fn new(classifier: MethodologyClassifier, lexicon: Arc<Lexicon>) -> Self {
        Self { classifier, lexicon }
    }

    async fn detect_tier(&self, text: &str, methodologies: &[String]) -> Vec<String> {
        self.classifier
            .detect(text, methodologies)
            .await
            .into_iter()
            .filter(MethodologyFlag::is_present)
            .map(|flag| flag.methodology)
            .collect()
    }

    pub async fn score(&self, paper: &Paper, analysis: &PaperAnalysis) -> (f64, ScoreBreakdown) {
        let text = format!("{} {}", paper.abstract_text, paper.conclusion);
        let tiers = &self.lexicon.methodologies;

        let detected = DetectedMethodologies {
            high: self.detect_tier(&text, &tiers.high).await,
            medium: self.detect_tier(&text, &tiers.medium).await,
            low: self.detect_tier(&text, &tiers.low).await,
        };
        debug!("论文 {} 识别到的方法学: {:?}", paper.id, detected);

        let mut breakdown = ScoreBreakdown::default();
        breakdown.add(
            "methodology_score",
            methodology_points(&detected),
            format!(
                "high: [{}]; medium: [{}]; low: [{}]",
                detected.high.join(", "),
                detected.medium.join(", "),
                detected.low.join(", ")
            ),
        );

        let content_length = paper.abstract_text.len() + paper.conclusion.len();
        breakdown.add(
            "content_score",
            content_points(content_length),
            format!("{} characters of abstract and conclusion", content_length),
        );

        breakdown.add(
            "author_score",
            author_points(paper.authors.len()),
            format!("{} authors", paper.authors.len()),
        );

        let relevant: Vec<&str> = paper
            .categories
            .iter()
            .filter(|cat| {
                self.lexicon
                    .relevant_categories
                    .iter()
                    .any(|wanted| cat.contains(wanted.as_str()))
            })
            .map(|cat| cat.as_str())
            .collect();
        breakdown.add(
            "category_score",
            category_points(relevant.len()),
            format!("relevant categories: [{}]", relevant.join(", ")),
        );

        breakdown.add(
            "keyword_score",
            keyword_points(analysis.keywords.len()),
            format!("{} keywords", analysis.keywords.len()),
        );

        (breakdown.final_score(), breakdown)
    }

    pub async fn apply(&self, paper: &Paper, analysis: &mut PaperAnalysis) -> f64 {
        let (score, breakdown) = self.score(paper, analysis).await;
        analysis.interest_score = score;
        analysis.score_breakdown = Some(breakdown);
        score
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::llm::testing::{gateway, ScriptedModel};
    use crate::models::Specialty;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_follow_input_order() {
        let response = r#"```json
[{"methodology": "Cohort Study", "present": true},
 {"methodology": "randomized controlled trial", "present": 1},
 {"methodology": "Case Report", "present": "0"}]
```"#;
        let flags = parse_methodology_flags(
            response,
            &names(&["Randomized Controlled Trial", "Meta-Analysis", "Cohort Study"]),
        );
        let present: Vec<(&str, u8)> = flags
            .iter()
            .map(|f| (f.methodology.as_str(), f.present))
            .collect();
        assert_eq!(
            present,
            vec![
                ("Randomized Controlled Trial", 1),
                ("Meta-Analysis", 0),
                ("Cohort Study", 1)
            ]
        );
    }

    #[test]
    fn malformed_response_means_nothing_detected() {
        assert!(parse_methodology_flags("I cannot help with that", &names(&["RCT"])).is_empty());
        assert!(parse_methodology_flags(r#"{"methodology": "RCT"}"#, &names(&["RCT"])).is_empty());
    }

    #[test]
    fn array_without_valid_entries_means_nothing_detected() {
        assert!(parse_methodology_flags("[1, 0]", &names(&["RCT", "Cohort Study"])).is_empty());
        assert!(parse_methodology_flags(r#"[{"name": "RCT"}]"#, &names(&["RCT"])).is_empty());
    }

    #[test]
    fn methodology_points_are_capped() {
        let detected = DetectedMethodologies {
            high: names(&["a", "b", "c", "d"]),
            medium: names(&["e", "f", "g", "h"]),
            low: names(&["i", "j", "k", "l"]),
        };
        assert_eq!(methodology_points(&detected), 3.0 + 1.5 - 1.0);
        assert_eq!(methodology_points(&DetectedMethodologies::default()), 0.0);
    }

    #[test]
    fn secondary_signal_tiers() {
        assert_eq!(content_points(2001), 1.0);
        assert_eq!(content_points(2000), 0.7);
        assert_eq!(content_points(501), 0.4);
        assert_eq!(content_points(10), 0.1);
        assert_eq!(author_points(12), 1.0);
        assert_eq!(author_points(2), 0.4);
        assert_eq!(author_points(0), 0.2);
        assert_eq!(category_points(4), 2.0);
        assert_eq!(keyword_points(3), 2.0);
        assert_eq!(keyword_points(1), 1.0);
    }

    #[tokio::test]
    async fn failed_detection_still_scores_secondary_signals() {
        let (llm, _) = gateway(ScriptedModel::new(vec![]));
        let scorer = MethodologyScorer::new(
            MethodologyClassifier::new(llm),
            Arc::new(Lexicon::default()),
        );
        let paper = Paper {
            id: "1".to_string(),
            title: "t".to_string(),
            published: Utc::now(),
            abstract_text: "short".to_string(),
            conclusion: String::new(),
            authors: names(&["a", "b", "c"]),
            categories: names(&["cs.LG", "q-bio.NC", "physics.med-ph"]),
        };
        let analysis = PaperAnalysis::new(
            Specialty::Neurology,
            names(&["eeg", "seizure", "deep learning"]),
            String::new(),
        );

        let (score, breakdown) = scorer.score(&paper, &analysis).await;
        assert_eq!(breakdown.get("methodology_score"), Some(0.0));
        assert_eq!(breakdown.get("category_score"), Some(1.5));
        // 0.1 + 0.6 + 1.5 + 2.0
        assert_eq!(score, 4.2);
    }
}

//! 论文兴趣评分
//!
//! 默认使用关键词规则评分（`InterestScorer`），完全确定、无需再次调用模型；
//! `scoring.mode = methodology` 时改用 `MethodologyScorer`。两者的分数不可直接比较。

pub mod methodology;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use md5::{Digest, Md5};

use crate::config::lexicon::PhraseTier;
use crate::config::Lexicon;
use crate::models::{Paper, PaperAnalysis, ScoreBreakdown, Scored, ScoredPaper};

pub use methodology::{MethodologyClassifier, MethodologyScorer};

/// 基础分
pub const BASE_SCORE: f64 = 6.0;
/// 方法学创新因子上限
const INNOVATION_CAP: f64 = 1.5;

static SAMPLE_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bn\s*=\s*(\d[\d,]*)").expect("valid sample size regex"));

/// 短语是否以词首位置出现在文本中（"cohorts" 命中 "cohort"，"infarct" 不命中 "rct"）
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    text.match_indices(phrase).any(|(idx, _)| {
        text[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

fn first_match<'a>(text: &str, phrases: &'a [String]) -> Option<&'a str> {
    phrases
        .iter()
        .map(|p| p.as_str())
        .find(|p| contains_phrase(text, &p.to_lowercase()))
}

fn count_matches(text: &str, phrases: &[String]) -> usize {
    phrases
        .iter()
        .filter(|p| contains_phrase(text, &p.to_lowercase()))
        .count()
}

/// 按优先级取第一个命中的档位
fn first_tier<'a>(text: &str, tiers: &'a [PhraseTier]) -> Option<(&'a PhraseTier, &'a str)> {
    tiers
        .iter()
        .find_map(|tier| first_match(text, &tier.phrases).map(|phrase| (tier, phrase)))
}

/// 文本中所有 "n = 123" 形式的样本量
fn sample_sizes(text: &str) -> Vec<u64> {
    SAMPLE_SIZE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().replace(',', "").parse().ok())
        .collect()
}

/// 内容哈希得到的 0.000–0.099 偏移，用于打破同分
pub fn hash_variance(text: &str) -> f64 {
    let digest = Md5::digest(text.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    f64::from(prefix % 100) / 1000.0
}

/// 关键词规则评分器
#[derive(Debug, Clone)]
pub struct InterestScorer {
    lexicon: Arc<Lexicon>,
}

impl InterestScorer {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Self { lexicon }
    }

    pub fn score(&self, paper: &Paper, analysis: &PaperAnalysis) -> (f64, ScoreBreakdown) {
        let blob = format!("{} {}", paper.scoring_text(), analysis.keywords.join(" ")).to_lowercase();
        let lex = &self.lexicon;
        let mut breakdown = ScoreBreakdown::default();

        breakdown.add("base_score", BASE_SCORE, "base score");

        match first_tier(&blob, &lex.study_types) {
            Some((tier, phrase)) => breakdown.add(
                "study_type",
                tier.weight,
                format!("{} ('{}')", tier.label, phrase),
            ),
            None => breakdown.add("study_type", 0.0, "no recognised study design"),
        }

        let high = count_matches(&blob, &lex.high_impact);
        let moderate = count_matches(&blob, &lex.moderate_impact);
        let low = count_matches(&blob, &lex.low_impact);
        let impact = (high as f64 * 0.3).min(1.5) + (moderate as f64 * 0.1).min(0.5)
            - (low as f64 * 0.2).min(1.0);
        breakdown.add(
            "clinical_impact_keywords",
            impact,
            format!("{} high, {} moderate, {} low impact terms", high, moderate, low),
        );

        let (sample, reason) = self.sample_size(&blob);
        breakdown.add("sample_size", sample, reason);

        match first_tier(&blob, &lex.clinical_timeline) {
            Some((tier, phrase)) => breakdown.add(
                "clinical_timeline",
                tier.weight,
                format!("{} ('{}')", tier.label, phrase),
            ),
            None => breakdown.add("clinical_timeline", 0.0, "no clinical translation signal"),
        }

        let (innovation, reasons) = self.methodological_innovation(&blob);
        let reason = if reasons.is_empty() {
            "no methodological innovation".to_string()
        } else {
            reasons.join(", ")
        };
        breakdown.add("methodological_innovation", innovation, reason);

        if let Some(word) = first_match(&blob, &lex.legacy_novelty) {
            breakdown.add("innovation_keywords", 0.5, format!("novelty term '{}'", word));
        } else if let Some(word) = first_match(&blob, &lex.legacy_ai) {
            breakdown.add("innovation_keywords", 0.3, format!("AI/ML term '{}'", word));
        } else {
            breakdown.add("innovation_keywords", 0.0, "no innovation terms");
        }

        let variance = hash_variance(&blob);
        breakdown.add("hash_variance", variance, format!("content hash offset {:.3}", variance));

        (breakdown.final_score(), breakdown)
    }

    /// 评分并写回分析结果
    pub fn apply(&self, paper: &Paper, analysis: &mut PaperAnalysis) -> f64 {
        let (score, breakdown) = self.score(paper, analysis);
        analysis.interest_score = score;
        analysis.score_breakdown = Some(breakdown);
        score
    }

    fn sample_size(&self, blob: &str) -> (f64, String) {
        let sizes = sample_sizes(blob);

        if let Some(phrase) = first_match(blob, &self.lexicon.large_sample) {
            return (1.0, format!("large sample ('{}')", phrase));
        }
        if let Some(n) = sizes.iter().find(|&&n| n >= 1000) {
            return (1.0, format!("large sample (n = {})", n));
        }
        if let Some(phrase) = first_match(blob, &self.lexicon.small_sample) {
            return (-0.5, format!("small sample ('{}')", phrase));
        }
        if let Some(n) = sizes.iter().find(|&&n| (1..50).contains(&n)) {
            return (-0.5, format!("small sample (n = {})", n));
        }
        (0.0, "sample size not stated".to_string())
    }

    fn methodological_innovation(&self, blob: &str) -> (f64, Vec<String>) {
        let inn = &self.lexicon.innovation;
        let mut total = 0.0;
        let mut reasons = Vec::new();

        if let Some(p) = first_match(blob, &inn.novel_method) {
            total += 1.0;
            reasons.push(format!("novel method '{}'", p));
        } else if let Some(p) = first_match(blob, &inn.ai_ml) {
            total += 0.5;
            reasons.push(format!("AI/ML method '{}'", p));
        }

        if let Some(p) = first_match(blob, &inn.data_release) {
            total += 0.8;
            reasons.push(format!("data/code release '{}'", p));
        } else if let Some(p) = first_match(blob, &inn.tooling) {
            total += 0.6;
            reasons.push(format!("tooling '{}'", p));
        }

        if let Some(p) = first_match(blob, &inn.reproducibility) {
            total += 0.4;
            reasons.push(format!("reproducibility '{}'", p));
        }

        if let Some(p) = first_match(blob, &inn.multimodal) {
            total += 0.3;
            reasons.push(format!("multimodal '{}'", p));
        }

        (f64::min(total, INNOVATION_CAP), reasons)
    }
}

/// 按配置选择的评分方式
pub enum PaperScorer {
    Heuristic(InterestScorer),
    Methodology(MethodologyScorer),
}

impl PaperScorer {
    pub async fn apply(&self, paper: &Paper, analysis: &mut PaperAnalysis) -> f64 {
        match self {
            PaperScorer::Heuristic(scorer) => scorer.apply(paper, analysis),
            PaperScorer::Methodology(scorer) => scorer.apply(paper, analysis).await,
        }
    }
}

fn sort_descending<T: Scored>(items: &mut [&T]) {
    // sort_by 是稳定排序，同分保持原有顺序
    items.sort_by(|a, b| b.interest_score().total_cmp(&a.interest_score()));
}

/// 分数 ≥ 阈值的条目，按分数降序
pub fn get_high_interest<T: Scored>(items: &[T], threshold: f64) -> Vec<&T> {
    let mut selected: Vec<&T> = items
        .iter()
        .filter(|item| item.interest_score() >= threshold)
        .collect();
    sort_descending(&mut selected);
    selected
}

/// 分数落在 [min, max] 内的条目，按分数降序
pub fn get_by_range<T: Scored>(items: &[T], min: f64, max: f64) -> Vec<&T> {
    let mut selected: Vec<&T> = items
        .iter()
        .filter(|item| (min..=max).contains(&item.interest_score()))
        .collect();
    sort_descending(&mut selected);
    selected
}

/// 用关键词规则为一组论文评分
pub fn score_all(scorer: &InterestScorer, papers: &mut [ScoredPaper]) {
    for item in papers.iter_mut() {
        scorer.apply(&item.paper, &mut item.analysis);
    }
}

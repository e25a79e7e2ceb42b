use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::UsageStats;
use crate::models::{ScoredPaper, Specialty};

/// 每个专科保留的高频关键词数
pub const SPECIALTY_TOP_KEYWORDS: usize = 8;
/// 全部论文的高频关键词数
pub const OVERALL_TOP_KEYWORDS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: usize,
}

/// 按出现次数降序统计关键词（忽略大小写），同频按首次出现顺序
pub fn top_keywords<'a>(keywords: impl IntoIterator<Item = &'a str>, limit: usize) -> Vec<KeywordCount> {
    let mut counts: Vec<KeywordCount> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for keyword in keywords {
        let normalized = keyword.trim().to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        match index.get(&normalized) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(normalized.clone(), counts.len());
                counts.push(KeywordCount {
                    keyword: normalized,
                    count: 1,
                });
            }
        }
    }

    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(limit);
    counts
}

/// 简报中的单篇论文条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub keywords: Vec<String>,
    pub focus: String,
    pub date: String,
    pub interest_score: f64,
}

impl From<&ScoredPaper> for PaperSummary {
    fn from(item: &ScoredPaper) -> Self {
        Self {
            id: item.paper.id.clone(),
            title: item.paper.title.clone(),
            authors: item.paper.authors.clone(),
            keywords: item.analysis.keywords.clone(),
            focus: item.analysis.focus.clone(),
            date: item.paper.published.format("%Y-%m-%d").to_string(),
            interest_score: item.analysis.interest_score,
        }
    }
}

/// 单个专科的论文、关键词与作者
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialtyGroup {
    pub papers: Vec<PaperSummary>,
    pub all_keywords: Vec<String>,
    pub authors: BTreeSet<String>,
    pub top_keywords: Vec<KeywordCount>,
}

impl SpecialtyGroup {
    pub fn push(&mut self, item: &ScoredPaper) {
        self.papers.push(PaperSummary::from(item));
        self.all_keywords.extend(item.analysis.keywords.iter().cloned());
        self.authors.extend(item.paper.authors.iter().cloned());
    }

    pub fn unique_authors(&self) -> usize {
        self.authors.len()
    }
}

/// 按专科分组，键为专科名称（字母序）
pub fn group_by_specialty(papers: &[ScoredPaper]) -> BTreeMap<String, SpecialtyGroup> {
    let mut groups: BTreeMap<String, SpecialtyGroup> = BTreeMap::new();
    for item in papers {
        groups
            .entry(item.analysis.specialty.to_string())
            .or_default()
            .push(item);
    }
    for group in groups.values_mut() {
        group.top_keywords = top_keywords(
            group.all_keywords.iter().map(String::as_str),
            SPECIALTY_TOP_KEYWORDS,
        );
    }
    groups
}

/// 一批论文的综合分析
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchAnalysis {
    pub batch_number: usize,
    pub papers_analyzed: usize,
    pub batch_summary: String,
    pub significant_findings: Vec<String>,
    pub major_trends: Vec<String>,
    pub medical_impact: String,
    pub cross_specialty_insights: String,
    pub medical_keywords: Vec<String>,
    pub specialties_covered: Vec<String>,
}

/// 简报各章节；生成失败的章节保持为空
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestSections {
    pub executive_summary: String,
    pub key_discoveries: Vec<String>,
    pub emerging_trends: String,
    pub medical_impact: String,
    pub cross_specialty_insights: String,
    pub clinical_implications: String,
    pub research_gaps: String,
    pub future_directions: String,
}

impl DigestSections {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestDocument {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub date_generated: String,
    pub search_query: String,
    pub papers_fetched: usize,
    pub total_papers: usize,
    pub specialty_data: BTreeMap<String, SpecialtyGroup>,
    #[serde(default)]
    pub high_interest_papers: Vec<PaperSummary>,
    #[serde(default)]
    pub batch_analyses: Vec<BatchAnalysis>,
    #[serde(flatten)]
    pub sections: DigestSections,
    #[serde(default)]
    pub top_keywords: Vec<KeywordCount>,
    #[serde(default)]
    pub token_usage: Option<UsageStats>,
}

impl DigestDocument {
    pub fn new(generated_at: DateTime<Utc>, search_query: &str) -> Self {
        Self {
            id: generated_at.format("digest_%Y%m%d_%H%M%S").to_string(),
            generated_at,
            date_generated: generated_at.format("%B %d, %Y").to_string(),
            search_query: search_query.to_string(),
            papers_fetched: 0,
            total_papers: 0,
            specialty_data: BTreeMap::new(),
            high_interest_papers: Vec::new(),
            batch_analyses: Vec::new(),
            sections: DigestSections::default(),
            top_keywords: Vec::new(),
            token_usage: None,
        }
    }

    /// 某专科中兴趣分最高的论文；分数须大于 0，同分取先出现的
    pub fn top_paper(&self, specialty: Specialty) -> Option<&PaperSummary> {
        let group = self.specialty_data.get(specialty.as_str())?;
        let mut best: Option<&PaperSummary> = None;
        for paper in &group.papers {
            let best_score = best.map_or(0.0, |p| p.interest_score);
            if paper.interest_score > best_score {
                best = Some(paper);
            }
        }
        best
    }
}

/// 拼接一批论文的提示文本，总长度不超过 `max_chars`（按字符计）
pub fn build_batch_text(papers: &[&ScoredPaper], max_chars: usize) -> String {
    let mut text = String::new();
    let mut used = 0;

    for (i, item) in papers.iter().enumerate() {
        let entry = format!(
            "Paper {}:\nTitle: {}\nSpecialty: {}\nInterest score: {:.1}\nKeywords: {}\nSummary: {}\nAbstract: {}\n\n",
            i + 1,
            item.paper.title,
            item.analysis.specialty,
            item.analysis.interest_score,
            item.analysis.keywords.join(", "),
            item.analysis.focus,
            item.paper.abstract_text,
        );
        let len = entry.chars().count();

        if used + len > max_chars {
            if used == 0 {
                text.extend(entry.chars().take(max_chars));
            }
            break;
        }
        text.push_str(&entry);
        used += len;
    }

    text
}

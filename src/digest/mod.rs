//! 简报生成流程：获取论文 → 逐篇分析 → 评分 → 按专科分组 → 分批综合分析 → 生成各章节。
//!
//! 单篇论文、单个批次、单个章节失败都只记录日志并跳过，最终总会返回简报骨架。

pub mod document;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::analyzer::PaperAnalyzer;
use crate::budget::CallType;
use crate::config::DigestConfig;
use crate::crawler::PaperSource;
use crate::llm::{extract_json_as, LlmGateway};
use crate::models::{Paper, ScoredPaper};
use crate::prompts;
use crate::scoring::{get_high_interest, PaperScorer};

pub use document::{
    build_batch_text, group_by_specialty, top_keywords, BatchAnalysis, DigestDocument,
    DigestSections, KeywordCount, PaperSummary, SpecialtyGroup, OVERALL_TOP_KEYWORDS,
};

/// 一次运行的结果：简报文档和评分后的全部论文
pub struct DigestRun {
    pub document: DigestDocument,
    pub papers: Vec<ScoredPaper>,
}

pub struct ResearchDigest {
    source: Arc<dyn PaperSource>,
    analyzer: PaperAnalyzer,
    scorer: PaperScorer,
    llm: LlmGateway,
    config: DigestConfig,
    high_interest_threshold: f64,
}

impl ResearchDigest {
    pub fn new(
        source: Arc<dyn PaperSource>,
        llm: LlmGateway,
        scorer: PaperScorer,
        config: DigestConfig,
        high_interest_threshold: f64,
    ) -> Self {
        Self {
            source,
            analyzer: PaperAnalyzer::new(llm.clone()),
            scorer,
            llm,
            config,
            high_interest_threshold,
        }
    }

    /// 获取论文失败直接返回错误，其余步骤的失败都降级处理
    pub async fn generate(&self, search_query: &str, max_results: usize) -> Result<DigestRun> {
        let mut document = DigestDocument::new(Utc::now(), search_query);

        info!("正在从论文源获取论文: {}", search_query);
        let fetched = self
            .source
            .fetch_papers(search_query, max_results)
            .await
            .context("获取论文失败")?;
        document.papers_fetched = fetched.len();
        info!("获取到 {} 篇论文", fetched.len());

        let mut papers = self.analyze_papers(fetched).await;
        for item in papers.iter_mut() {
            self.scorer.apply(&item.paper, &mut item.analysis).await;
        }
        // 稳定排序，同分保持获取顺序
        papers.sort_by(|a, b| b.analysis.interest_score.total_cmp(&a.analysis.interest_score));

        document.total_papers = papers.len();
        document.specialty_data = group_by_specialty(&papers);
        document.top_keywords = top_keywords(
            papers
                .iter()
                .flat_map(|p| p.analysis.keywords.iter().map(String::as_str)),
            OVERALL_TOP_KEYWORDS,
        );
        document.high_interest_papers = get_high_interest(&papers, self.high_interest_threshold)
            .into_iter()
            .map(PaperSummary::from)
            .collect();
        log_specialty_summary(&document);

        if papers.is_empty() {
            warn!("没有成功分析的论文，跳过综合分析");
        } else {
            document.batch_analyses = self.run_batch_analyses(&papers).await;
            if document.batch_analyses.is_empty() {
                warn!("所有批次分析均失败，仅生成简报骨架");
            } else {
                document.sections = self.generate_sections(&document.batch_analyses).await;
            }
        }

        document.token_usage = Some(self.llm.budget().get_detailed_stats().await);
        info!("简报 {} 生成完成", document.id);

        Ok(DigestRun { document, papers })
    }

    async fn analyze_papers(&self, fetched: Vec<Paper>) -> Vec<ScoredPaper> {
        let total = fetched.len();
        let mut analyzed = Vec::with_capacity(total);

        for (i, paper) in fetched.into_iter().enumerate() {
            let title: String = paper.title.chars().take(80).collect();
            info!("分析论文 {}/{}: {}", i + 1, total, title);

            match self.analyzer.analyze(&paper).await {
                Ok(Some(analysis)) => analyzed.push(ScoredPaper { paper, analysis }),
                Ok(None) => {}
                Err(e) => warn!("论文 {} 分析失败: {:#}", paper.id, e),
            }
        }

        info!("成功分析 {}/{} 篇论文", analyzed.len(), total);
        analyzed
    }

    async fn run_batch_analyses(&self, papers: &[ScoredPaper]) -> Vec<BatchAnalysis> {
        let batch_size = self.config.batch_size.max(1);
        let batch_count = papers.len().div_ceil(batch_size);
        let mut results = Vec::new();

        for (i, chunk) in papers.chunks(batch_size).enumerate() {
            let batch_number = i + 1;
            info!("批次分析 {}/{} ({} 篇论文)", batch_number, batch_count, chunk.len());

            let refs: Vec<&ScoredPaper> = chunk.iter().collect();
            let batch_text = build_batch_text(&refs, self.config.max_batch_chars);
            let size = chunk.len().to_string();
            let number = batch_number.to_string();
            let prompt = prompts::render(
                prompts::BATCH_ANALYSIS,
                &[
                    ("batch_size", size.as_str()),
                    ("batch_number", number.as_str()),
                    ("batch_text", batch_text.as_str()),
                ],
            );

            let response = match self
                .llm
                .ask(CallType::BatchAnalysis, prompts::DIGEST_SYSTEM, &prompt)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("批次 {} 分析失败: {:#}", batch_number, e);
                    continue;
                }
            };

            match extract_json_as::<BatchAnalysis>(&response) {
                Some(mut analysis) => {
                    analysis.batch_number = batch_number;
                    analysis.papers_analyzed = chunk.len();
                    results.push(analysis);
                }
                None => warn!("批次 {} 的分析结果无法解析", batch_number),
            }
        }

        results
    }

    async fn generate_sections(&self, batches: &[BatchAnalysis]) -> DigestSections {
        let combined = match serde_json::to_string_pretty(batches) {
            Ok(json) => json.chars().take(self.config.max_batch_chars).collect::<String>(),
            Err(e) => {
                warn!("序列化批次分析失败: {}", e);
                return DigestSections::default();
            }
        };

        let executive_summary = self
            .section("executive summary", prompts::EXECUTIVE_SUMMARY, &combined)
            .await
            .unwrap_or_default();

        let key_discoveries = match self.section("key discoveries", prompts::KEY_DISCOVERIES, &combined).await {
            Some(text) => extract_json_as::<Vec<String>>(&text).unwrap_or_else(|| {
                warn!("关键发现不是 JSON 数组，已忽略");
                Vec::new()
            }),
            None => Vec::new(),
        };

        DigestSections {
            executive_summary,
            key_discoveries,
            emerging_trends: self
                .section("emerging trends", prompts::EMERGING_TRENDS, &combined)
                .await
                .unwrap_or_default(),
            medical_impact: self
                .section("medical impact", prompts::MEDICAL_IMPACT, &combined)
                .await
                .unwrap_or_default(),
            cross_specialty_insights: self
                .section("cross-specialty insights", prompts::CROSS_SPECIALTY, &combined)
                .await
                .unwrap_or_default(),
            clinical_implications: self
                .section("clinical implications", prompts::CLINICAL_IMPLICATIONS, &combined)
                .await
                .unwrap_or_default(),
            research_gaps: self
                .section("research gaps", prompts::RESEARCH_GAPS, &combined)
                .await
                .unwrap_or_default(),
            future_directions: self
                .section("future directions", prompts::FUTURE_DIRECTIONS, &combined)
                .await
                .unwrap_or_default(),
        }
    }

    async fn section(&self, name: &str, template: &str, batch_results: &str) -> Option<String> {
        let prompt = prompts::render(template, &[("batch_results", batch_results)]);
        match self
            .llm
            .ask(CallType::DigestSection, prompts::DIGEST_SYSTEM, &prompt)
            .await
        {
            Ok(text) => {
                info!("章节 {} 生成完成", name);
                Some(text.trim().to_string())
            }
            Err(e) => {
                warn!("章节 {} 生成失败: {:#}", name, e);
                None
            }
        }
    }
}

fn log_specialty_summary(document: &DigestDocument) {
    let mut groups: Vec<(&String, &SpecialtyGroup)> = document.specialty_data.iter().collect();
    groups.sort_by(|a, b| b.1.papers.len().cmp(&a.1.papers.len()));

    for (specialty, group) in groups {
        info!(
            "{} ({} 篇论文, {} 位作者)",
            specialty,
            group.papers.len(),
            group.unique_authors()
        );
        let terms: Vec<String> = group
            .top_keywords
            .iter()
            .map(|k| format!("{} ({})", k.keyword, k.count))
            .collect();
        if !terms.is_empty() {
            info!("  高频术语: {}", terms.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::config::Lexicon;
    use crate::llm::testing::{gateway, ScriptedModel};
    use crate::scoring::InterestScorer;

    struct FixedSource(Vec<Paper>);

    #[async_trait]
    impl PaperSource for FixedSource {
        async fn fetch_papers(&self, _query: &str, max_results: usize) -> Result<Vec<Paper>> {
            Ok(self.0.iter().take(max_results).cloned().collect())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PaperSource for FailingSource {
        async fn fetch_papers(&self, _query: &str, _max_results: usize) -> Result<Vec<Paper>> {
            anyhow::bail!("arXiv 不可用")
        }
    }

    fn paper(id: &str, title: &str) -> Paper {
        Paper {
            id: id.to_string(),
            title: title.to_string(),
            published: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            abstract_text: format!("{} abstract text", title),
            conclusion: String::new(),
            authors: vec![format!("Author {}", id)],
            categories: vec!["q-bio.QM".to_string()],
        }
    }

    fn analysis_reply(specialty: &str, keywords: &[&str]) -> Result<String, String> {
        Ok(serde_json::json!({
            "summary": format!("{} summary", specialty),
            "specialty": specialty,
            "keywords": keywords,
        })
        .to_string())
    }

    fn batch_reply() -> Result<String, String> {
        Ok(r#"```json
{"batch_summary": "Two papers", "significant_findings": ["AF detection"], "major_trends": ["wearables"],
 "medical_impact": "earlier diagnosis", "cross_specialty_insights": "cardio-onco",
 "medical_keywords": ["ecg"], "specialties_covered": ["Cardiology", "Oncology"]}
```"#
            .to_string())
    }

    fn digest(source: Arc<dyn PaperSource>, llm: LlmGateway) -> ResearchDigest {
        ResearchDigest::new(
            source,
            llm,
            PaperScorer::Heuristic(InterestScorer::new(Arc::new(Lexicon::default()))),
            DigestConfig {
                batch_size: 10,
                max_batch_chars: 24_000,
                output_dir: "unused".to_string(),
            },
            7.0,
        )
    }

    #[tokio::test]
    async fn full_run_builds_every_section() {
        let papers = vec![
            paper("1", "Randomized controlled trial of a wearable ECG"),
            paper("2", "Unparseable"),
            paper("3", "Tumor imaging"),
        ];
        let (llm, model) = gateway(ScriptedModel::new(vec![
            analysis_reply("Cardiology", &["ECG", "wearable"]),
            Ok("sorry, no json".to_string()),
            analysis_reply("Oncology", &["tumor", "ecg"]),
            batch_reply(),
            Ok("Executive summary text.".to_string()),
            Ok(r#"["Discovery one", "Discovery two"]"#.to_string()),
            Err("rate limited".to_string()),
            Ok("Impact".to_string()),
            Ok("Cross".to_string()),
            Ok("Clinical".to_string()),
            Ok("Gaps".to_string()),
            Ok("Future".to_string()),
        ]));

        let run = digest(Arc::new(FixedSource(papers)), llm)
            .generate("all:medical", 10)
            .await
            .unwrap();
        let doc = run.document;

        assert_eq!(doc.papers_fetched, 3);
        assert_eq!(doc.total_papers, 2);
        assert_eq!(run.papers.len(), 2);
        assert_eq!(
            doc.specialty_data.keys().collect::<Vec<_>>(),
            vec!["Cardiology", "Oncology"]
        );
        assert_eq!(doc.top_keywords[0], KeywordCount { keyword: "ecg".to_string(), count: 2 });

        assert_eq!(doc.batch_analyses.len(), 1);
        assert_eq!(doc.batch_analyses[0].batch_number, 1);
        assert_eq!(doc.batch_analyses[0].papers_analyzed, 2);

        assert_eq!(doc.sections.executive_summary, "Executive summary text.");
        assert_eq!(doc.sections.key_discoveries, vec!["Discovery one", "Discovery two"]);
        assert!(doc.sections.emerging_trends.is_empty());
        assert_eq!(doc.sections.future_directions, "Future");

        let usage = doc.token_usage.unwrap();
        assert_eq!(usage.total_calls, 11);
        assert_eq!(model.prompts.lock().unwrap().len(), 12);
        assert!(run.papers[0].analysis.interest_score >= run.papers[1].analysis.interest_score);
    }

    #[tokio::test]
    async fn failed_batches_still_return_skeleton() {
        let (llm, model) = gateway(ScriptedModel::new(vec![
            analysis_reply("Neurology", &["eeg"]),
            Err("service unavailable".to_string()),
        ]));

        let run = digest(Arc::new(FixedSource(vec![paper("1", "EEG study")])), llm)
            .generate("all:medical", 5)
            .await
            .unwrap();

        assert_eq!(run.document.total_papers, 1);
        assert!(run.document.specialty_data.contains_key("Neurology"));
        assert!(run.document.batch_analyses.is_empty());
        assert!(run.document.sections.is_empty());
        // 批次失败后不再请求章节
        assert_eq!(model.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_propagates() {
        let (llm, _) = gateway(ScriptedModel::new(vec![]));
        let result = digest(Arc::new(FailingSource), llm).generate("all:medical", 5).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn papers_are_split_into_batches() {
        let papers: Vec<Paper> = (1..=3).map(|i| paper(&i.to_string(), "Cohort study")).collect();
        let mut replies: Vec<Result<String, String>> =
            (0..3).map(|_| analysis_reply("Surgery", &["robotic"])).collect();
        replies.push(batch_reply());
        replies.push(Ok("not json at all".to_string()));
        let (llm, _) = gateway(ScriptedModel::new(replies).with_fallback("section"));

        let mut digest = digest(Arc::new(FixedSource(papers)), llm);
        digest.config.batch_size = 2;
        let run = digest.generate("all:medical", 10).await.unwrap();

        assert_eq!(run.document.batch_analyses.len(), 1);
        assert_eq!(run.document.sections.executive_summary, "section");
        assert!(run.document.sections.key_discoveries.is_empty());
    }
}

//! 提示词模板。占位符写作 `{name}`，由 [`render`] 替换。

use std::sync::LazyLock;

use regex::{Captures, Regex};

pub const PAPER_ANALYSIS_SYSTEM: &str = "You are an expert medical research analyst with broad knowledge \
across clinical specialties. Classify research papers accurately, extract the key medical concepts and \
summarise findings precisely. Use consistent terminology and avoid subjective language.";

pub const PAPER_ANALYSIS: &str = r#"Analyze the following medical research paper.

Title: {title}
Abstract: {abstract}
Conclusion: {conclusion}
Authors: {authors}
Categories: {categories}

Instructions:
1. Write a 2-3 sentence summary of the key findings.
2. Choose the primary medical specialty from exactly this list: {specialties}
3. Extract 5 key medical concepts or terms.

Return ONLY a JSON object with this structure:
{"summary": "...", "specialty": "one specialty from the list", "keywords": ["k1", "k2", "k3", "k4", "k5"]}"#;

pub const METHODOLOGY_SYSTEM: &str = "You are an expert medical research analyst. Decide which \
methodologies from the provided list are used in the paper text. Answer with a JSON array only.";

pub const METHODOLOGY_DETECTION: &str = r#"Methodology list: {methodologies}

Paper text: {paper_text}

For every methodology in the list, in the same order, report whether the paper uses it.
Return ONLY a JSON array:
[{"methodology": "name", "present": 1}, {"methodology": "name", "present": 0}]"#;

pub const DIGEST_SYSTEM: &str = "You are a senior medical research analyst writing a weekly research \
digest for clinicians, researchers and healthcare administrators.";

pub const BATCH_ANALYSIS: &str = r#"Analyze this batch of {batch_size} medical research papers (batch {batch_number}).

PAPERS:
{batch_text}

Look for findings with clinical relevance, patterns shared by several papers and implications that cross specialties.

Return ONLY a JSON object:
{"batch_summary": "2-3 paragraphs on key findings and their implications for practice",
 "significant_findings": ["up to 5 most significant findings"],
 "major_trends": ["2-3 trends across papers"],
 "medical_impact": "impact on medical practice and patient care",
 "cross_specialty_insights": "connections between specialties",
 "medical_keywords": ["10-15 medical keywords"],
 "specialties_covered": ["specialties represented"]}"#;

pub const EXECUTIVE_SUMMARY: &str = r#"RESEARCH DATA:
{batch_results}

Write the executive summary of this week's digest in 2-3 paragraphs (about 300-400 words).
Open with the most impactful finding, then cover the 2-3 major themes and how they could change practice.
Start directly with the content; do not introduce it."#;

pub const KEY_DISCOVERIES: &str = r#"RESEARCH DATA:
{batch_results}

Identify the 10 most important discoveries across all findings, most important first.
Each item is one or two sentences naming the finding and why it matters clinically.
Return ONLY a JSON array of strings."#;

pub const EMERGING_TRENDS: &str = r#"RESEARCH DATA:
{batch_results}

Describe the emerging research trends visible across these findings in 2-3 paragraphs.
Focus on directions supported by several papers. Start directly with the content."#;

pub const MEDICAL_IMPACT: &str = r#"RESEARCH DATA:
{batch_results}

Analyze the likely impact of these findings on medical practice, patient outcomes and healthcare delivery in 2-3 paragraphs.
Start directly with the content."#;

pub const CROSS_SPECIALTY: &str = r#"RESEARCH DATA:
{batch_results}

Describe the connections between medical specialties revealed by these findings and the opportunities for interdisciplinary care in 2-3 paragraphs.
Start directly with the content."#;

pub const CLINICAL_IMPLICATIONS: &str = r#"RESEARCH DATA:
{batch_results}

Explain what practicing clinicians should take away from these findings: changes to diagnosis, treatment or monitoring that may follow.
Write 2-3 paragraphs and start directly with the content."#;

pub const RESEARCH_GAPS: &str = r#"RESEARCH DATA:
{batch_results}

Identify the most important gaps and limitations in this body of research (populations, study designs, validation, missing outcomes).
Write 2-3 paragraphs and start directly with the content."#;

pub const FUTURE_DIRECTIONS: &str = r#"RESEARCH DATA:
{batch_results}

Propose the most promising future research directions suggested by these findings.
Write 2-3 paragraphs and start directly with the content."#;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder regex"));

/// 一次性替换模板中的 `{key}` 占位符；未提供的占位符原样保留，替换进来的内容不再展开
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
        })
        .into_owned()
}

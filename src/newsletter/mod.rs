use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::digest::{DigestDocument, SpecialtyGroup};
use crate::models::{Specialty, Subscriber};
use crate::utils::MedDigestError;

const TITLE: &str = "MedDigest Weekly Research Newsletter";

/// 文本章节；为空时输出占位说明
fn push_text_section(md: &mut String, heading: &str, body: &str, missing: &str) {
    md.push_str(&format!("## {}\n\n", heading));
    if body.trim().is_empty() {
        md.push_str(&format!("*No {} available.*\n\n", missing));
    } else {
        md.push_str(body.trim());
        md.push_str("\n\n");
    }
    md.push_str("---\n\n");
}

fn push_list_section(md: &mut String, heading: &str, items: &[String], missing: &str) {
    md.push_str(&format!("## {}\n\n", heading));
    if items.is_empty() {
        md.push_str(&format!("*No {} available.*\n\n", missing));
    } else {
        for (i, item) in items.iter().enumerate() {
            md.push_str(&format!("{}. {}\n", i + 1, item));
        }
        md.push('\n');
    }
    md.push_str("---\n\n");
}

fn push_specialty(md: &mut String, specialty: &str, group: &SpecialtyGroup) {
    md.push_str(&format!("## {}\n\n", specialty));
    md.push_str(&format!(
        "**Number of papers this week:** {} | **Unique authors:** {}\n\n",
        group.papers.len(),
        group.unique_authors()
    ));

    for (i, paper) in group.papers.iter().enumerate() {
        md.push_str(&format!(
            "{}. **{}** ({}, interest {:.1}/10)\n",
            i + 1,
            paper.title,
            paper.date,
            paper.interest_score
        ));
        if !paper.focus.is_empty() {
            md.push_str(&format!("   {}\n", paper.focus));
        }
    }
    md.push('\n');

    if !group.top_keywords.is_empty() {
        let terms: Vec<String> = group
            .top_keywords
            .iter()
            .map(|k| format!("{} ({})", k.keyword, k.count))
            .collect();
        md.push_str(&format!("*Top research terms:* {}\n\n", terms.join(", ")));
    }
    md.push_str("---\n\n");
}

/// Markdown 版本
pub fn render_markdown(doc: &DigestDocument) -> String {
    let sections = &doc.sections;
    let mut md = String::new();

    md.push_str(&format!("# {}\n\n", TITLE));
    md.push_str("*Curated Insights from the Latest Medical Literature*\n\n");
    md.push_str(&format!(
        "**Date:** {} | **Total Papers Analyzed:** {}\n\n---\n\n",
        doc.date_generated, doc.total_papers
    ));

    push_text_section(&mut md, "Executive Summary", &sections.executive_summary, "executive summary");
    push_list_section(&mut md, "Key Discoveries", &sections.key_discoveries, "key discoveries");
    push_text_section(&mut md, "Emerging Trends", &sections.emerging_trends, "emerging trends");
    push_text_section(&mut md, "Medical Impact", &sections.medical_impact, "medical impact analysis");
    push_text_section(
        &mut md,
        "Cross-Specialty Insights",
        &sections.cross_specialty_insights,
        "cross-specialty insights",
    );
    push_text_section(
        &mut md,
        "Clinical Implications",
        &sections.clinical_implications,
        "clinical implications",
    );
    push_text_section(&mut md, "Research Gaps", &sections.research_gaps, "research gaps");
    push_text_section(&mut md, "Future Directions", &sections.future_directions, "future directions");

    if !doc.high_interest_papers.is_empty() {
        md.push_str("## High-Interest Papers\n\n");
        for (i, paper) in doc.high_interest_papers.iter().enumerate() {
            md.push_str(&format!(
                "{}. **{}** ({:.1}/10) [arXiv:{}](https://arxiv.org/abs/{})\n",
                i + 1,
                paper.title,
                paper.interest_score,
                paper.id,
                paper.id
            ));
        }
        md.push_str("\n---\n\n");
    }

    md.push_str("## Table of Contents\n\n");
    if doc.specialty_data.is_empty() {
        md.push_str("*No papers available for this digest.*\n\n");
    } else {
        for (specialty, group) in &doc.specialty_data {
            md.push_str(&format!("- **{}** ({} papers)\n", specialty, group.papers.len()));
        }
        md.push('\n');
    }
    md.push_str("---\n\n");

    for (specialty, group) in &doc.specialty_data {
        push_specialty(&mut md, specialty, group);
    }

    md.push_str("Thank you for reading **MedDigest**!\n\n");
    md.push_str(&format!(
        "© {} MedDigest. All rights reserved.\n\n",
        doc.generated_at.format("%Y")
    ));
    md.push_str(&format!(
        "*Generated on: {}*\n",
        doc.generated_at.format("%B %d, %Y at %H:%M UTC")
    ));

    md
}

fn push_plain_section(text: &mut String, heading: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    text.push_str(&format!("{}\n{}\n{}\n\n", heading, "-".repeat(heading.len()), body.trim()));
}

/// 纯文本版本，用作邮件正文
pub fn render_text(doc: &DigestDocument) -> String {
    let sections = &doc.sections;
    let mut text = String::new();

    text.push_str(&format!("{}\n{}\n\n", TITLE, "=".repeat(TITLE.len())));
    text.push_str(&format!(
        "Date: {} | Total Papers Analyzed: {}\n\n",
        doc.date_generated, doc.total_papers
    ));

    if sections.is_empty() {
        text.push_str("No AI-generated summary is available for this digest.\n\n");
    }
    push_plain_section(&mut text, "EXECUTIVE SUMMARY", &sections.executive_summary);
    if !sections.key_discoveries.is_empty() {
        let list: Vec<String> = sections
            .key_discoveries
            .iter()
            .enumerate()
            .map(|(i, d)| format!("{}. {}", i + 1, d))
            .collect();
        push_plain_section(&mut text, "KEY DISCOVERIES", &list.join("\n"));
    }
    push_plain_section(&mut text, "EMERGING TRENDS", &sections.emerging_trends);
    push_plain_section(&mut text, "MEDICAL IMPACT", &sections.medical_impact);
    push_plain_section(&mut text, "CROSS-SPECIALTY INSIGHTS", &sections.cross_specialty_insights);
    push_plain_section(&mut text, "CLINICAL IMPLICATIONS", &sections.clinical_implications);
    push_plain_section(&mut text, "RESEARCH GAPS", &sections.research_gaps);
    push_plain_section(&mut text, "FUTURE DIRECTIONS", &sections.future_directions);

    for (specialty, group) in &doc.specialty_data {
        let papers: Vec<String> = group
            .papers
            .iter()
            .map(|p| format!("* {} ({:.1}/10)", p.title, p.interest_score))
            .collect();
        push_plain_section(
            &mut text,
            &format!("{} ({} papers)", specialty.to_uppercase(), group.papers.len()),
            &papers.join("\n"),
        );
    }

    text.push_str("Thank you for reading MedDigest!\n");
    text
}

/// 每个关注专科一段话：该专科最高分论文的研究重点，没有合适论文时给出通用提示
pub fn interest_focus_lines(doc: Option<&DigestDocument>, interests: &[Specialty]) -> Vec<String> {
    interests
        .iter()
        .map(|&interest| match doc.and_then(|d| d.top_paper(interest)) {
            Some(paper) if !paper.focus.trim().is_empty() => {
                format!("🎯 {} Research Focus: {}", interest, paper.focus.trim())
            }
            _ => format!(
                "🔬 {}: Stay updated with cutting-edge developments in {}.",
                interest, interest
            ),
        })
        .collect()
}

/// 按订阅者的姓名和关注专科包装邮件正文
pub fn render_personalized(doc: Option<&DigestDocument>, subscriber: &Subscriber, body: &str) -> String {
    let mut text = format!("Dear {},\n\n", subscriber.full_name());

    if !subscriber.medical_interests.is_empty() {
        let lines = interest_focus_lines(doc, &subscriber.medical_interests);
        push_plain_section(&mut text, "YOUR PERSONALIZED RESEARCH FOCUS", &lines.join("\n\n"));

        let names: Vec<&str> = subscriber.medical_interests.iter().map(|s| s.as_str()).collect();
        text.push_str(&format!("Specialties: {}\n\n", names.join(", ")));
    }

    text.push_str(body.trim_end());
    text.push_str("\n\nBest regards,\nThe MedDigest Team\n");
    text
}

pub fn newsletter_path(output_dir: &Path, doc: &DigestDocument) -> PathBuf {
    output_dir.join(format!("newsletter_{}.md", doc.generated_at.format("%Y-%m-%d")))
}

/// 保存 Markdown 到 `<output_dir>/newsletter_<date>.md`，返回内容和路径
pub async fn save_markdown(doc: &DigestDocument, output_dir: &Path) -> Result<(String, PathBuf)> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(MedDigestError::IoError)
        .with_context(|| format!("创建目录失败: {}", output_dir.display()))?;

    let content = render_markdown(doc);
    let path = newsletter_path(output_dir, doc);
    tokio::fs::write(&path, &content)
        .await
        .map_err(MedDigestError::IoError)
        .with_context(|| format!("写入简报失败: {}", path.display()))?;

    info!("简报已保存: {}", path.display());
    Ok((content, path))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::digest::{KeywordCount, PaperSummary};

    fn document() -> DigestDocument {
        let mut doc = DigestDocument::new(Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap(), "all:medical");
        doc.total_papers = 1;
        let mut group = SpecialtyGroup::default();
        group.papers.push(PaperSummary {
            id: "2406.00001".to_string(),
            title: "Wearable AF detection".to_string(),
            authors: vec!["Ann".to_string()],
            keywords: vec!["ecg".to_string()],
            focus: "Detects AF from a patch.".to_string(),
            date: "2024-06-01".to_string(),
            interest_score: 8.2,
        });
        group.authors.insert("Ann".to_string());
        group.top_keywords = vec![KeywordCount { keyword: "ecg".to_string(), count: 1 }];
        doc.specialty_data.insert("Cardiology".to_string(), group);
        doc
    }

    #[test]
    fn skeleton_markdown_uses_placeholders() {
        let md = render_markdown(&document());
        assert!(md.starts_with("# MedDigest Weekly Research Newsletter"));
        assert!(md.contains("**Date:** June 03, 2024 | **Total Papers Analyzed:** 1"));
        assert!(md.contains("*No executive summary available.*"));
        assert!(md.contains("*No key discoveries available.*"));
        assert!(md.contains("- **Cardiology** (1 papers)"));
        assert!(md.contains("1. **Wearable AF detection** (2024-06-01, interest 8.2/10)"));
        assert!(md.contains("© 2024 MedDigest"));
    }

    #[test]
    fn filled_sections_render_numbered_lists() {
        let mut doc = document();
        doc.sections.executive_summary = "A big week.".to_string();
        doc.sections.key_discoveries = vec!["First".to_string(), "Second".to_string()];

        let md = render_markdown(&doc);
        assert!(md.contains("## Executive Summary\n\nA big week.\n\n"));
        assert!(md.contains("1. First\n2. Second\n"));
        assert!(!md.contains("*No key discoveries available.*"));

        let text = render_text(&doc);
        assert!(text.contains("KEY DISCOVERIES\n---------------\n1. First\n2. Second"));
        assert!(text.contains("CARDIOLOGY (1 papers)"));
        assert!(!text.contains("No AI-generated summary"));
    }

    fn reader(interests: &[Specialty]) -> Subscriber {
        Subscriber {
            email: "ada@example.org".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            medical_interests: interests.to_vec(),
            reading_time: "10 minutes".to_string(),
            signed_up_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn focus_lines_use_top_paper_or_fallback() {
        let doc = document();
        let lines = interest_focus_lines(Some(&doc), &[Specialty::Cardiology, Specialty::Oncology]);
        assert_eq!(lines[0], "🎯 Cardiology Research Focus: Detects AF from a patch.");
        assert_eq!(
            lines[1],
            "🔬 Oncology: Stay updated with cutting-edge developments in Oncology."
        );

        let without_digest = interest_focus_lines(None, &[Specialty::Cardiology]);
        assert!(without_digest[0].starts_with("🔬 Cardiology:"));
    }

    #[test]
    fn personalized_email_wraps_body() {
        let doc = document();
        let text = render_personalized(
            Some(&doc),
            &reader(&[Specialty::Cardiology, Specialty::GeneralMedicine]),
            "BODY\n",
        );

        assert!(text.starts_with("Dear Ada Lovelace,\n\n"));
        assert!(text.contains("🎯 Cardiology Research Focus: Detects AF from a patch.\n\n🔬 General Medicine:"));
        assert!(text.contains("Specialties: Cardiology, General Medicine\n\nBODY\n\nBest regards,"));
        assert!(text.ends_with("The MedDigest Team\n"));
    }

    #[test]
    fn personalized_email_without_interests_skips_focus() {
        let text = render_personalized(None, &reader(&[]), "BODY");
        assert_eq!(text, "Dear Ada Lovelace,\n\nBODY\n\nBest regards,\nThe MedDigest Team\n");
    }

    #[tokio::test]
    async fn saves_newsletter_named_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("newsletters");
        let (content, path) = save_markdown(&document(), &out).await.unwrap();

        assert_eq!(path.file_name().unwrap(), "newsletter_2024-06-03.md");
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), content);
    }

    #[tokio::test]
    async fn unwritable_output_dir_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        tokio::fs::write(&blocker, "x").await.unwrap();

        let err = save_markdown(&document(), &blocker.join("out")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MedDigestError>(),
            Some(MedDigestError::IoError(_))
        ));
    }
}

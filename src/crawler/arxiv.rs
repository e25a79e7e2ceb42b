use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use super::PaperSource;
use crate::config::CrawlerConfig;
use crate::models::Paper;
use crate::utils::MedDigestError;

/// arXiv 单次请求最多返回的条目数
const PAGE_SIZE: usize = 100;
/// arXiv 要求连续请求之间至少间隔 3 秒
const PAGE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    title: String,
    summary: String,
    published: String,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: String,
}

pub struct ArxivClient {
    client: Client,
    config: CrawlerConfig,
}

impl ArxivClient {
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self { client, config })
    }

    /// 按提交时间倒序分页获取论文，直到取满或结果耗尽
    pub async fn search(&self, search_query: &str, max_results: usize) -> Result<Vec<Paper>> {
        let mut papers: Vec<Paper> = Vec::new();
        let mut start = 0;

        while papers.len() < max_results {
            if start > 0 {
                tokio::time::sleep(PAGE_DELAY).await;
            }

            let page_size = (max_results - papers.len()).min(PAGE_SIZE);
            let xml = self.fetch_page(search_query, start, page_size).await?;
            let page = parse_feed(&xml)?;
            info!(
                "arXiv 第 {} 条起返回 {} 条，有效论文 {} 篇",
                start,
                page.entry_count,
                page.papers.len()
            );

            papers.extend(page.papers);
            match next_start(start, page.entry_count, page_size) {
                Some(next) => start = next,
                None => break,
            }
        }

        papers.truncate(max_results);
        info!("共获取 {} 篇论文", papers.len());
        Ok(papers)
    }

    /// 单页请求，429/5xx 与网络错误按指数退避重试
    async fn fetch_page(&self, search_query: &str, start: usize, page_size: usize) -> Result<String> {
        let start_param = start.to_string();
        let size_param = page_size.to_string();
        let params = [
            ("search_query", search_query),
            ("start", start_param.as_str()),
            ("max_results", size_param.as_str()),
            ("sortBy", "submittedDate"),
            ("sortOrder", "descending"),
        ];

        let max_attempts = self.config.max_retries.max(1);
        let mut delay = Duration::from_secs(self.config.initial_retry_delay_secs);
        let mut attempt = 1;

        loop {
            info!("正在请求 arXiv: {} (第 {}/{} 次)", search_query, attempt, max_attempts);

            let error = match self.client.get(&self.config.base_url).query(&params).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .text()
                            .await
                            .map_err(MedDigestError::NetworkError)
                            .context("读取 arXiv 响应失败");
                    }
                    let error = MedDigestError::SourceError(format!("arXiv 返回 {}", status));
                    if !is_retryable(status) {
                        return Err(error.into());
                    }
                    anyhow::Error::new(error)
                }
                Err(e) => anyhow::Error::new(MedDigestError::NetworkError(e)).context("arXiv 请求失败"),
            };

            if attempt >= max_attempts {
                return Err(error.context(format!("arXiv 请求在 {} 次尝试后仍然失败", max_attempts)));
            }

            warn!("{:#}，{}s 后重试", error, delay.as_secs());
            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
        }
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    async fn fetch_papers(&self, search_query: &str, max_results: usize) -> Result<Vec<Paper>> {
        self.search(search_query, max_results).await
    }
}

/// 下一页的起始偏移按原始条目数推进；返回条目不足一页说明结果已耗尽
fn next_start(start: usize, entry_count: usize, page_size: usize) -> Option<usize> {
    if entry_count < page_size {
        None
    } else {
        Some(start + entry_count)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 一页 feed 的解析结果
#[derive(Debug)]
pub struct FeedPage {
    pub papers: Vec<Paper>,
    /// feed 中的原始条目数，包括被跳过的条目
    pub entry_count: usize,
}

/// 解析 Atom feed；发布时间无法解析的条目跳过
pub fn parse_feed(xml: &str) -> Result<FeedPage> {
    let feed: Feed = quick_xml::de::from_str(xml)
        .map_err(|e| MedDigestError::ParseError(format!("arXiv XML 无效: {}", e)))?;

    let entry_count = feed.entries.len();
    let papers = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let published = match DateTime::parse_from_rfc3339(entry.published.trim()) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    warn!("跳过发布时间无效的条目 {}: {}", entry.id, e);
                    return None;
                }
            };

            let id = entry
                .id
                .trim()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            let summary = normalize_whitespace(&entry.summary);

            Some(Paper {
                id,
                title: normalize_whitespace(&entry.title),
                published,
                abstract_text: summary.clone(),
                conclusion: summary,
                authors: entry
                    .authors
                    .into_iter()
                    .map(|a| a.name.trim().to_string())
                    .collect(),
                categories: entry.categories.into_iter().map(|c| c.term).collect(),
            })
        })
        .collect();

    Ok(FeedPage { papers, entry_count })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <id>https://arxiv.org/api/abc</id>
  <title>arXiv Query: search_query=all:medical</title>
  <updated>2024-05-06T00:00:00-04:00</updated>
  <opensearch:totalResults>2</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/2405.01234v1</id>
    <updated>2024-05-03T17:59:59Z</updated>
    <published>2024-05-03T17:59:59Z</published>
    <title>A Randomized Controlled Trial of
      Remote Cardiac Monitoring</title>
    <summary>  We enrolled n = 1200 patients.
  Mortality fell.  </summary>
    <author><name>Alice Smith</name></author>
    <author><name>Bob Jones</name><arxiv:affiliation>Somewhere</arxiv:affiliation></author>
    <link href="http://arxiv.org/abs/2405.01234v1" rel="alternate" type="text/html"/>
    <arxiv:primary_category term="q-bio.QM" scheme="http://arxiv.org/schemas/atom"/>
    <category term="q-bio.QM" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2405.00001v2</id>
    <published>not a date</published>
    <title>Broken</title>
    <summary>Broken</summary>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_from_atom_feed() {
        let page = parse_feed(SAMPLE_FEED).unwrap();
        assert_eq!(page.entry_count, 2);
        let papers = page.papers;
        assert_eq!(papers.len(), 1);

        let paper = &papers[0];
        assert_eq!(paper.id, "2405.01234v1");
        assert_eq!(paper.title, "A Randomized Controlled Trial of Remote Cardiac Monitoring");
        assert_eq!(paper.abstract_text, "We enrolled n = 1200 patients. Mortality fell.");
        assert_eq!(paper.conclusion, paper.abstract_text);
        assert_eq!(paper.authors, vec!["Alice Smith", "Bob Jones"]);
        assert_eq!(paper.categories, vec!["q-bio.QM", "cs.LG"]);
        assert_eq!(paper.published.to_rfc3339(), "2024-05-03T17:59:59+00:00");
    }

    #[test]
    fn empty_feed_yields_no_papers() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>empty</title></feed>"#;
        let page = parse_feed(xml).unwrap();
        assert!(page.papers.is_empty());
        assert_eq!(page.entry_count, 0);
    }

    #[test]
    fn skipped_entries_still_advance_the_offset() {
        // 满页中有一条被跳过，仍按整页推进，不会提前结束
        assert_eq!(next_start(0, 100, 100), Some(100));
        assert_eq!(next_start(100, 40, 40), Some(140));
        assert_eq!(next_start(200, 37, 100), None);
        assert_eq!(next_start(0, 0, 100), None);
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse_feed("<feed><entry>").is_err());
    }

    #[test]
    fn only_rate_limits_and_server_errors_retry() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }
}
